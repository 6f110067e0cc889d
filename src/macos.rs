//! macOS backend using rdev.
//!
//! Scan codes on this backend are the hardware virtual keycodes (`kVK_*`
//! constants, the values reported by `NSEvent.keyCode`). rdev's listen API
//! observes events but cannot withhold them, so the hook's suppression
//! decisions are advisory here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::UNIX_EPOCH;

use rdev::{listen, simulate, EventType as RdevEventType};

use crate::backend::{Backend, EventCallback, HookGuard};
use crate::error::{Error, Result};
use crate::event::{Event, EventType, ScanCode};

/// rdev key, kVK virtual keycode, canonical names (most specific first),
/// keypad flag. The keycode values come from HIToolbox/Events.h.
static KEYS: &[(rdev::Key, ScanCode, &[&str], bool)] = &[
    (rdev::Key::KeyA, 0x00, &["a"], false),
    (rdev::Key::KeyS, 0x01, &["s"], false),
    (rdev::Key::KeyD, 0x02, &["d"], false),
    (rdev::Key::KeyF, 0x03, &["f"], false),
    (rdev::Key::KeyH, 0x04, &["h"], false),
    (rdev::Key::KeyG, 0x05, &["g"], false),
    (rdev::Key::KeyZ, 0x06, &["z"], false),
    (rdev::Key::KeyX, 0x07, &["x"], false),
    (rdev::Key::KeyC, 0x08, &["c"], false),
    (rdev::Key::KeyV, 0x09, &["v"], false),
    (rdev::Key::KeyB, 0x0b, &["b"], false),
    (rdev::Key::KeyQ, 0x0c, &["q"], false),
    (rdev::Key::KeyW, 0x0d, &["w"], false),
    (rdev::Key::KeyE, 0x0e, &["e"], false),
    (rdev::Key::KeyR, 0x0f, &["r"], false),
    (rdev::Key::KeyY, 0x10, &["y"], false),
    (rdev::Key::KeyT, 0x11, &["t"], false),
    (rdev::Key::Num1, 0x12, &["1"], false),
    (rdev::Key::Num2, 0x13, &["2"], false),
    (rdev::Key::Num3, 0x14, &["3"], false),
    (rdev::Key::Num4, 0x15, &["4"], false),
    (rdev::Key::Num6, 0x16, &["6"], false),
    (rdev::Key::Num5, 0x17, &["5"], false),
    (rdev::Key::Equal, 0x18, &["="], false),
    (rdev::Key::Num9, 0x19, &["9"], false),
    (rdev::Key::Num7, 0x1a, &["7"], false),
    (rdev::Key::Minus, 0x1b, &["-"], false),
    (rdev::Key::Num8, 0x1c, &["8"], false),
    (rdev::Key::Num0, 0x1d, &["0"], false),
    (rdev::Key::RightBracket, 0x1e, &["]"], false),
    (rdev::Key::KeyO, 0x1f, &["o"], false),
    (rdev::Key::KeyU, 0x20, &["u"], false),
    (rdev::Key::LeftBracket, 0x21, &["["], false),
    (rdev::Key::KeyI, 0x22, &["i"], false),
    (rdev::Key::KeyP, 0x23, &["p"], false),
    (rdev::Key::Return, 0x24, &["enter"], false),
    (rdev::Key::KeyL, 0x25, &["l"], false),
    (rdev::Key::KeyJ, 0x26, &["j"], false),
    (rdev::Key::Quote, 0x27, &["'"], false),
    (rdev::Key::KeyK, 0x28, &["k"], false),
    (rdev::Key::SemiColon, 0x29, &[";"], false),
    (rdev::Key::BackSlash, 0x2a, &["\\"], false),
    (rdev::Key::Comma, 0x2b, &[","], false),
    (rdev::Key::Slash, 0x2c, &["/"], false),
    (rdev::Key::KeyN, 0x2d, &["n"], false),
    (rdev::Key::KeyM, 0x2e, &["m"], false),
    (rdev::Key::Dot, 0x2f, &["."], false),
    (rdev::Key::Tab, 0x30, &["tab"], false),
    (rdev::Key::Space, 0x31, &["space"], false),
    (rdev::Key::BackQuote, 0x32, &["`"], false),
    (rdev::Key::Backspace, 0x33, &["backspace"], false),
    (rdev::Key::Escape, 0x35, &["esc"], false),
    (rdev::Key::MetaRight, 0x36, &["right windows", "windows"], false),
    (rdev::Key::MetaLeft, 0x37, &["left windows", "windows"], false),
    (rdev::Key::ShiftLeft, 0x38, &["left shift", "shift"], false),
    (rdev::Key::CapsLock, 0x39, &["caps lock"], false),
    (rdev::Key::Alt, 0x3a, &["left alt", "alt"], false),
    (rdev::Key::ControlLeft, 0x3b, &["left ctrl", "ctrl"], false),
    (rdev::Key::ShiftRight, 0x3c, &["right shift", "shift"], false),
    (rdev::Key::AltGr, 0x3d, &["right alt", "alt"], false),
    (rdev::Key::ControlRight, 0x3e, &["right ctrl", "ctrl"], false),
    (rdev::Key::KpDelete, 0x41, &["."], true),
    (rdev::Key::KpMultiply, 0x43, &["*"], true),
    (rdev::Key::KpPlus, 0x45, &["+"], true),
    (rdev::Key::NumLock, 0x47, &["num lock"], true),
    (rdev::Key::KpDivide, 0x4b, &["/"], true),
    (rdev::Key::KpReturn, 0x4c, &["enter"], true),
    (rdev::Key::KpMinus, 0x4e, &["-"], true),
    (rdev::Key::Kp0, 0x52, &["0"], true),
    (rdev::Key::Kp1, 0x53, &["1"], true),
    (rdev::Key::Kp2, 0x54, &["2"], true),
    (rdev::Key::Kp3, 0x55, &["3"], true),
    (rdev::Key::Kp4, 0x56, &["4"], true),
    (rdev::Key::Kp5, 0x57, &["5"], true),
    (rdev::Key::Kp6, 0x58, &["6"], true),
    (rdev::Key::Kp7, 0x59, &["7"], true),
    (rdev::Key::Kp8, 0x5b, &["8"], true),
    (rdev::Key::Kp9, 0x5c, &["9"], true),
    (rdev::Key::F5, 0x60, &["f5"], false),
    (rdev::Key::F6, 0x61, &["f6"], false),
    (rdev::Key::F7, 0x62, &["f7"], false),
    (rdev::Key::F3, 0x63, &["f3"], false),
    (rdev::Key::F8, 0x64, &["f8"], false),
    (rdev::Key::F9, 0x65, &["f9"], false),
    (rdev::Key::F11, 0x67, &["f11"], false),
    (rdev::Key::F10, 0x6d, &["f10"], false),
    (rdev::Key::F12, 0x6f, &["f12"], false),
    (rdev::Key::Home, 0x73, &["home"], false),
    (rdev::Key::PageUp, 0x74, &["page up"], false),
    (rdev::Key::Delete, 0x75, &["delete"], false),
    (rdev::Key::F4, 0x76, &["f4"], false),
    (rdev::Key::End, 0x77, &["end"], false),
    (rdev::Key::F2, 0x78, &["f2"], false),
    (rdev::Key::PageDown, 0x79, &["page down"], false),
    (rdev::Key::F1, 0x7a, &["f1"], false),
    (rdev::Key::LeftArrow, 0x7b, &["left"], false),
    (rdev::Key::RightArrow, 0x7c, &["right"], false),
    (rdev::Key::DownArrow, 0x7d, &["down"], false),
    (rdev::Key::UpArrow, 0x7e, &["up"], false),
];

fn scan_code_of(key: rdev::Key) -> Option<(ScanCode, &'static str, bool)> {
    KEYS.iter()
        .find(|(k, _, _, _)| *k == key)
        .map(|(_, code, names, keypad)| (*code, names[0], *keypad))
}

fn key_of(scan_code: ScanCode) -> Option<rdev::Key> {
    KEYS.iter()
        .find(|(_, code, _, _)| *code == scan_code)
        .map(|(key, _, _, _)| *key)
}

/// macOS [`Backend`] over rdev.
pub struct MacosBackend {
    running: Arc<AtomicBool>,
}

impl MacosBackend {
    pub fn new() -> Self {
        MacosBackend {
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for MacosBackend {
    fn default() -> Self {
        MacosBackend::new()
    }
}

impl Backend for MacosBackend {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn mapping(&self) -> Vec<(ScanCode, String, bool)> {
        let mut entries = Vec::new();
        for (_, code, names, keypad) in KEYS {
            for name in *names {
                entries.push((*code, name.to_string(), *keypad));
            }
        }
        entries
    }

    fn install_hook(&self, mut on_event: EventCallback) -> Result<HookGuard> {
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let thread_running = Arc::clone(&self.running);

        thread::spawn(move || {
            let callback = move |rdev_event: rdev::Event| {
                if !thread_running.load(Ordering::Relaxed) {
                    return;
                }
                let (key, event_type) = match rdev_event.event_type {
                    RdevEventType::KeyPress(key) => (key, EventType::Down),
                    RdevEventType::KeyRelease(key) => (key, EventType::Up),
                    _ => return,
                };
                let Some((scan_code, name, is_keypad)) = scan_code_of(key) else {
                    return;
                };
                let time = rdev_event
                    .time
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);

                let mut event = Event::new(event_type, scan_code, Some(name.to_string()), time);
                event.is_keypad = is_keypad;
                // rdev cannot withhold events; the decision is advisory.
                let _ = on_event(event);
            };

            if let Err(e) = listen(callback) {
                log::error!("Error listening to keyboard events: {:?}", e);
            }
        });

        let guard_running = running;
        Ok(HookGuard::new(move || {
            guard_running.store(false, Ordering::SeqCst);
        }))
    }

    fn press(&self, scan_code: ScanCode) -> Result<()> {
        let key = key_of(scan_code)
            .ok_or_else(|| Error::Injection(format!("no key for scan code {}", scan_code)))?;
        simulate(&RdevEventType::KeyPress(key))
            .map_err(|_| Error::Injection(format!("simulate press of {} failed", scan_code)))
    }

    fn release(&self, scan_code: ScanCode) -> Result<()> {
        let key = key_of(scan_code)
            .ok_or_else(|| Error::Injection(format!("no key for scan code {}", scan_code)))?;
        simulate(&RdevEventType::KeyRelease(key))
            .map_err(|_| Error::Injection(format!("simulate release of {} failed", scan_code)))
    }

    fn type_unicode(&self, ch: char) -> Result<()> {
        Err(Error::Injection(format!(
            "no unicode typing path for {:?} on this backend",
            ch
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_table_round_trips() {
        for (key, code, _, _) in KEYS {
            assert_eq!(key_of(*code), Some(*key));
            assert_eq!(scan_code_of(*key).map(|(c, _, _)| c), Some(*code));
        }
    }

    #[test]
    fn test_sided_modifiers_carry_base_names() {
        let backend = MacosBackend::new();
        let mapping = backend.mapping();
        assert!(mapping
            .iter()
            .any(|(code, name, _)| *code == 0x3b && name == "ctrl"));
        assert!(mapping
            .iter()
            .any(|(code, name, _)| *code == 0x3b && name == "left ctrl"));
    }
}
