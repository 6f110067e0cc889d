//! Linux backend using evdev.
//!
//! Reads `/dev/input/event*` devices directly, which works on both X11 and
//! Wayland but requires the user to be in the `input` group or root.
//! Injection goes through a uinput virtual keyboard. Event suppression is
//! not available on this backend: other applications read the same device
//! nodes, so the hook's decisions are observed but cannot be enforced.

use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, UNIX_EPOCH};

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, InputEvent, Key};
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::backend::{Backend, EventCallback, HookGuard};
use crate::error::{Error, Result};
use crate::event::{Event, EventType, ScanCode};

/// Name under which the injection device registers. Injected events flow
/// back through the read loop like any other keyboard's, in injection
/// order.
const VIRTUAL_DEVICE_NAME: &str = "keywatch virtual keyboard";

/// Minimum interval between keyboard rescans after a read error.
const RESCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Find all keyboard devices in /dev/input.
pub fn find_keyboards() -> Result<Vec<Device>> {
    let mut keyboards = Vec::new();

    let entries = std::fs::read_dir("/dev/input")
        .map_err(|e| Error::BackendUnavailable(format!("cannot read /dev/input: {}", e)))?;
    for entry in entries.flatten() {
        let path = entry.path();

        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        if let Ok(device) = Device::open(&path) {
            // Check if device supports keyboard keys
            if device
                .supported_keys()
                .map(|keys| keys.contains(Key::KEY_A))
                .unwrap_or(false)
            {
                log::debug!("Found keyboard: {:?} at {:?}", device.name(), path);
                keyboards.push(device);
            }
        }
    }

    if keyboards.is_empty() {
        Err(Error::BackendUnavailable(
            "No keyboards found. Make sure you're in the 'input' group or running as root."
                .to_string(),
        ))
    } else {
        Ok(keyboards)
    }
}

/// Set non-blocking mode on keyboard devices.
fn set_nonblocking(keyboards: &[Device]) -> Result<()> {
    for device in keyboards {
        let fd = device.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL)
            .map_err(|e| Error::BackendUnavailable(format!("failed to get fd flags: {}", e)))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags))
            .map_err(|e| Error::BackendUnavailable(format!("failed to set non-blocking: {}", e)))?;
    }
    Ok(())
}

/// Linux [`Backend`] over evdev + uinput.
pub struct LinuxBackend {
    running: Arc<AtomicBool>,
    uinput: Mutex<Option<VirtualDevice>>,
}

impl LinuxBackend {
    pub fn new() -> Self {
        LinuxBackend {
            running: Arc::new(AtomicBool::new(false)),
            uinput: Mutex::new(None),
        }
    }

    fn with_uinput<T>(&self, f: impl FnOnce(&mut VirtualDevice) -> std::io::Result<T>) -> Result<T> {
        let mut guard = self.uinput.lock().unwrap();
        if guard.is_none() {
            let mut keys = AttributeSet::<Key>::new();
            for code in 0..=0x2ff_u16 {
                keys.insert(Key::new(code));
            }
            let device = VirtualDeviceBuilder::new()
                .and_then(|b| b.name(VIRTUAL_DEVICE_NAME).with_keys(&keys))
                .and_then(|b| b.build())
                .map_err(|e| {
                    Error::Injection(format!("cannot create uinput device: {}", e))
                })?;
            *guard = Some(device);
        }
        f(guard.as_mut().expect("uinput device just created"))
            .map_err(|e| Error::Injection(format!("uinput write failed: {}", e)))
    }

    fn emit_key(&self, scan_code: ScanCode, value: i32) -> Result<()> {
        self.with_uinput(|device| {
            let event = InputEvent::new(evdev::EventType::KEY, scan_code as u16, value);
            device.emit(&[event])
        })
    }
}

impl Default for LinuxBackend {
    fn default() -> Self {
        LinuxBackend::new()
    }
}

impl Backend for LinuxBackend {
    fn init(&self) -> Result<()> {
        // Surfaces missing privileges before any hook or injection work.
        find_keyboards().map(|_| ())
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.uinput.lock().unwrap().take();
    }

    fn mapping(&self) -> Vec<(ScanCode, String, bool)> {
        let mut entries = Vec::new();
        for code in 0..=0x2ff_u16 {
            for (name, is_keypad) in key_names(Key::new(code)) {
                entries.push((code as ScanCode, name, is_keypad));
            }
        }
        entries
    }

    fn install_hook(&self, mut on_event: EventCallback) -> Result<HookGuard> {
        let keyboards = find_keyboards()?;
        set_nonblocking(&keyboards)?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let thread_running = Arc::clone(&self.running);

        thread::spawn(move || {
            let mut keyboards = keyboards;
            let mut last_rescan = Instant::now();
            let mut had_error = false;

            while thread_running.load(Ordering::Relaxed) {
                // Rescan after an error once the interval passed, so an
                // unplugged USB keyboard picks back up on reconnect.
                if had_error && last_rescan.elapsed() >= RESCAN_INTERVAL {
                    log::info!("Keyboard error detected, rescanning devices...");
                    match find_keyboards() {
                        Ok(new_keyboards) => {
                            log::info!(
                                "Keyboards reconnected: found {} device(s)",
                                new_keyboards.len()
                            );
                            if set_nonblocking(&new_keyboards).is_ok() {
                                keyboards = new_keyboards;
                                had_error = false;
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to rescan keyboards: {}", e);
                        }
                    }
                    last_rescan = Instant::now();
                }

                let mut any_error = false;

                for device in keyboards.iter_mut() {
                    match device.fetch_events() {
                        Ok(events) => {
                            for input in events {
                                if let evdev::InputEventKind::Key(key) = input.kind() {
                                    // 0 = up, 1 = down, 2 = autorepeat.
                                    let event_type = if input.value() == 0 {
                                        EventType::Up
                                    } else {
                                        EventType::Down
                                    };
                                    let scan_code = key.code() as ScanCode;
                                    let time = input
                                        .timestamp()
                                        .duration_since(UNIX_EPOCH)
                                        .map(|d| d.as_secs_f64())
                                        .unwrap_or(0.0);

                                    let mut event = Event::new(
                                        event_type,
                                        scan_code,
                                        key_names(key).first().map(|(n, _)| n.clone()),
                                        time,
                                    );
                                    event.is_keypad = key_names(key)
                                        .first()
                                        .map(|(_, keypad)| *keypad)
                                        .unwrap_or(false);

                                    // Suppression needs exclusive device
                                    // grabs, which would starve every other
                                    // reader; the decision is advisory here.
                                    let _ = on_event(event);
                                }
                            }
                        }
                        Err(e) => {
                            // EAGAIN/EWOULDBLOCK is expected for non-blocking reads
                            if e.raw_os_error() != Some(libc::EAGAIN)
                                && e.raw_os_error() != Some(libc::EWOULDBLOCK)
                            {
                                log::debug!("Keyboard read error: {}", e);
                                any_error = true;
                            }
                        }
                    }
                }

                if any_error {
                    had_error = true;
                }

                thread::sleep(Duration::from_millis(10));
            }
        });

        let guard_running = running;
        Ok(HookGuard::new(move || {
            guard_running.store(false, Ordering::SeqCst);
        }))
    }

    fn press(&self, scan_code: ScanCode) -> Result<()> {
        self.emit_key(scan_code, 1)
    }

    fn release(&self, scan_code: ScanCode) -> Result<()> {
        self.emit_key(scan_code, 0)
    }

    /// Types the IBus-style compose sequence ctrl+shift+u, the hex code
    /// point, space. Whether it lands depends on the input method of the
    /// focused application.
    fn type_unicode(&self, ch: char) -> Result<()> {
        let tap = |key: Key| -> Result<()> {
            self.emit_key(key.code() as ScanCode, 1)?;
            self.emit_key(key.code() as ScanCode, 0)
        };

        self.emit_key(Key::KEY_LEFTCTRL.code() as ScanCode, 1)?;
        self.emit_key(Key::KEY_LEFTSHIFT.code() as ScanCode, 1)?;
        tap(Key::KEY_U)?;
        self.emit_key(Key::KEY_LEFTSHIFT.code() as ScanCode, 0)?;
        self.emit_key(Key::KEY_LEFTCTRL.code() as ScanCode, 0)?;

        for digit in format!("{:x}", ch as u32).chars() {
            tap(hex_key(digit))?;
        }
        tap(Key::KEY_SPACE)
    }
}

fn hex_key(digit: char) -> Key {
    match digit {
        '0' => Key::KEY_0,
        '1' => Key::KEY_1,
        '2' => Key::KEY_2,
        '3' => Key::KEY_3,
        '4' => Key::KEY_4,
        '5' => Key::KEY_5,
        '6' => Key::KEY_6,
        '7' => Key::KEY_7,
        '8' => Key::KEY_8,
        '9' => Key::KEY_9,
        'a' => Key::KEY_A,
        'b' => Key::KEY_B,
        'c' => Key::KEY_C,
        'd' => Key::KEY_D,
        'e' => Key::KEY_E,
        _ => Key::KEY_F,
    }
}

/// The canonical names for an evdev key, most specific first. Sided
/// modifiers also register their unsided name so either physical key
/// satisfies e.g. "ctrl".
fn key_names(key: Key) -> Vec<(String, bool)> {
    let single = |name: &str| vec![(name.to_string(), false)];
    let sided = |side: &str, base: &str| {
        vec![
            (format!("{} {}", side, base), false),
            (base.to_string(), false),
        ]
    };
    let keypad = |name: &str| vec![(format!("{} (numeric pad)", name), true)];

    match key {
        Key::KEY_LEFTCTRL => sided("left", "ctrl"),
        Key::KEY_RIGHTCTRL => sided("right", "ctrl"),
        Key::KEY_LEFTSHIFT => sided("left", "shift"),
        Key::KEY_RIGHTSHIFT => sided("right", "shift"),
        Key::KEY_LEFTALT => sided("left", "alt"),
        Key::KEY_RIGHTALT => vec![
            ("right alt".to_string(), false),
            ("alt gr".to_string(), false),
            ("alt".to_string(), false),
        ],
        Key::KEY_LEFTMETA => sided("left", "windows"),
        Key::KEY_RIGHTMETA => sided("right", "windows"),
        Key::KEY_ESC => single("esc"),
        Key::KEY_ENTER => single("enter"),
        Key::KEY_BACKSPACE => single("backspace"),
        Key::KEY_TAB => single("tab"),
        Key::KEY_SPACE => single("space"),
        Key::KEY_CAPSLOCK => single("caps lock"),
        Key::KEY_NUMLOCK => single("num lock"),
        Key::KEY_SCROLLLOCK => single("scroll lock"),
        Key::KEY_SYSRQ => single("print screen"),
        Key::KEY_PAUSE => single("pause"),
        Key::KEY_INSERT => single("insert"),
        Key::KEY_DELETE => single("delete"),
        Key::KEY_HOME => single("home"),
        Key::KEY_END => single("end"),
        Key::KEY_PAGEUP => single("page up"),
        Key::KEY_PAGEDOWN => single("page down"),
        Key::KEY_UP => single("up"),
        Key::KEY_DOWN => single("down"),
        Key::KEY_LEFT => single("left"),
        Key::KEY_RIGHT => single("right"),
        Key::KEY_COMPOSE => single("menu"),
        Key::KEY_MINUS => single("-"),
        Key::KEY_EQUAL => single("="),
        Key::KEY_LEFTBRACE => single("["),
        Key::KEY_RIGHTBRACE => single("]"),
        Key::KEY_SEMICOLON => single(";"),
        Key::KEY_APOSTROPHE => single("'"),
        Key::KEY_GRAVE => single("`"),
        Key::KEY_BACKSLASH => single("\\"),
        Key::KEY_COMMA => single(","),
        Key::KEY_DOT => single("."),
        Key::KEY_SLASH => single("/"),
        Key::KEY_KPASTERISK => keypad("*"),
        Key::KEY_KPMINUS => keypad("-"),
        Key::KEY_KPPLUS => keypad("+"),
        Key::KEY_KPDOT => keypad("."),
        Key::KEY_KPSLASH => keypad("/"),
        Key::KEY_KPENTER => keypad("enter"),
        Key::KEY_KP0 => keypad("0"),
        Key::KEY_KP1 => keypad("1"),
        Key::KEY_KP2 => keypad("2"),
        Key::KEY_KP3 => keypad("3"),
        Key::KEY_KP4 => keypad("4"),
        Key::KEY_KP5 => keypad("5"),
        Key::KEY_KP6 => keypad("6"),
        Key::KEY_KP7 => keypad("7"),
        Key::KEY_KP8 => keypad("8"),
        Key::KEY_KP9 => keypad("9"),
        other => {
            // KEY_A -> "a", KEY_F5 -> "f5", KEY_1 -> "1". Anything without
            // a KEY_ prefix is not a keyboard key.
            let debug = format!("{:?}", other);
            match debug.strip_prefix("KEY_") {
                Some(rest) if rest.len() <= 3 => vec![(rest.to_lowercase(), false)],
                _ => Vec::new(),
            }
        }
    }
}
