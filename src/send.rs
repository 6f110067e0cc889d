//! Key synthesis: pressing, releasing and typing through the backend.
//!
//! All synthesis runs inside an injection scope so the hub can tag the
//! resulting events on backends that cannot tag them natively.

use std::thread;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::Result;
use crate::event::ScanCode;
use crate::hotkey::Hotkey;
use crate::key::is_modifier;

/// Knobs for [`Engine::write_with`].
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Seconds to sleep between characters; zero or less means no sleep.
    pub delay: f64,
    /// Re-press the keys that were held before the write.
    pub restore_state_after: bool,
    /// Force the platform Unicode fallback for every character.
    pub exact: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            delay: 0.0,
            restore_state_after: true,
            exact: false,
        }
    }
}

impl Engine {
    /// Presses and releases a combination, step by step. Within a step keys
    /// go down in order (the trailing key last) and come back up in reverse
    /// order.
    pub fn send(&self, spec: &str) -> Result<()> {
        let hotkey = self.parse(spec)?;
        self.send_parsed(&hotkey, true, true)
    }

    /// Presses and holds a combination.
    pub fn press(&self, spec: &str) -> Result<()> {
        let hotkey = self.parse(spec)?;
        self.send_parsed(&hotkey, true, false)
    }

    /// Releases a held combination.
    pub fn release(&self, spec: &str) -> Result<()> {
        let hotkey = self.parse(spec)?;
        self.send_parsed(&hotkey, false, true)
    }

    /// The walk behind `send`/`press`/`release`. Each key class contributes
    /// its first scan code, a stable choice across calls.
    pub fn send_parsed(&self, hotkey: &Hotkey, do_press: bool, do_release: bool) -> Result<()> {
        let _scope = self.inner.hub.injection_scope();
        for step in &hotkey.steps {
            if do_press {
                for class in &step.keys {
                    self.inner.backend.press(class.scan_codes[0])?;
                }
            }
            if do_release {
                for class in step.keys.iter().rev() {
                    self.inner.backend.release(class.scan_codes[0])?;
                }
            }
        }
        Ok(())
    }

    /// Types text by synthesizing keystrokes, releasing any held keys first
    /// so they cannot corrupt the output, and restoring them afterwards.
    /// Characters the layout cannot produce go through the backend's
    /// Unicode fallback.
    pub fn write(&self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::default())
    }

    pub fn write_with(&self, text: &str, options: WriteOptions) -> Result<()> {
        let stashed = self.stash_state()?;
        let table = self.name_table();
        let shift_code = table.scan_codes("shift").first().copied();

        {
            let _scope = self.inner.hub.injection_scope();
            for ch in text.chars() {
                let keystroke = if options.exact {
                    None
                } else {
                    table.to_keystroke(ch)
                };

                match keystroke {
                    Some(keystroke) => {
                        // A key already physically down would swallow the
                        // synthetic press.
                        if self.inner.hub.is_pressed(keystroke.scan_code) {
                            self.inner.backend.release(keystroke.scan_code)?;
                        }
                        let shift = if keystroke.shift { shift_code } else { None };
                        if let Some(shift) = shift {
                            self.inner.backend.press(shift)?;
                        }
                        if keystroke.shift && shift.is_none() {
                            // No shift key on this layout; fall back.
                            self.inner.backend.type_unicode(ch)?;
                        } else {
                            self.inner.backend.press(keystroke.scan_code)?;
                            self.inner.backend.release(keystroke.scan_code)?;
                        }
                        if let Some(shift) = shift {
                            self.inner.backend.release(shift)?;
                        }
                    }
                    None => self.inner.backend.type_unicode(ch)?,
                }

                if options.delay > 0.0 {
                    thread::sleep(Duration::from_secs_f64(options.delay));
                }
            }
        }

        if options.restore_state_after {
            self.restore_state(&stashed)?;
        }
        Ok(())
    }

    /// Releases every currently held key, modifiers first, and returns the
    /// sorted list of scan codes that were held.
    pub fn stash_state(&self) -> Result<Vec<ScanCode>> {
        let stashed = self.inner.hub.pressed_codes();
        let table = self.name_table();
        let _scope = self.inner.hub.injection_scope();

        let (modifiers, others): (Vec<ScanCode>, Vec<ScanCode>) = stashed
            .iter()
            .copied()
            .partition(|&code| table.names(code).iter().any(|name| is_modifier(name)));
        for code in modifiers.into_iter().chain(others) {
            self.inner.backend.release(code)?;
        }
        Ok(stashed)
    }

    /// Ensures exactly the given scan codes are held: releases extras,
    /// presses the missing ones in reverse order of the list.
    pub fn restore_state(&self, scan_codes: &[ScanCode]) -> Result<()> {
        let _scope = self.inner.hub.injection_scope();
        let current = self.inner.hub.pressed_set();

        for &code in current.iter() {
            if !scan_codes.contains(&code) {
                self.inner.backend.release(code)?;
            }
        }
        for &code in scan_codes.iter().rev() {
            if !current.contains(&code) {
                self.inner.backend.press(code)?;
            }
        }
        Ok(())
    }

    /// Like [`Engine::restore_state`] but touches modifier keys only,
    /// leaving other held keys as they are.
    pub fn restore_modifiers(&self, scan_codes: &[ScanCode]) -> Result<()> {
        let table = self.name_table();
        let is_mod =
            |code: ScanCode| table.names(code).iter().any(|name| is_modifier(name));

        let _scope = self.inner.hub.injection_scope();
        let current = self.inner.hub.pressed_set();

        for &code in current.iter() {
            if is_mod(code) && !scan_codes.contains(&code) {
                self.inner.backend.release(code)?;
            }
        }
        for &code in scan_codes.iter().rev() {
            if is_mod(code) && !current.contains(&code) {
                self.inner.backend.press(code)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Decision;
    use crate::event::EventType;
    use crate::testing::{FakeBackend, Injected};

    fn engine_with_fake() -> (Engine, FakeBackend) {
        let backend = FakeBackend::new();
        (Engine::new(backend.clone()), backend)
    }

    #[test]
    fn test_send_presses_then_releases_in_reverse() {
        let (engine, backend) = engine_with_fake();
        engine.send("ctrl+a").unwrap();
        assert_eq!(
            backend.injections(),
            vec![
                Injected::Press(29),
                Injected::Press(30),
                Injected::Release(30),
                Injected::Release(29),
            ]
        );
    }

    #[test]
    fn test_press_and_release_split_the_walk() {
        let (engine, backend) = engine_with_fake();
        engine.press("shift").unwrap();
        engine.release("shift").unwrap();
        assert_eq!(
            backend.injections(),
            vec![Injected::Press(42), Injected::Release(42)]
        );
    }

    #[test]
    fn test_send_multi_step() {
        let (engine, backend) = engine_with_fake();
        engine.send("ctrl+a, b").unwrap();
        assert_eq!(
            backend.injections(),
            vec![
                Injected::Press(29),
                Injected::Press(30),
                Injected::Release(30),
                Injected::Release(29),
                Injected::Press(48),
                Injected::Release(48),
            ]
        );
    }

    #[test]
    fn test_write_plain_text() {
        let (engine, backend) = engine_with_fake();
        engine.write("hi").unwrap();
        assert_eq!(
            backend.injections(),
            vec![
                Injected::Press(35),
                Injected::Release(35),
                Injected::Press(23),
                Injected::Release(23),
            ]
        );
    }

    #[test]
    fn test_write_uppercase_uses_shift() {
        let (engine, backend) = engine_with_fake();
        engine.write("Hi").unwrap();
        assert_eq!(
            backend.injections(),
            vec![
                Injected::Press(42),
                Injected::Press(35),
                Injected::Release(35),
                Injected::Release(42),
                Injected::Press(23),
                Injected::Release(23),
            ]
        );
    }

    #[test]
    fn test_write_falls_back_to_unicode() {
        let (engine, backend) = engine_with_fake();
        engine.write("™").unwrap();
        assert_eq!(backend.injections(), vec![Injected::Unicode('™')]);
    }

    #[test]
    fn test_write_exact_forces_unicode() {
        let (engine, backend) = engine_with_fake();
        engine
            .write_with(
                "hi",
                WriteOptions {
                    exact: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            backend.injections(),
            vec![Injected::Unicode('h'), Injected::Unicode('i')]
        );
    }

    #[test]
    fn test_write_restores_held_keys() {
        let (engine, backend) = engine_with_fake();
        engine.hook(false, |_| Decision::Allow).unwrap();
        backend.feed(EventType::Down, 29);
        assert!(engine.is_pressed("ctrl").unwrap());

        engine.write("hi").unwrap();

        assert!(engine.is_pressed("ctrl").unwrap());
        let injections = backend.injections();
        // Ctrl released before the text and pressed again after it.
        assert_eq!(injections.first(), Some(&Injected::Release(29)));
        assert_eq!(injections.last(), Some(&Injected::Press(29)));
    }

    #[test]
    fn test_stash_and_restore_round_trip() {
        let (engine, backend) = engine_with_fake();
        engine.hook(false, |_| Decision::Allow).unwrap();
        backend.feed(EventType::Down, 29);
        backend.feed(EventType::Down, 30);

        let stashed = engine.stash_state().unwrap();
        assert_eq!(stashed, vec![29, 30]);
        assert!(!engine.is_pressed("ctrl").unwrap());

        engine.restore_state(&stashed).unwrap();
        assert!(engine.is_pressed("ctrl").unwrap());
        assert!(engine.is_pressed("a").unwrap());
    }

    #[test]
    fn test_stash_releases_modifiers_first() {
        let (engine, backend) = engine_with_fake();
        engine.hook(false, |_| Decision::Allow).unwrap();
        // 'a' sorts before ctrl's code, so plain sorting would release it
        // first; the modifier must still go first.
        backend.feed(EventType::Down, 30);
        backend.feed(EventType::Down, 42);
        backend.clear_injections();

        engine.stash_state().unwrap();
        assert_eq!(
            backend.injections(),
            vec![Injected::Release(42), Injected::Release(30)]
        );
    }

    #[test]
    fn test_restore_modifiers_leaves_other_keys() {
        let (engine, backend) = engine_with_fake();
        engine.hook(false, |_| Decision::Allow).unwrap();
        backend.feed(EventType::Down, 29);
        backend.feed(EventType::Down, 30);
        let stashed = engine.stash_state().unwrap();

        engine.restore_modifiers(&stashed).unwrap();
        assert!(engine.is_pressed("ctrl").unwrap());
        assert!(!engine.is_pressed("a").unwrap());
    }

    #[test]
    fn test_injected_events_are_tagged() {
        let (engine, _backend) = engine_with_fake();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_hook = std::sync::Arc::clone(&seen);
        engine
            .hook(false, move |event| {
                seen_hook.lock().unwrap().push(event.injected);
                Decision::Allow
            })
            .unwrap();

        engine.send("a").unwrap();
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&tagged| tagged));
    }

    #[test]
    fn test_injection_errors_bubble() {
        // A backend with no mapping cannot resolve "a" at parse time, which
        // is the earliest the send path can fail.
        let backend = FakeBackend::with_mapping(Vec::new());
        let engine = Engine::new(backend);
        assert!(engine.send("a").is_err());
    }
}
