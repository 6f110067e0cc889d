//! A deterministic in-memory backend for tests and headless runs.
//!
//! The fake keeps a scripted name table, records every synthesized event in
//! an injection log, and loops synthesized events back through the installed
//! hook the way a real OS does. Feeding events and reading the log are fully
//! deterministic, which is what the engine's scenario tests are built on.

use std::sync::{Arc, Mutex};

use crate::backend::{Backend, Decision, EventCallback, HookGuard};
use crate::error::{Error, Result};
use crate::event::{Event, EventType, ScanCode};

/// One synthesized action as seen by the fake OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injected {
    Press(ScanCode),
    Release(ScanCode),
    Unicode(char),
}

struct FakeInner {
    mapping: Vec<(ScanCode, String, bool)>,
    hook: Mutex<Option<EventCallback>>,
    injected: Mutex<Vec<Injected>>,
    clock: Mutex<f64>,
    fail_init: bool,
    tags_injected: bool,
}

/// Deterministic [`Backend`]: events are fed by the test, synthesized
/// events are logged and looped back through the hook.
#[derive(Clone)]
pub struct FakeBackend {
    inner: Arc<FakeInner>,
}

impl FakeBackend {
    /// A fake with a small US-layout mapping covering the keys the tests
    /// and examples use. Scan codes follow the common set 1 layout.
    pub fn new() -> Self {
        FakeBackend::with_mapping(default_mapping())
    }

    pub fn with_mapping(mapping: Vec<(ScanCode, String, bool)>) -> Self {
        FakeBackend {
            inner: Arc::new(FakeInner {
                mapping,
                hook: Mutex::new(None),
                injected: Mutex::new(Vec::new()),
                clock: Mutex::new(0.0),
                fail_init: false,
                tags_injected: true,
            }),
        }
    }

    /// A fake whose `init` fails, for exercising the unavailable-backend
    /// path.
    pub fn failing() -> Self {
        FakeBackend {
            inner: Arc::new(FakeInner {
                mapping: Vec::new(),
                hook: Mutex::new(None),
                injected: Mutex::new(Vec::new()),
                clock: Mutex::new(0.0),
                fail_init: true,
                tags_injected: true,
            }),
        }
    }

    /// Feeds one "physical" event through the installed hook at the given
    /// time, returning the hook's suppression decision. The event is named
    /// through the fake's own mapping, like a real backend would.
    pub fn feed_at(&self, event_type: EventType, scan_code: ScanCode, time: f64) -> Decision {
        *self.inner.clock.lock().unwrap() = time;
        let mut event = Event::new(event_type, scan_code, self.name_of(scan_code), time);
        event.is_keypad = self.keypad_of(scan_code);
        self.run_hook(event)
    }

    /// Feeds an event at the fake's current clock, advancing it slightly so
    /// consecutive events stay ordered.
    pub fn feed(&self, event_type: EventType, scan_code: ScanCode) -> Decision {
        let time = {
            let mut clock = self.inner.clock.lock().unwrap();
            *clock += 0.001;
            *clock
        };
        self.feed_at(event_type, scan_code, time)
    }

    /// Everything synthesized so far, in order.
    pub fn injections(&self) -> Vec<Injected> {
        self.inner.injected.lock().unwrap().clone()
    }

    pub fn clear_injections(&self) {
        self.inner.injected.lock().unwrap().clear();
    }

    fn name_of(&self, scan_code: ScanCode) -> Option<String> {
        self.inner
            .mapping
            .iter()
            .find(|(code, _, _)| *code == scan_code)
            .map(|(_, name, _)| name.clone())
    }

    fn keypad_of(&self, scan_code: ScanCode) -> bool {
        self.inner
            .mapping
            .iter()
            .find(|(code, _, _)| *code == scan_code)
            .map(|(_, _, keypad)| *keypad)
            .unwrap_or(false)
    }

    fn run_hook(&self, event: Event) -> Decision {
        let mut hook = self.inner.hook.lock().unwrap();
        match hook.as_mut() {
            Some(callback) => callback(event),
            None => Decision::Allow,
        }
    }

    fn synthesize(&self, event_type: EventType, scan_code: ScanCode) {
        let time = {
            let mut clock = self.inner.clock.lock().unwrap();
            *clock += 0.001;
            *clock
        };
        let mut event = Event::new(event_type, scan_code, self.name_of(scan_code), time);
        event.is_keypad = self.keypad_of(scan_code);
        event.injected = self.inner.tags_injected;
        self.run_hook(event);
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        FakeBackend::new()
    }
}

impl Backend for FakeBackend {
    fn init(&self) -> Result<()> {
        if self.inner.fail_init {
            Err(Error::BackendUnavailable("fake backend set to fail".to_string()))
        } else {
            Ok(())
        }
    }

    fn mapping(&self) -> Vec<(ScanCode, String, bool)> {
        self.inner.mapping.clone()
    }

    fn install_hook(&self, on_event: EventCallback) -> Result<HookGuard> {
        let mut hook = self.inner.hook.lock().unwrap();
        if hook.is_some() {
            return Err(Error::BackendUnavailable(
                "hook already installed".to_string(),
            ));
        }
        *hook = Some(on_event);

        let inner = Arc::clone(&self.inner);
        Ok(HookGuard::new(move || {
            inner.hook.lock().unwrap().take();
        }))
    }

    fn press(&self, scan_code: ScanCode) -> Result<()> {
        self.inner
            .injected
            .lock()
            .unwrap()
            .push(Injected::Press(scan_code));
        self.synthesize(EventType::Down, scan_code);
        Ok(())
    }

    fn release(&self, scan_code: ScanCode) -> Result<()> {
        self.inner
            .injected
            .lock()
            .unwrap()
            .push(Injected::Release(scan_code));
        self.synthesize(EventType::Up, scan_code);
        Ok(())
    }

    fn type_unicode(&self, ch: char) -> Result<()> {
        self.inner.injected.lock().unwrap().push(Injected::Unicode(ch));
        Ok(())
    }

    fn tags_injected(&self) -> bool {
        self.inner.tags_injected
    }
}

/// Scan codes follow the classic set 1 values so tests read naturally
/// (29 = ctrl, 42 = shift, 57 = space).
fn default_mapping() -> Vec<(ScanCode, String, bool)> {
    let mut entries: Vec<(ScanCode, String, bool)> = vec![
        (1, "esc".into(), false),
        (14, "backspace".into(), false),
        (15, "tab".into(), false),
        (28, "enter".into(), false),
        (29, "left ctrl".into(), false),
        (29, "ctrl".into(), false),
        (97, "right ctrl".into(), false),
        (97, "ctrl".into(), false),
        (42, "left shift".into(), false),
        (42, "shift".into(), false),
        (54, "right shift".into(), false),
        (54, "shift".into(), false),
        (56, "left alt".into(), false),
        (56, "alt".into(), false),
        (100, "right alt".into(), false),
        (100, "alt".into(), false),
        (125, "windows".into(), false),
        (57, "space".into(), false),
        (58, "caps lock".into(), false),
        (12, "-".into(), false),
        (13, "=".into(), false),
        (26, "[".into(), false),
        (27, "]".into(), false),
        (39, ";".into(), false),
        (40, "'".into(), false),
        (41, "`".into(), false),
        (43, "\\".into(), false),
        (51, ",".into(), false),
        (52, ".".into(), false),
        (53, "/".into(), false),
        (102, "home".into(), false),
        (104, "page up".into(), false),
        (107, "end".into(), false),
        (109, "page down".into(), false),
        (111, "delete".into(), false),
        (110, "insert".into(), false),
    ];

    // Digits 1..9,0 on codes 2..11.
    for (i, ch) in "1234567890".chars().enumerate() {
        entries.push((2 + i as ScanCode, ch.to_string(), false));
    }

    // Letters, set 1 order.
    for (code, ch) in [
        (16, 'q'),
        (17, 'w'),
        (18, 'e'),
        (19, 'r'),
        (20, 't'),
        (21, 'y'),
        (22, 'u'),
        (23, 'i'),
        (24, 'o'),
        (25, 'p'),
        (30, 'a'),
        (31, 's'),
        (32, 'd'),
        (33, 'f'),
        (34, 'g'),
        (35, 'h'),
        (36, 'j'),
        (37, 'k'),
        (38, 'l'),
        (44, 'z'),
        (45, 'x'),
        (46, 'c'),
        (47, 'v'),
        (48, 'b'),
        (49, 'n'),
        (50, 'm'),
    ] {
        entries.push((code, ch.to_string(), false));
    }

    // Keypad keys that double as navigation keys.
    entries.push((71, "7".into(), true));
    entries.push((71, "home".into(), true));
    entries.push((73, "9".into(), true));
    entries.push((73, "page up".into(), true));

    entries
}
