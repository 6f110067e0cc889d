//! The engine: one owned object tying the backend, the dispatch hub and the
//! registration tables together.
//!
//! Library users normally go through the process-wide free functions in the
//! crate root; embedding an [`Engine`] directly is for tests and for hosts
//! that bring their own backend.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::Duration;

use log::warn;

use crate::backend::{Backend, Decision};
use crate::error::{Error, Result};
use crate::event::{Event, EventType, ScanCode};
use crate::hotkey::{hotkey_name, parse_hotkey, Hotkey, KeyClass, Step};
use crate::hub::{spawn_user_callback, HookId, Hub};
use crate::key::{normalize_name, NameTable};
use crate::matcher::{HotkeyOptions, MatchState};

pub(crate) struct EngineInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) hub: Hub,
    /// Hook ids owned by `add_hotkey`-style registrations, for
    /// `clear_all_hotkeys`.
    pub(crate) hotkey_ids: Mutex<Vec<HookId>>,
    /// Blocked key name -> hook id of its blocking registration.
    pub(crate) blocked: Mutex<HashMap<String, HookId>>,
    /// Word -> hook id of its word listener.
    pub(crate) word_listeners: Mutex<HashMap<String, HookId>>,
}

/// The event-dispatch and hotkey engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

/// Non-owning engine reference for callbacks that must not keep the engine
/// alive (a callback holding a strong reference would cycle through the
/// hub's hook table).
#[derive(Clone)]
pub struct EngineRef {
    inner: Weak<EngineInner>,
}

impl EngineRef {
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl Engine {
    /// Builds an engine over the given backend. The name table is built
    /// from the backend mapping immediately; the OS hook is installed on
    /// the first registration.
    pub fn new<B: Backend>(backend: B) -> Engine {
        let backend: Arc<dyn Backend> = Arc::new(backend);
        let table = Arc::new(NameTable::from_mapping(backend.mapping()));
        let hub = Hub::new(Arc::clone(&backend), table);
        Engine {
            inner: Arc::new(EngineInner {
                backend,
                hub,
                hotkey_ids: Mutex::new(Vec::new()),
                blocked: Mutex::new(HashMap::new()),
                word_listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> EngineRef {
        EngineRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Rebuilds the name table from the backend. Concurrent readers see the
    /// old or the new snapshot atomically.
    pub fn reload(&self) {
        let table = Arc::new(NameTable::from_mapping(self.inner.backend.mapping()));
        self.inner.hub.set_table(table);
    }

    pub fn name_table(&self) -> Arc<NameTable> {
        self.inner.hub.table()
    }

    /// Compiles a hotkey string against the current name table.
    pub fn parse(&self, spec: &str) -> Result<Hotkey> {
        parse_hotkey(&self.name_table(), spec)
    }

    /// All scan codes a key token can stand for.
    pub fn key_to_scan_codes(&self, key: &str) -> Result<Vec<ScanCode>> {
        self.name_table().key_to_scan_codes(key)
    }

    /// Whether a key is currently held. Accepts a scan code, a key name, or
    /// a single-step combination ("ctrl+space"); multi-step hotkeys cannot
    /// be queried.
    pub fn is_pressed(&self, key: &str) -> Result<bool> {
        self.inner.hub.ensure_running()?;

        let token = key.trim();
        if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            let code: ScanCode = token
                .parse()
                .map_err(|_| Error::UnknownKey(key.to_string()))?;
            return Ok(self.inner.hub.is_pressed(code));
        }

        if token.chars().count() > 1 && (token.contains('+') || token.contains(',')) {
            let hotkey = self.parse(token)?;
            if !hotkey.is_single_step() {
                return Err(Error::Parse(format!(
                    "cannot check status of multi-step hotkey {:?}",
                    key
                )));
            }
            let pressed = self.inner.hub.pressed_set();
            return Ok(hotkey.steps[0]
                .keys
                .iter()
                .all(|class| class.scan_codes.iter().any(|c| pressed.contains(c))));
        }

        let codes = self.key_to_scan_codes(token)?;
        Ok(codes.iter().any(|&code| self.inner.hub.is_pressed(code)))
    }

    /// Currently held scan codes, sorted.
    pub fn pressed_scan_codes(&self) -> Vec<ScanCode> {
        self.inner.hub.pressed_codes()
    }

    // ----- generic hooks -------------------------------------------------

    /// Registers a callback for every dispatched event. With
    /// `suppress = true` the callback's vote can withhold events from the
    /// rest of the system; otherwise its return value is ignored and it is
    /// invoked after the suppressing hooks have voted.
    pub fn hook<F>(&self, suppress: bool, callback: F) -> Result<HookId>
    where
        F: Fn(&Event) -> Decision + Send + Sync + 'static,
    {
        self.inner.hub.add_hook(Arc::new(callback), suppress)
    }

    /// Observes events for one key only.
    pub fn hook_key<F>(&self, key: &str, callback: F) -> Result<HookId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let codes = self.key_to_scan_codes(key)?;
        self.hook(false, move |event| {
            if codes.contains(&event.scan_code) {
                callback(event);
            }
            Decision::Allow
        })
    }

    /// Observes key-down events only.
    pub fn on_press<F>(&self, callback: F) -> Result<HookId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.hook(false, move |event| {
            if event.is_down() {
                callback(event);
            }
            Decision::Allow
        })
    }

    /// Observes key-up events only.
    pub fn on_release<F>(&self, callback: F) -> Result<HookId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.hook(false, move |event| {
            if event.is_up() {
                callback(event);
            }
            Decision::Allow
        })
    }

    /// Removes any hook by id. Returns false when the id is gone already.
    pub fn unhook(&self, id: HookId) -> bool {
        self.inner.hotkey_ids.lock().unwrap().retain(|&h| h != id);
        self.inner
            .word_listeners
            .lock()
            .unwrap()
            .retain(|_, h| *h != id);
        self.inner.blocked.lock().unwrap().retain(|_, h| *h != id);
        self.inner.hub.remove_hook(id)
    }

    /// Removes every hook, hotkey, word listener and block at once.
    pub fn unhook_all(&self) {
        self.inner.hotkey_ids.lock().unwrap().clear();
        self.inner.word_listeners.lock().unwrap().clear();
        self.inner.blocked.lock().unwrap().clear();
        self.inner.hub.remove_all_hooks();
    }

    // ----- hotkeys -------------------------------------------------------

    /// Registers a callback for a hotkey specification like
    /// `"ctrl+shift+a"` or `"ctrl+a, b"`. The callback runs on a detached
    /// worker thread per invocation. Returns the registration id.
    pub fn add_hotkey<F>(&self, spec: &str, options: HotkeyOptions, callback: F) -> Result<HookId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hotkey = self.parse(spec)?;
        self.add_hotkey_parsed(hotkey, options, callback)
    }

    /// Registers a callback for an already-parsed hotkey. The path for raw
    /// scan-code hotkeys via [`Hotkey::from_scan_code`] and friends.
    pub fn add_hotkey_parsed<F>(
        &self,
        hotkey: Hotkey,
        options: HotkeyOptions,
        callback: F,
    ) -> Result<HookId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = Mutex::new(MatchState::new(hotkey, options));
        let pressed = self.inner.hub.pressed();
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(callback);

        let id = self.inner.hub.add_hook(
            Arc::new(move |event: &Event| {
                // Self-injected events never advance hotkeys.
                if event.injected {
                    return Decision::Allow;
                }
                let outcome = state.lock().unwrap().on_event(event, &pressed.snapshot());
                if outcome.fired {
                    let callback = Arc::clone(&callback);
                    spawn_user_callback(move || callback());
                }
                outcome.vote
            }),
            options.suppress,
        )?;
        self.inner.hotkey_ids.lock().unwrap().push(id);
        Ok(id)
    }

    /// Removes a hotkey registration. After this returns no new callback
    /// for it will start; one already handed to a worker thread completes.
    pub fn remove_hotkey(&self, id: HookId) -> bool {
        self.unhook(id)
    }

    /// Removes all hotkey registrations, including blocks and remaps.
    pub fn clear_all_hotkeys(&self) {
        let ids: Vec<HookId> = self.inner.hotkey_ids.lock().unwrap().drain(..).collect();
        for id in ids {
            self.inner.hub.remove_hook(id);
        }
        let blocked: Vec<HookId> = self.inner.blocked.lock().unwrap().drain().map(|(_, id)| id).collect();
        for id in blocked {
            self.inner.hub.remove_hook(id);
        }
    }

    // ----- blocking and remapping ----------------------------------------

    /// Makes a key invisible to other applications: a suppressing
    /// registration on just that key with a no-op callback.
    pub fn block_key(&self, key: &str) -> Result<HookId> {
        let name = normalize_name(key);
        let scan_codes = self.key_to_scan_codes(key)?;
        let hotkey = Hotkey {
            steps: vec![Step {
                keys: vec![KeyClass {
                    token: name.clone(),
                    scan_codes,
                }],
            }],
        };
        let id = self.add_hotkey_parsed(
            hotkey,
            HotkeyOptions {
                suppress: true,
                ..Default::default()
            },
            || {},
        )?;
        self.inner.blocked.lock().unwrap().insert(name, id);
        Ok(id)
    }

    /// Lifts a block installed by [`Engine::block_key`].
    pub fn unblock_key(&self, key: &str) -> bool {
        let name = normalize_name(key);
        match self.inner.blocked.lock().unwrap().remove(&name) {
            Some(id) => self.inner.hub.remove_hook(id),
            None => false,
        }
    }

    /// Suppresses `src` and synthesizes `dst` in its place.
    pub fn remap_hotkey(&self, src: &str, dst: &str) -> Result<HookId> {
        // Resolve eagerly so a bad destination fails here, not at use time.
        self.parse(dst)?;
        let dst = dst.to_string();
        let engine = self.downgrade();
        self.add_hotkey(
            src,
            HotkeyOptions {
                suppress: true,
                ..Default::default()
            },
            move || {
                if let Some(engine) = engine.upgrade() {
                    if let Err(e) = engine.send(&dst) {
                        warn!("remap target {:?} failed: {}", dst, e);
                    }
                }
            },
        )
    }

    // ----- blocking reads ------------------------------------------------

    /// Blocks until the hotkey is pressed. Returns early with
    /// `BackendUnavailable` if the engine shuts down while waiting.
    pub fn wait(&self, spec: &str) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = self.add_hotkey(spec, HotkeyOptions::default(), move || {
            let _ = tx.lock().unwrap().send(());
        })?;
        let result = rx
            .recv()
            .map_err(|_| Error::BackendUnavailable("engine shut down while waiting".to_string()));
        self.remove_hotkey(id);
        result
    }

    /// Blocks until any key event arrives. `None` waits forever.
    pub fn read_event(&self, timeout: Option<Duration>) -> Result<Event> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = self.hook(false, move |event| {
            let _ = tx.lock().unwrap().send(event.clone());
            Decision::Allow
        })?;
        let result = recv_with_timeout(&rx, timeout);
        self.unhook(id);
        result
    }

    /// Blocks until a key combination is pressed and released, then returns
    /// its canonical display name (e.g. "ctrl+shift+p").
    pub fn read_hotkey(&self, timeout: Option<Duration>) -> Result<String> {
        let pressed = self.inner.hub.pressed();
        let table = self.name_table();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = self.hook(false, move |event| {
            if event.event_type == EventType::Up {
                let mut names: Vec<String> = pressed
                    .sorted()
                    .into_iter()
                    .filter_map(|code| table.preferred_name(code, false).map(str::to_string))
                    .collect();
                if let Some(name) = &event.name {
                    names.push(name.clone());
                }
                let _ = tx.lock().unwrap().send(hotkey_name(names));
            }
            Decision::Allow
        })?;
        let result = recv_with_timeout(&rx, timeout);
        self.unhook(id);
        result
    }

    /// The canonical display name for the currently held keys.
    pub fn current_hotkey_name(&self) -> Result<String> {
        self.inner.hub.ensure_running()?;
        let table = self.name_table();
        let names: Vec<String> = self
            .pressed_scan_codes()
            .into_iter()
            .filter_map(|code| table.preferred_name(code, false).map(str::to_string))
            .collect();
        Ok(hotkey_name(names))
    }

    /// Tears down the OS hook and fails all later registrations and waits.
    pub fn shutdown(&self) {
        self.inner.hub.shutdown();
    }
}

fn recv_with_timeout<T>(rx: &mpsc::Receiver<T>, timeout: Option<Duration>) -> Result<T> {
    match timeout {
        Some(duration) => rx.recv_timeout(duration).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => Error::Timeout,
            mpsc::RecvTimeoutError::Disconnected => {
                Error::BackendUnavailable("engine shut down while waiting".to_string())
            }
        }),
        None => rx
            .recv()
            .map_err(|_| Error::BackendUnavailable("engine shut down while waiting".to_string())),
    }
}
