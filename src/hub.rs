//! The dispatch hub: owner of the single OS hook.
//!
//! The backend calls into the hub on exactly one thread. The hub updates the
//! pressed-key set, stamps the event with a modifier snapshot, and fans the
//! event out to every registered hook in registration order, collecting
//! suppression votes. Hook callbacks run on the hub thread and must not
//! block; anything that may block is handed to [`spawn_user_callback`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use log::error;

use crate::backend::{Backend, Decision, HookGuard};
use crate::error::{Error, Result};
use crate::event::{Event, EventType, ScanCode};
use crate::key::{base_modifier, NameTable};

/// Handle for removing a hook. Unique for the lifetime of the hub.
pub type HookId = u64;

/// A hook callback: sees every dispatched event, votes on suppression.
pub type HookCallback = Arc<dyn Fn(&Event) -> Decision + Send + Sync>;

struct HookEntry {
    suppressing: bool,
    callback: HookCallback,
}

/// Shared read handle on the set of currently held scan codes. Cheap to
/// clone into hook closures; single writer (the hub thread), many readers.
#[derive(Clone, Default)]
pub struct Pressed(Arc<Mutex<HashSet<ScanCode>>>);

impl Pressed {
    pub fn contains(&self, scan_code: ScanCode) -> bool {
        self.0.lock().unwrap().contains(&scan_code)
    }

    pub fn snapshot(&self) -> HashSet<ScanCode> {
        self.0.lock().unwrap().clone()
    }

    /// Sorted snapshot, the form `stash_state` wants.
    pub fn sorted(&self) -> Vec<ScanCode> {
        let mut codes: Vec<ScanCode> = self.0.lock().unwrap().iter().copied().collect();
        codes.sort_unstable();
        codes
    }
}

/// State shared with the backend's hook closure. Kept separate from [`Hub`]
/// so dropping the hub releases the closure and with it this state.
struct HubState {
    /// Ids are handed out monotonically, so iterating the map visits hooks
    /// in registration order.
    hooks: Mutex<BTreeMap<HookId, HookEntry>>,
    next_id: AtomicU64,
    pressed: Pressed,
    table: RwLock<Arc<NameTable>>,
    torn_down: AtomicBool,
    /// Non-zero while the send subsystem is injecting. Lets the hub tag
    /// events as injected on backends that cannot do it themselves.
    injecting: AtomicUsize,
    tags_injected: bool,
}

impl HubState {
    fn dispatch(&self, mut event: Event) -> Decision {
        let table = self.table.read().unwrap().clone();

        if event.name.is_none() {
            event.name = table
                .preferred_name(event.scan_code, false)
                .map(str::to_string);
        }
        if !event.is_keypad {
            event.is_keypad = table.is_keypad(event.scan_code);
        }
        if !self.tags_injected && self.injecting.load(Ordering::SeqCst) > 0 {
            event.injected = true;
        }

        {
            let mut pressed = self.pressed.0.lock().unwrap();
            match event.event_type {
                EventType::Down => {
                    pressed.insert(event.scan_code);
                }
                EventType::Up => {
                    pressed.remove(&event.scan_code);
                }
            }
            let modifiers: BTreeSet<String> = pressed
                .iter()
                .filter_map(|&code| table.preferred_name(code, false))
                .filter_map(base_modifier)
                .map(str::to_string)
                .collect();
            event.modifiers = Some(modifiers);
        }

        // Snapshot so hooks added from callbacks start with the next event,
        // and removals never deadlock against dispatch.
        let snapshot: Vec<(bool, HookCallback)> = {
            let hooks = self.hooks.lock().unwrap();
            hooks
                .values()
                .map(|entry| (entry.suppressing, Arc::clone(&entry.callback)))
                .collect()
        };

        let mut decision = Decision::Allow;
        // Suppressing hooks vote first so slow observers never delay the
        // synchronous decision owed to the backend.
        for wants_suppression in [true, false] {
            for (suppressing, callback) in &snapshot {
                if *suppressing != wants_suppression {
                    continue;
                }
                match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                    Ok(vote) => {
                        if *suppressing && vote.is_suppress() {
                            decision = Decision::Suppress;
                        }
                    }
                    Err(_) => error!("hook callback panicked on {}", event),
                }
            }
        }
        decision
    }
}

/// Owns the backend hook and the hook registry.
pub struct Hub {
    backend: Arc<dyn Backend>,
    state: Arc<HubState>,
    guard: Mutex<Option<HookGuard>>,
    installed: AtomicBool,
}

impl Hub {
    pub fn new(backend: Arc<dyn Backend>, table: Arc<NameTable>) -> Self {
        let tags_injected = backend.tags_injected();
        Hub {
            backend,
            state: Arc::new(HubState {
                hooks: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                pressed: Pressed::default(),
                table: RwLock::new(table),
                torn_down: AtomicBool::new(false),
                injecting: AtomicUsize::new(0),
                tags_injected,
            }),
            guard: Mutex::new(None),
            installed: AtomicBool::new(false),
        }
    }

    /// Read handle on the pressed-key set, safe to move into hook closures.
    pub fn pressed(&self) -> Pressed {
        self.state.pressed.clone()
    }

    /// Marks the start of an injection burst; events dispatched before the
    /// guard drops are tagged as injected on backends that cannot tag them.
    pub fn injection_scope(&self) -> InjectionScope {
        self.state.injecting.fetch_add(1, Ordering::SeqCst);
        InjectionScope {
            state: Arc::clone(&self.state),
        }
    }

    /// Swaps in a rebuilt name table. Readers see the old or the new
    /// snapshot, never a mix.
    pub fn set_table(&self, table: Arc<NameTable>) {
        *self.state.table.write().unwrap() = table;
    }

    pub fn table(&self) -> Arc<NameTable> {
        self.state.table.read().unwrap().clone()
    }

    /// Installs the backend hook if it is not already running. Queries like
    /// `is_pressed` call this so the pressed set is live before they read
    /// it.
    pub fn ensure_running(&self) -> Result<()> {
        self.ensure_installed()
    }

    /// Registers a hook. The first registration installs the backend hook;
    /// installation failures surface here, on the caller's thread.
    pub fn add_hook(&self, callback: HookCallback, suppressing: bool) -> Result<HookId> {
        self.ensure_installed()?;
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state
            .hooks
            .lock()
            .unwrap()
            .insert(id, HookEntry {
                suppressing,
                callback,
            });
        Ok(id)
    }

    /// Removes a hook. After this returns, no further callback for the hook
    /// starts; one already running on the hub thread completes.
    pub fn remove_hook(&self, id: HookId) -> bool {
        self.state.hooks.lock().unwrap().remove(&id).is_some()
    }

    /// Drops every hook at once.
    pub fn remove_all_hooks(&self) {
        self.state.hooks.lock().unwrap().clear();
    }

    pub fn is_pressed(&self, scan_code: ScanCode) -> bool {
        self.state.pressed.contains(scan_code)
    }

    /// Sorted snapshot of the currently held scan codes.
    pub fn pressed_codes(&self) -> Vec<ScanCode> {
        self.state.pressed.sorted()
    }

    pub fn pressed_set(&self) -> HashSet<ScanCode> {
        self.state.pressed.snapshot()
    }

    /// Tears the hub down: uninstalls the OS hook, drops all hooks, and
    /// makes every later registration fail with `BackendUnavailable`.
    pub fn shutdown(&self) {
        self.state.torn_down.store(true, Ordering::SeqCst);
        self.guard.lock().unwrap().take();
        self.remove_all_hooks();
        self.backend.shutdown();
    }

    fn ensure_installed(&self) -> Result<()> {
        if self.state.torn_down.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("hub is shut down".to_string()));
        }
        if self.installed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut guard = self.guard.lock().unwrap();
        if self.installed.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.backend.init()?;
        let state = Arc::clone(&self.state);
        let hook_guard = self
            .backend
            .install_hook(Box::new(move |event| state.dispatch(event)))?;
        *guard = Some(hook_guard);
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// RAII marker for an in-flight injection burst.
pub struct InjectionScope {
    state: Arc<HubState>,
}

impl Drop for InjectionScope {
    fn drop(&mut self) {
        self.state.injecting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs a user-supplied callback on a detached worker thread so it can block
/// without stalling the hub thread. Panics are caught and logged.
pub fn spawn_user_callback<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            error!("user callback panicked");
        }
    });
}
