//! The backend contract: the only seam between the engine and the OS.
//!
//! A backend installs the process-wide key tap, reports the scan-code to
//! name mapping, and synthesizes events. Everything else in the crate is
//! platform-independent and talks to the OS exclusively through this trait.

use crate::error::Result;
use crate::event::{Event, ScanCode};

/// A hook's verdict on an event: keep it flowing to other applications or
/// drop it before they see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Suppress,
}

impl Decision {
    pub fn is_suppress(self) -> bool {
        self == Decision::Suppress
    }
}

/// Callback invoked by the backend for every key event, on the backend's
/// own thread. The returned decision tells the backend whether to withhold
/// the event from the rest of the system (where it supports suppression).
pub type EventCallback = Box<dyn FnMut(Event) -> Decision + Send>;

/// Uninstalls the backend hook when dropped.
pub struct HookGuard {
    uninstall: Option<Box<dyn FnOnce() + Send>>,
}

impl HookGuard {
    pub fn new<F: FnOnce() + Send + 'static>(uninstall: F) -> Self {
        HookGuard {
            uninstall: Some(Box::new(uninstall)),
        }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        if let Some(uninstall) = self.uninstall.take() {
            uninstall();
        }
    }
}

/// Per-platform key-event capability set.
///
/// `install_hook` is called at most once per engine; the backend calls the
/// given callback from exactly one thread ("the hub thread") and honors the
/// returned [`Decision`] where the platform supports suppression.
pub trait Backend: Send + Sync + 'static {
    /// Prepares OS resources. Called before the first hook installation and
    /// before the first synthesized event.
    fn init(&self) -> Result<()>;

    /// Releases OS resources. Idempotent.
    fn shutdown(&self) {}

    /// The `(scan_code, name, is_keypad)` entries the name table is built
    /// from. A scan code may appear several times under different names.
    fn mapping(&self) -> Vec<(ScanCode, String, bool)>;

    /// Installs the process-wide key tap.
    fn install_hook(&self, on_event: EventCallback) -> Result<HookGuard>;

    /// Synthesizes a key-down event for a physical key.
    fn press(&self, scan_code: ScanCode) -> Result<()>;

    /// Synthesizes a key-up event for a physical key.
    fn release(&self, scan_code: ScanCode) -> Result<()>;

    /// Best-effort platform path for typing a character that no physical
    /// key produces on the current layout.
    fn type_unicode(&self, ch: char) -> Result<()>;

    /// Whether synthesized events come back through the hook flagged as
    /// injected, letting the matcher skip them.
    fn tags_injected(&self) -> bool {
        false
    }
}

/// Stub for platforms without a real backend; every operation reports
/// `BackendUnavailable`.
pub(crate) struct UnsupportedBackend;

impl Backend for UnsupportedBackend {
    fn init(&self) -> Result<()> {
        Err(unsupported())
    }

    fn mapping(&self) -> Vec<(ScanCode, String, bool)> {
        Vec::new()
    }

    fn install_hook(&self, _on_event: EventCallback) -> Result<HookGuard> {
        Err(unsupported())
    }

    fn press(&self, _scan_code: ScanCode) -> Result<()> {
        Err(unsupported())
    }

    fn release(&self, _scan_code: ScanCode) -> Result<()> {
        Err(unsupported())
    }

    fn type_unicode(&self, _ch: char) -> Result<()> {
        Err(unsupported())
    }
}

fn unsupported() -> crate::error::Error {
    crate::error::Error::BackendUnavailable(
        "keyboard hooks are not supported on this platform".to_string(),
    )
}
