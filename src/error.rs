//! Error types shared across the crate.

use thiserror::Error;

/// Errors surfaced by the public API.
#[derive(Error, Debug)]
pub enum Error {
    /// A key name or scan code did not resolve to any physical key.
    #[error("unknown key: {0:?}")]
    UnknownKey(String),

    /// A hotkey string is syntactically invalid.
    #[error("invalid hotkey: {0}")]
    Parse(String),

    /// The OS hook could not be installed, or the hub has been torn down.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected a synthesized event.
    #[error("event injection failed: {0}")]
    Injection(String),

    /// A blocking read (`read_event`, `read_hotkey`) ran out of time.
    #[error("timed out waiting for an event")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
