//! Keyboard events as observed by the dispatch hub.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Integer the OS uses to name a physical key. Opaque across backends; the
/// same logical key ("ctrl") may map to more than one scan code.
pub type ScanCode = u32;

/// Whether a key went down or came back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Down,
    Up,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Down => write!(f, "down"),
            EventType::Up => write!(f, "up"),
        }
    }
}

/// A single key event.
///
/// `name` is the canonical lower-case name when the backend could resolve
/// one. `modifiers` is a snapshot of the modifier names held at the time the
/// event was dispatched; it is stamped by the hub, not the backend, and is
/// absent on events that never passed through a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub scan_code: ScanCode,
    pub name: Option<String>,
    /// Monotonic seconds, taken from the OS where available.
    pub time: f64,
    #[serde(skip)]
    pub device: Option<String>,
    #[serde(default)]
    pub is_keypad: bool,
    #[serde(skip)]
    pub modifiers: Option<BTreeSet<String>>,
    /// True when the send subsystem synthesized this event and the backend
    /// was able to tag it as such.
    #[serde(skip)]
    pub injected: bool,
}

impl Event {
    pub fn new(event_type: EventType, scan_code: ScanCode, name: Option<String>, time: f64) -> Self {
        Event {
            event_type,
            scan_code,
            name,
            time,
            device: None,
            is_keypad: false,
            modifiers: None,
            injected: false,
        }
    }

    pub fn is_down(&self) -> bool {
        self.event_type == EventType::Down
    }

    pub fn is_up(&self) -> bool {
        self.event_type == EventType::Up
    }

    /// Serializes to the wire format used by the command-line mode: one JSON
    /// object, no pretty printing, trailing newline added by the caller.
    /// The skipped fields keep the wire format to exactly the documented
    /// keys: event_type, scan_code, name, time, is_keypad.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).expect("event serialization cannot fail")
    }

    /// Parses one line of the wire format. Unknown keys are ignored and
    /// trailing whitespace is tolerated.
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim_end())
            .map_err(|e| Error::Parse(format!("bad event line: {}", e)))
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {}", name, self.event_type),
            None => write!(f, "unknown {} {}", self.scan_code, self.event_type),
        }
    }
}
