//! Global keyboard hook, hotkey and synthesis engine.
//!
//! This crate observes every physical key event on the machine regardless of
//! window focus, recognizes multi-step hotkey sequences, synthesizes key
//! events back to the OS, and layers recording/replay and abbreviation
//! expansion on top.
//!
//! # Features
//!
//! - **Global event hook** on all keyboards, delivered in order to every
//!   registered listener
//! - **Complex hotkeys** (`"ctrl+shift+m, ctrl+space"`) with per-sequence
//!   timeouts, trigger-on-release and OS-level suppression where the
//!   backend supports it
//! - **Key synthesis**: `send`, `press`, `release`, and `write` for typing
//!   arbitrary text with held keys stashed and restored around it
//! - **Record and replay** with time scaling
//! - **Word listeners and abbreviations** (`"tm"` + space -> `"™"`)
//! - **Typed-string reconstruction** from any event stream
//! - **Linux (evdev, X11 and Wayland) + macOS (rdev)**, with the OS behind
//!   a single backend trait and a deterministic fake for tests
//!
//! # Example
//!
//! ```no_run
//! use keywatch::HotkeyOptions;
//!
//! fn main() -> keywatch::Result<()> {
//!     keywatch::add_hotkey("ctrl+shift+a", HotkeyOptions::default(), || {
//!         println!("hotkey pressed");
//!     })?;
//!
//!     keywatch::write("The quick brown fox jumps over the lazy dog.")?;
//!
//!     // Record until esc, then replay at double speed.
//!     let events = keywatch::record("esc")?;
//!     keywatch::play(&events, 2.0)?;
//!
//!     // Block until esc is pressed.
//!     keywatch::wait("esc")
//! }
//! ```
//!
//! # Platform requirements
//!
//! On Linux the user must be able to read `/dev/input/event*` (the `input`
//! group or root) and write `/dev/uinput` for synthesis. On macOS the
//! process needs accessibility and input-monitoring permissions.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

mod backend;
mod engine;
mod error;
mod event;
mod hotkey;
mod hub;
mod key;
mod matcher;
mod record;
mod send;
pub mod testing;
mod typed;
mod words;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

pub use backend::{Backend, Decision, EventCallback, HookGuard};
pub use engine::{Engine, EngineRef};
pub use error::{Error, Result};
pub use event::{Event, EventType, ScanCode};
pub use hotkey::{hotkey_name, parse_hotkey, Hotkey, KeyClass, Step};
pub use hub::{spawn_user_callback, HookId};
pub use key::{normalize_name, Keystroke, NameTable};
pub use matcher::HotkeyOptions;
pub use record::Recording;
pub use send::WriteOptions;
pub use typed::{get_typed_strings, TypedStrings};
pub use words::WordOptions;

#[cfg(target_os = "linux")]
pub use linux::{find_keyboards, LinuxBackend};

#[cfg(target_os = "macos")]
pub use macos::MacosBackend;

static ENGINE: OnceLock<Engine> = OnceLock::new();
static RECORDING: Mutex<Option<Recording>> = Mutex::new(None);

/// The process-wide engine behind the free functions, built over the
/// platform backend on first use.
pub fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| {
        #[cfg(target_os = "linux")]
        {
            Engine::new(linux::LinuxBackend::new())
        }
        #[cfg(target_os = "macos")]
        {
            Engine::new(macos::MacosBackend::new())
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            Engine::new(backend::UnsupportedBackend)
        }
    })
}

/// Rebuilds the name table from the backend mapping.
pub fn reload() {
    engine().reload()
}

/// See [`Engine::is_pressed`].
pub fn is_pressed(key: &str) -> Result<bool> {
    engine().is_pressed(key)
}

/// See [`Engine::key_to_scan_codes`].
pub fn key_to_scan_codes(key: &str) -> Result<Vec<ScanCode>> {
    engine().key_to_scan_codes(key)
}

/// See [`Engine::hook`].
pub fn hook<F>(suppress: bool, callback: F) -> Result<HookId>
where
    F: Fn(&Event) -> Decision + Send + Sync + 'static,
{
    engine().hook(suppress, callback)
}

/// See [`Engine::hook_key`].
pub fn hook_key<F>(key: &str, callback: F) -> Result<HookId>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    engine().hook_key(key, callback)
}

/// See [`Engine::on_press`].
pub fn on_press<F>(callback: F) -> Result<HookId>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    engine().on_press(callback)
}

/// See [`Engine::on_release`].
pub fn on_release<F>(callback: F) -> Result<HookId>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    engine().on_release(callback)
}

/// See [`Engine::unhook`].
pub fn unhook(id: HookId) -> bool {
    engine().unhook(id)
}

/// See [`Engine::unhook_all`].
pub fn unhook_all() {
    engine().unhook_all()
}

/// See [`Engine::add_hotkey`].
pub fn add_hotkey<F>(spec: &str, options: HotkeyOptions, callback: F) -> Result<HookId>
where
    F: Fn() + Send + Sync + 'static,
{
    engine().add_hotkey(spec, options, callback)
}

/// See [`Engine::remove_hotkey`].
pub fn remove_hotkey(id: HookId) -> bool {
    engine().remove_hotkey(id)
}

/// See [`Engine::clear_all_hotkeys`].
pub fn clear_all_hotkeys() {
    engine().clear_all_hotkeys()
}

/// See [`Engine::block_key`].
pub fn block_key(key: &str) -> Result<HookId> {
    engine().block_key(key)
}

/// See [`Engine::unblock_key`].
pub fn unblock_key(key: &str) -> bool {
    engine().unblock_key(key)
}

/// See [`Engine::remap_hotkey`].
pub fn remap_hotkey(src: &str, dst: &str) -> Result<HookId> {
    engine().remap_hotkey(src, dst)
}

/// See [`Engine::send`].
pub fn send(spec: &str) -> Result<()> {
    engine().send(spec)
}

/// See [`Engine::press`].
pub fn press(spec: &str) -> Result<()> {
    engine().press(spec)
}

/// See [`Engine::release`].
pub fn release(spec: &str) -> Result<()> {
    engine().release(spec)
}

/// See [`Engine::write`].
pub fn write(text: &str) -> Result<()> {
    engine().write(text)
}

/// See [`Engine::write_with`].
pub fn write_with(text: &str, options: WriteOptions) -> Result<()> {
    engine().write_with(text, options)
}

/// See [`Engine::stash_state`].
pub fn stash_state() -> Result<Vec<ScanCode>> {
    engine().stash_state()
}

/// See [`Engine::restore_state`].
pub fn restore_state(scan_codes: &[ScanCode]) -> Result<()> {
    engine().restore_state(scan_codes)
}

/// See [`Engine::restore_modifiers`].
pub fn restore_modifiers(scan_codes: &[ScanCode]) -> Result<()> {
    engine().restore_modifiers(scan_codes)
}

/// See [`Engine::wait`].
pub fn wait(spec: &str) -> Result<()> {
    engine().wait(spec)
}

/// See [`Engine::read_event`].
pub fn read_event(timeout: Option<Duration>) -> Result<Event> {
    engine().read_event(timeout)
}

/// See [`Engine::read_hotkey`].
pub fn read_hotkey(timeout: Option<Duration>) -> Result<String> {
    engine().read_hotkey(timeout)
}

/// See [`Engine::record`].
pub fn record(until: &str) -> Result<Vec<Event>> {
    engine().record(until)
}

/// See [`Engine::play`].
pub fn play(events: &[Event], speed_factor: f64) -> Result<()> {
    engine().play(events, speed_factor)
}

/// Starts the process-wide recording. See [`Engine::start_recording`].
pub fn start_recording() -> Result<()> {
    let mut slot = RECORDING.lock().unwrap();
    if slot.is_some() {
        return Err(Error::Parse("recording already started".to_string()));
    }
    *slot = Some(engine().start_recording()?);
    Ok(())
}

/// Stops the process-wide recording and returns the captured events.
pub fn stop_recording() -> Result<Vec<Event>> {
    let recording = RECORDING
        .lock()
        .unwrap()
        .take()
        .ok_or_else(|| Error::Parse("start_recording was not called".to_string()))?;
    Ok(engine().stop_recording(recording))
}

/// See [`Engine::add_word_listener`].
pub fn add_word_listener<F>(word: &str, options: WordOptions, callback: F) -> Result<HookId>
where
    F: Fn() + Send + Sync + 'static,
{
    engine().add_word_listener(word, options, callback)
}

/// See [`Engine::remove_word_listener`].
pub fn remove_word_listener(word: &str) -> bool {
    engine().remove_word_listener(word)
}

/// See [`Engine::add_abbreviation`].
pub fn add_abbreviation(source: &str, replacement: &str, options: WordOptions) -> Result<HookId> {
    engine().add_abbreviation(source, replacement, options)
}

/// The display name of the keys currently held. See
/// [`Engine::current_hotkey_name`].
pub fn get_hotkey_name() -> Result<String> {
    engine().current_hotkey_name()
}
