//! Word listeners: keystroke-to-text reconstruction with trigger keys, and
//! the abbreviation expansion built on top of it.

use std::sync::{Arc, Mutex};

use log::warn;

use crate::backend::Decision;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::hub::{spawn_user_callback, HookId};
use crate::key::{is_modifier, normalize_name};
use crate::send::WriteOptions;

/// Knobs for [`Engine::add_word_listener`].
#[derive(Debug, Clone)]
pub struct WordOptions {
    /// Keys whose press checks the buffer against the word. Key names.
    pub triggers: Vec<String>,
    /// Match word endings too ("carpet" triggers "pet").
    pub match_suffix: bool,
    /// Seconds allowed between typed characters before the buffer resets.
    pub timeout: f64,
}

impl Default for WordOptions {
    fn default() -> Self {
        WordOptions {
            triggers: vec!["space".to_string()],
            match_suffix: false,
            timeout: 2.0,
        }
    }
}

struct WordState {
    buffer: String,
    last_char_time: f64,
}

impl Engine {
    /// Fires a callback when `word` has been typed and a trigger key is
    /// pressed. Matching is case-sensitive; shift makes letters uppercase.
    /// All work happens on key down, and self-injected events are ignored
    /// so an expansion cannot re-trigger itself.
    pub fn add_word_listener<F>(
        &self,
        word: &str,
        options: WordOptions,
        callback: F,
    ) -> Result<HookId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = self.inner.word_listeners.lock().unwrap();
        if listeners.contains_key(word) {
            return Err(Error::Parse(format!(
                "already listening for word {:?}",
                word
            )));
        }

        let triggers: Vec<String> = options
            .triggers
            .iter()
            .map(|t| normalize_name(t))
            .collect();
        let word_owned = word.to_string();
        let match_suffix = options.match_suffix;
        let timeout = options.timeout;
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(callback);
        let state = Mutex::new(WordState {
            buffer: String::new(),
            last_char_time: 0.0,
        });

        let id = self.inner.hub.add_hook(
            Arc::new(move |event: &Event| {
                if event.is_up() || event.injected {
                    return Decision::Allow;
                }
                let name = match &event.name {
                    Some(name) => name.as_str(),
                    None => return Decision::Allow,
                };
                // Modifier presses neither extend nor clear the buffer.
                if is_modifier(name) {
                    return Decision::Allow;
                }

                let mut state = state.lock().unwrap();

                let non_shift_modifier_held = event
                    .modifiers
                    .as_ref()
                    .map(|mods| mods.iter().any(|m| m != "shift"))
                    .unwrap_or(false);
                if non_shift_modifier_held {
                    state.buffer.clear();
                    return Decision::Allow;
                }

                let shift_held = event
                    .modifiers
                    .as_ref()
                    .map(|mods| mods.contains("shift"))
                    .unwrap_or(false);

                if triggers.iter().any(|t| t == name) {
                    let matched = state.buffer == word_owned
                        || (match_suffix && state.buffer.ends_with(&word_owned));
                    if matched {
                        let callback = Arc::clone(&callback);
                        spawn_user_callback(move || callback());
                    }
                    state.buffer.clear();
                } else if name.chars().count() == 1 {
                    if timeout > 0.0 && event.time - state.last_char_time > timeout {
                        state.buffer.clear();
                    }
                    state.last_char_time = event.time;
                    let ch = name.chars().next().unwrap();
                    let ch = if shift_held && ch.is_alphabetic() {
                        ch.to_uppercase().next().unwrap_or(ch)
                    } else {
                        ch
                    };
                    state.buffer.push(ch);
                } else {
                    // Non-character, non-trigger key.
                    state.buffer.clear();
                }
                Decision::Allow
            }),
            false,
        )?;

        listeners.insert(word.to_string(), id);
        Ok(id)
    }

    /// Removes a word listener (or abbreviation) by its word.
    pub fn remove_word_listener(&self, word: &str) -> bool {
        match self.inner.word_listeners.lock().unwrap().remove(word) {
            Some(id) => self.inner.hub.remove_hook(id),
            None => false,
        }
    }

    /// Replaces typed text: once `source` is typed and a trigger pressed,
    /// backspaces over the word and the trigger, then writes `replacement`.
    /// Registering `("tm", "™")` turns every typed "tm" plus space into the
    /// ™ symbol.
    pub fn add_abbreviation(
        &self,
        source: &str,
        replacement: &str,
        options: WordOptions,
    ) -> Result<HookId> {
        let engine = self.downgrade();
        let erase = source.chars().count() + 1;
        let replacement = replacement.to_string();

        self.add_word_listener(source, options, move || {
            let engine = match engine.upgrade() {
                Some(engine) => engine,
                None => return,
            };
            let text: String = "\u{8}".repeat(erase) + &replacement;
            if let Err(e) = engine.write_with(
                &text,
                WriteOptions {
                    restore_state_after: false,
                    ..Default::default()
                },
            ) {
                warn!("abbreviation expansion failed: {}", e);
            }
        })
    }
}
