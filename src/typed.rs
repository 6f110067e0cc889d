//! Reconstructing typed text from an event stream.
//!
//! A best-effort heuristic: the stream carries no per-application layout
//! state, so this tracks only shift, caps lock and backspace. Expressed as
//! a pull iterator so it can run over an unbounded event source.

use crate::event::Event;
use crate::key::base_modifier;

/// Keys that end the current string and start a fresh one.
static SEGMENTING: &[&str] = &["enter", "tab", "esc"];

/// Iterator over the strings a user typed, as deduced from an event stream.
/// Strings are finalized by segmenting keys (enter, tab, esc); the last
/// partial string is emitted when the source ends.
pub struct TypedStrings<I> {
    events: I,
    allow_backspace: bool,
    shift: bool,
    capslock: bool,
    current: String,
    finished: bool,
}

/// Deduces what strings were typed from a sequence of events. Letters are
/// uppercased according to shift and caps-lock state (caps lock affects
/// letters only); backspace removes the last character when
/// `allow_backspace` is set.
pub fn get_typed_strings<I>(events: I, allow_backspace: bool) -> TypedStrings<I::IntoIter>
where
    I: IntoIterator<Item = Event>,
{
    TypedStrings {
        events: events.into_iter(),
        allow_backspace,
        shift: false,
        capslock: false,
        current: String::new(),
        finished: false,
    }
}

impl<I> Iterator for TypedStrings<I>
where
    I: Iterator<Item = Event>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }

        for event in self.events.by_ref() {
            let name = match &event.name {
                Some(name) => name.as_str(),
                None => continue,
            };

            if base_modifier(name) == Some("shift") {
                self.shift = event.is_down();
                continue;
            }
            if !event.is_down() {
                continue;
            }

            if name == "caps lock" {
                self.capslock = !self.capslock;
            } else if name == "backspace" {
                if self.allow_backspace {
                    self.current.pop();
                }
            } else if name == "space" {
                self.current.push(' ');
            } else if name.chars().count() == 1 {
                let ch = name.chars().next().unwrap();
                let ch = if (self.shift ^ self.capslock) && ch.is_alphabetic() {
                    ch.to_uppercase().next().unwrap_or(ch)
                } else {
                    ch
                };
                self.current.push(ch);
            } else if SEGMENTING.contains(&name) {
                return Some(std::mem::take(&mut self.current));
            }
            // Other non-text keys (arrows, function keys, ...) are ignored.
        }

        self.finished = true;
        Some(std::mem::take(&mut self.current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    fn down(name: &str) -> Event {
        Event::new(EventType::Down, 0, Some(name.to_string()), 0.0)
    }

    fn up(name: &str) -> Event {
        Event::new(EventType::Up, 0, Some(name.to_string()), 0.0)
    }

    fn typed(events: Vec<Event>) -> Vec<String> {
        get_typed_strings(events, true).collect()
    }

    #[test]
    fn test_plain_text() {
        let strings = typed(vec![down("h"), up("h"), down("i"), up("i")]);
        assert_eq!(strings, vec!["hi"]);
    }

    #[test]
    fn test_space_becomes_a_space() {
        let strings = typed(vec![down("h"), down("space"), down("i")]);
        assert_eq!(strings, vec!["h i"]);
    }

    #[test]
    fn test_shift_uppercases_letters_only() {
        let strings = typed(vec![
            down("shift"),
            down("h"),
            down("1"),
            up("shift"),
            down("i"),
        ]);
        assert_eq!(strings, vec!["H1i"]);
    }

    #[test]
    fn test_capslock_xor_shift() {
        let strings = typed(vec![
            down("caps lock"),
            down("h"),
            down("shift"),
            down("i"),
            up("shift"),
            down("j"),
        ]);
        assert_eq!(strings, vec!["HiJ"]);
    }

    #[test]
    fn test_sided_shift_names_count() {
        let strings = typed(vec![down("left shift"), down("a"), up("left shift")]);
        assert_eq!(strings, vec!["A"]);
    }

    #[test]
    fn test_backspace_removes_last_character() {
        let strings = typed(vec![down("h"), down("j"), down("backspace"), down("i")]);
        assert_eq!(strings, vec!["hi"]);
    }

    #[test]
    fn test_backspace_can_be_ignored() {
        let events = vec![down("h"), down("backspace"), down("i")];
        let strings: Vec<String> = get_typed_strings(events, false).collect();
        assert_eq!(strings, vec!["hi"]);
    }

    #[test]
    fn test_enter_segments_strings() {
        let strings = typed(vec![down("h"), down("enter"), down("i"), down("tab"), down("j")]);
        assert_eq!(strings, vec!["h", "i", "j"]);
    }

    #[test]
    fn test_nontext_keys_are_ignored() {
        let strings = typed(vec![down("h"), down("f1"), down("left"), down("i")]);
        assert_eq!(strings, vec!["hi"]);
    }

    #[test]
    fn test_empty_stream_yields_one_empty_string() {
        assert_eq!(typed(vec![]), vec![""]);
    }

    #[test]
    fn test_is_lazy_over_long_streams() {
        // Pulls only as much of the source as needed for the next string.
        let events = (0..10_000u32).flat_map(|i| {
            if i % 3 == 2 {
                vec![down("enter")]
            } else {
                vec![down("a")]
            }
        });
        let mut strings = get_typed_strings(events, true);
        assert_eq!(strings.next().as_deref(), Some("aa"));
        assert_eq!(strings.next().as_deref(), Some("aa"));
    }
}
