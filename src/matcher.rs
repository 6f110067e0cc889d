//! The multi-step hotkey matcher.
//!
//! One [`MatchState`] tracks one registration: a cursor over the hotkey's
//! steps plus the deadline for the next step. The hub feeds it every
//! dispatched event; it reports when the full sequence completed and how the
//! registration votes on suppression. All matching happens synchronously on
//! the hub thread; firing the user callback is the caller's job.

use std::collections::HashSet;

use crate::backend::Decision;
use crate::event::{Event, ScanCode};
use crate::hotkey::{Hotkey, Step};

/// Per-registration knobs.
#[derive(Debug, Clone, Copy)]
pub struct HotkeyOptions {
    /// Ask the OS to withhold the hotkey's keys from other applications.
    pub suppress: bool,
    /// Seconds allowed between consecutive step completions.
    pub timeout: f64,
    /// Fire on the release of the final key instead of its press.
    pub trigger_on_release: bool,
    /// With `suppress`, also withhold keys pressed while the registration
    /// is mid-sequence. Turning this off suppresses only the final step.
    pub suppress_intermediates: bool,
}

impl Default for HotkeyOptions {
    fn default() -> Self {
        HotkeyOptions {
            suppress: false,
            timeout: 1.0,
            trigger_on_release: false,
            suppress_intermediates: true,
        }
    }
}

/// What one event did to one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    /// The full sequence completed; fire the callback.
    pub fired: bool,
    pub vote: Decision,
}

impl MatchOutcome {
    fn quiet() -> Self {
        MatchOutcome {
            fired: false,
            vote: Decision::Allow,
        }
    }
}

/// The state machine for a single hotkey registration.
#[derive(Debug)]
pub struct MatchState {
    hotkey: Hotkey,
    options: HotkeyOptions,
    /// Index of the next step to satisfy.
    step: usize,
    /// Time the previous step completed; the deadline base.
    advanced_at: f64,
    /// Armed after the final step completes with `trigger_on_release`:
    /// fire on the first up event for one of these codes.
    release_codes: Option<Vec<ScanCode>>,
}

impl MatchState {
    pub fn new(hotkey: Hotkey, options: HotkeyOptions) -> Self {
        MatchState {
            hotkey,
            options,
            step: 0,
            advanced_at: 0.0,
            release_codes: None,
        }
    }

    /// Consumes one dispatched event. `pressed` is the hub's pressed-set
    /// including the current event.
    pub fn on_event(&mut self, event: &Event, pressed: &HashSet<ScanCode>) -> MatchOutcome {
        if event.is_up() {
            return self.on_up(event);
        }

        // Holding for the release that completes a trigger_on_release
        // registration; further downs are not part of the sequence.
        if self.release_codes.is_some() {
            return MatchOutcome::quiet();
        }

        if self.timed_out(event.time) {
            self.step = 0;
        }

        if !self.hotkey.steps[self.step].involves(event.scan_code) {
            // An unrelated key mid-sequence aborts the attempt, but the
            // same event may start the sequence over from the first step.
            if self.step > 0 {
                self.step = 0;
                return self.on_event(event, pressed);
            }
            return MatchOutcome::quiet();
        }

        if step_completed(&self.hotkey.steps[self.step], event.scan_code, pressed) {
            self.advanced_at = event.time;
            if self.step + 1 < self.hotkey.steps.len() {
                self.step += 1;
                return MatchOutcome {
                    fired: false,
                    vote: self.intermediate_vote(),
                };
            }

            // Final step.
            if self.options.trigger_on_release {
                let codes = self.hotkey.steps[self.step]
                    .keys
                    .iter()
                    .flat_map(|class| class.scan_codes.iter().copied())
                    .collect();
                self.release_codes = Some(codes);
                return MatchOutcome {
                    fired: false,
                    vote: self.final_vote(),
                };
            }

            self.step = 0;
            return MatchOutcome {
                fired: true,
                vote: self.final_vote(),
            };
        }

        // Part of the current step but not yet completing it (e.g. ctrl of
        // "ctrl+a" going down first).
        MatchOutcome {
            fired: false,
            vote: if self.step > 0 {
                self.intermediate_vote()
            } else {
                Decision::Allow
            },
        }
    }

    fn on_up(&mut self, event: &Event) -> MatchOutcome {
        if let Some(codes) = &self.release_codes {
            if codes.contains(&event.scan_code) {
                self.release_codes = None;
                self.step = 0;
                return MatchOutcome {
                    fired: true,
                    vote: self.final_vote(),
                };
            }
        }

        if self.timed_out(event.time) {
            self.step = 0;
        }
        MatchOutcome::quiet()
    }

    fn timed_out(&self, now: f64) -> bool {
        self.step > 0
            && self.options.timeout > 0.0
            && now - self.advanced_at > self.options.timeout
    }

    fn final_vote(&self) -> Decision {
        if self.options.suppress {
            Decision::Suppress
        } else {
            Decision::Allow
        }
    }

    fn intermediate_vote(&self) -> Decision {
        if self.options.suppress && self.options.suppress_intermediates {
            Decision::Suppress
        } else {
            Decision::Allow
        }
    }
}

/// True when this event's key transition completes the step: some
/// combination has every other scan code already down and the event's code
/// filling the remaining key class.
fn step_completed(step: &Step, scan_code: ScanCode, pressed: &HashSet<ScanCode>) -> bool {
    step.combinations().iter().any(|combo| {
        combo.contains(&scan_code)
            && combo
                .iter()
                .all(|&code| code == scan_code || pressed.contains(&code))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::hotkey::parse_hotkey;
    use crate::key::NameTable;

    fn table() -> NameTable {
        NameTable::from_mapping(vec![
            (29, "left ctrl".to_string(), false),
            (29, "ctrl".to_string(), false),
            (97, "right ctrl".to_string(), false),
            (97, "ctrl".to_string(), false),
            (42, "shift".to_string(), false),
            (30, "a".to_string(), false),
            (48, "b".to_string(), false),
            (57, "space".to_string(), false),
        ])
    }

    fn state(spec: &str, options: HotkeyOptions) -> MatchState {
        MatchState::new(parse_hotkey(&table(), spec).unwrap(), options)
    }

    struct Keys {
        pressed: HashSet<ScanCode>,
    }

    impl Keys {
        fn new() -> Self {
            Keys {
                pressed: HashSet::new(),
            }
        }

        fn down(&mut self, code: ScanCode, time: f64) -> (Event, HashSet<ScanCode>) {
            self.pressed.insert(code);
            (
                Event::new(EventType::Down, code, None, time),
                self.pressed.clone(),
            )
        }

        fn up(&mut self, code: ScanCode, time: f64) -> (Event, HashSet<ScanCode>) {
            self.pressed.remove(&code);
            (
                Event::new(EventType::Up, code, None, time),
                self.pressed.clone(),
            )
        }
    }

    #[test]
    fn test_single_key_fires_immediately() {
        let mut state = state("space", HotkeyOptions::default());
        let mut keys = Keys::new();
        let (event, pressed) = keys.down(57, 0.0);
        let outcome = state.on_event(&event, &pressed);
        assert!(outcome.fired);
        assert_eq!(outcome.vote, Decision::Allow);
    }

    #[test]
    fn test_chord_fires_on_last_key() {
        let mut state = state(
            "ctrl+shift+a",
            HotkeyOptions {
                suppress: true,
                ..Default::default()
            },
        );
        let mut keys = Keys::new();

        let (event, pressed) = keys.down(29, 0.0);
        assert!(!state.on_event(&event, &pressed).fired);
        let (event, pressed) = keys.down(42, 0.01);
        assert!(!state.on_event(&event, &pressed).fired);
        let (event, pressed) = keys.down(30, 0.02);
        let outcome = state.on_event(&event, &pressed);
        assert!(outcome.fired);
        assert_eq!(outcome.vote, Decision::Suppress);

        // Re-press of the last key with the chord still held fires again.
        let (event, pressed) = keys.up(30, 0.03);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.down(30, 0.04);
        assert!(state.on_event(&event, &pressed).fired);
    }

    #[test]
    fn test_either_side_satisfies_a_key_class() {
        let mut state = state("ctrl+a", HotkeyOptions::default());
        let mut keys = Keys::new();
        let (event, pressed) = keys.down(97, 0.0);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.down(30, 0.01);
        assert!(state.on_event(&event, &pressed).fired);
    }

    #[test]
    fn test_multi_step_within_timeout() {
        let mut state = state(
            "ctrl+a, b",
            HotkeyOptions {
                timeout: 1.0,
                ..Default::default()
            },
        );
        let mut keys = Keys::new();

        let (event, pressed) = keys.down(29, 0.0);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.down(30, 0.0);
        assert!(!state.on_event(&event, &pressed).fired);

        let (event, pressed) = keys.up(30, 0.1);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.up(29, 0.1);
        state.on_event(&event, &pressed);

        let (event, pressed) = keys.down(48, 0.5);
        assert!(state.on_event(&event, &pressed).fired);
    }

    #[test]
    fn test_multi_step_times_out() {
        let mut state = state(
            "ctrl+a, b",
            HotkeyOptions {
                timeout: 1.0,
                ..Default::default()
            },
        );
        let mut keys = Keys::new();

        let (event, pressed) = keys.down(29, 0.0);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.down(30, 0.0);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.up(30, 0.1);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.up(29, 0.1);
        state.on_event(&event, &pressed);

        let (event, pressed) = keys.down(48, 1.5);
        assert!(!state.on_event(&event, &pressed).fired);
    }

    #[test]
    fn test_unexpected_key_resets_but_can_restart() {
        let mut state = state("ctrl+a, ctrl+b", HotkeyOptions::default());
        let mut keys = Keys::new();

        let (event, pressed) = keys.down(29, 0.0);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.down(30, 0.0);
        state.on_event(&event, &pressed);

        // 'a' again is unrelated to step 2 ("ctrl+b") but with ctrl still
        // held it re-satisfies step 1, restarting the sequence.
        let (event, pressed) = keys.up(30, 0.1);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.down(30, 0.2);
        assert!(!state.on_event(&event, &pressed).fired);
        let (event, pressed) = keys.down(48, 0.3);
        assert!(state.on_event(&event, &pressed).fired);
    }

    #[test]
    fn test_trigger_on_release() {
        let mut state = state(
            "space",
            HotkeyOptions {
                trigger_on_release: true,
                ..Default::default()
            },
        );
        let mut keys = Keys::new();

        let (event, pressed) = keys.down(57, 0.0);
        assert!(!state.on_event(&event, &pressed).fired);
        let (event, pressed) = keys.up(57, 0.1);
        assert!(state.on_event(&event, &pressed).fired);
    }

    #[test]
    fn test_intermediate_suppression_votes() {
        let mut state = state(
            "ctrl+a, b",
            HotkeyOptions {
                suppress: true,
                ..Default::default()
            },
        );
        let mut keys = Keys::new();

        let (event, pressed) = keys.down(29, 0.0);
        assert_eq!(state.on_event(&event, &pressed).vote, Decision::Allow);
        let (event, pressed) = keys.down(30, 0.0);
        // Completing a non-final step mid-suppressing-hotkey withholds it.
        assert_eq!(state.on_event(&event, &pressed).vote, Decision::Suppress);
        let (event, pressed) = keys.down(48, 0.2);
        let outcome = state.on_event(&event, &pressed);
        assert!(outcome.fired);
        assert_eq!(outcome.vote, Decision::Suppress);
    }

    #[test]
    fn test_last_step_only_suppression() {
        let mut state = state(
            "ctrl+a, b",
            HotkeyOptions {
                suppress: true,
                suppress_intermediates: false,
                ..Default::default()
            },
        );
        let mut keys = Keys::new();

        let (event, pressed) = keys.down(29, 0.0);
        state.on_event(&event, &pressed);
        let (event, pressed) = keys.down(30, 0.0);
        assert_eq!(state.on_event(&event, &pressed).vote, Decision::Allow);
        let (event, pressed) = keys.down(48, 0.2);
        assert_eq!(state.on_event(&event, &pressed).vote, Decision::Suppress);
    }
}
