//! Recording event streams and replaying them with time scaling.

use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;

use crate::backend::Decision;
use crate::engine::Engine;
use crate::error::Result;
use crate::event::{Event, EventType};
use crate::hub::HookId;

/// A live recording: the queue of captured events plus the id of the hook
/// feeding it. Drop it through [`Engine::stop_recording`].
pub struct Recording {
    pub receiver: mpsc::Receiver<Event>,
    pub hook_id: HookId,
}

impl Engine {
    /// Starts capturing every dispatched event into a queue.
    pub fn start_recording(&self) -> Result<Recording> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let hook_id = self.hook(false, move |event| {
            let _ = tx.lock().unwrap().send(event.clone());
            Decision::Allow
        })?;
        Ok(Recording {
            receiver: rx,
            hook_id,
        })
    }

    /// Stops a recording and drains it to a list.
    pub fn stop_recording(&self, recording: Recording) -> Vec<Event> {
        self.unhook(recording.hook_id);
        recording.receiver.try_iter().collect()
    }

    /// Records until the given hotkey is pressed, then returns everything
    /// captured (including the events of the hotkey itself). Blocking.
    pub fn record(&self, until: &str) -> Result<Vec<Event>> {
        let recording = self.start_recording()?;
        self.wait(until)?;
        Ok(self.stop_recording(recording))
    }

    /// Replays a list of events, preserving relative timing scaled by
    /// `1 / speed_factor`; with `speed_factor <= 0` the events go out as
    /// fast as the backend accepts them. The current key state is cleared
    /// first and restored afterwards.
    pub fn play(&self, events: &[Event], speed_factor: f64) -> Result<()> {
        let stashed = self.stash_state()?;

        {
            let _scope = self.inner.hub.injection_scope();
            let mut last_time: Option<f64> = None;
            for event in events {
                if speed_factor > 0.0 {
                    if let Some(last) = last_time {
                        let pause = (event.time - last) / speed_factor;
                        if pause > 0.0 {
                            thread::sleep(Duration::from_secs_f64(pause));
                        }
                    }
                }
                last_time = Some(event.time);

                match event.event_type {
                    EventType::Down => self.inner.backend.press(event.scan_code)?,
                    EventType::Up => self.inner.backend.release(event.scan_code)?,
                }
            }
        }

        self.restore_state(&stashed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, Injected};

    fn engine_with_fake() -> (Engine, FakeBackend) {
        let backend = FakeBackend::new();
        (Engine::new(backend.clone()), backend)
    }

    #[test]
    fn test_recording_captures_in_order() {
        let (engine, backend) = engine_with_fake();
        let recording = engine.start_recording().unwrap();

        backend.feed(EventType::Down, 29);
        backend.feed(EventType::Down, 30);
        backend.feed(EventType::Up, 30);
        backend.feed(EventType::Up, 29);

        let events = engine.stop_recording(recording);
        let codes: Vec<_> = events.iter().map(|e| (e.event_type, e.scan_code)).collect();
        assert_eq!(
            codes,
            vec![
                (EventType::Down, 29),
                (EventType::Down, 30),
                (EventType::Up, 30),
                (EventType::Up, 29),
            ]
        );
    }

    #[test]
    fn test_stopped_recording_captures_nothing_more() {
        let (engine, backend) = engine_with_fake();
        let recording = engine.start_recording().unwrap();
        backend.feed(EventType::Down, 30);
        let events = engine.stop_recording(recording);
        assert_eq!(events.len(), 1);

        // New events after the stop go nowhere.
        backend.feed(EventType::Down, 48);
    }

    #[test]
    fn test_play_reinjects_with_matching_types() {
        let (engine, backend) = engine_with_fake();
        let events = vec![
            Event::new(EventType::Down, 29, Some("ctrl".to_string()), 0.0),
            Event::new(EventType::Down, 30, Some("a".to_string()), 0.01),
            Event::new(EventType::Up, 30, Some("a".to_string()), 0.02),
            Event::new(EventType::Up, 29, Some("ctrl".to_string()), 0.03),
        ];

        engine.play(&events, 0.0).unwrap();
        assert_eq!(
            backend.injections(),
            vec![
                Injected::Press(29),
                Injected::Press(30),
                Injected::Release(30),
                Injected::Release(29),
            ]
        );
    }

    #[test]
    fn test_play_restores_prior_state() {
        let (engine, backend) = engine_with_fake();
        engine.hook(false, |_| Decision::Allow).unwrap();
        backend.feed(EventType::Down, 42);

        let events = vec![
            Event::new(EventType::Down, 30, Some("a".to_string()), 0.0),
            Event::new(EventType::Up, 30, Some("a".to_string()), 0.01),
        ];
        engine.play(&events, 0.0).unwrap();

        assert!(engine.is_pressed("shift").unwrap());
        assert!(!engine.is_pressed("a").unwrap());
    }
}
