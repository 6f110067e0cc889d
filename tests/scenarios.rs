//! End-to-end scenarios driven through the deterministic fake backend:
//! hotkey recognition, suppression, abbreviation expansion, state stash and
//! restore, and record/replay round trips.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keywatch::testing::{FakeBackend, Injected};
use keywatch::{
    Decision, Engine, EventType, HotkeyOptions, WordOptions, WriteOptions,
};

fn engine_with_fake() -> (Engine, FakeBackend) {
    let backend = FakeBackend::new();
    (Engine::new(backend.clone()), backend)
}

fn wait_for_count(counter: &AtomicUsize, expected: usize) {
    let start = Instant::now();
    while counter.load(Ordering::SeqCst) < expected {
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "callback count stuck at {}, wanted {}",
            counter.load(Ordering::SeqCst),
            expected
        );
        std::thread::yield_now();
    }
}

fn counted_hotkey(engine: &Engine, spec: &str, options: HotkeyOptions) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let count_cb = Arc::clone(&count);
    engine
        .add_hotkey(spec, options, move || {
            count_cb.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    count
}

#[test]
fn scenario_single_key_hotkey_fires_immediately() {
    let (engine, backend) = engine_with_fake();
    let count = counted_hotkey(&engine, "space", HotkeyOptions::default());

    let decision = backend.feed_at(EventType::Down, 57, 0.0);

    assert_eq!(decision, Decision::Allow);
    wait_for_count(&count, 1);
    assert_eq!(engine.pressed_scan_codes(), vec![57]);

    backend.feed_at(EventType::Up, 57, 0.1);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn scenario_chord_with_suppression() {
    let (engine, backend) = engine_with_fake();
    let count = counted_hotkey(
        &engine,
        "ctrl+shift+a",
        HotkeyOptions {
            suppress: true,
            ..Default::default()
        },
    );

    assert_eq!(backend.feed_at(EventType::Down, 29, 0.0), Decision::Allow);
    assert_eq!(backend.feed_at(EventType::Down, 42, 0.01), Decision::Allow);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // The completing key is withheld from other applications.
    assert_eq!(
        backend.feed_at(EventType::Down, 30, 0.02),
        Decision::Suppress
    );
    wait_for_count(&count, 1);

    // With ctrl+shift still held, pressing "a" again fires again.
    backend.feed_at(EventType::Up, 30, 0.03);
    backend.feed_at(EventType::Down, 30, 0.04);
    wait_for_count(&count, 2);
}

#[test]
fn scenario_multi_step_hotkey_within_timeout() {
    let (engine, backend) = engine_with_fake();
    let count = counted_hotkey(
        &engine,
        "ctrl+a, b",
        HotkeyOptions {
            timeout: 1.0,
            ..Default::default()
        },
    );

    backend.feed_at(EventType::Down, 29, 0.0);
    backend.feed_at(EventType::Down, 30, 0.0);
    backend.feed_at(EventType::Up, 30, 0.05);
    backend.feed_at(EventType::Up, 29, 0.05);

    backend.feed_at(EventType::Down, 48, 0.5);
    wait_for_count(&count, 1);
}

#[test]
fn scenario_multi_step_hotkey_expires() {
    let (engine, backend) = engine_with_fake();
    let count = counted_hotkey(
        &engine,
        "ctrl+a, b",
        HotkeyOptions {
            timeout: 1.0,
            ..Default::default()
        },
    );

    backend.feed_at(EventType::Down, 29, 0.0);
    backend.feed_at(EventType::Down, 30, 0.0);
    backend.feed_at(EventType::Up, 30, 0.05);
    backend.feed_at(EventType::Up, 29, 0.05);

    // Too late: the sequence reset.
    backend.feed_at(EventType::Down, 48, 1.5);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn scenario_abbreviation_erases_and_writes_replacement() {
    let (engine, backend) = engine_with_fake();
    engine
        .add_abbreviation("tm", "™", WordOptions::default())
        .unwrap();

    // Type "t", "m", then the trigger.
    for code in [20, 50] {
        backend.feed(EventType::Down, code);
        backend.feed(EventType::Up, code);
    }
    backend.feed(EventType::Down, 57);
    backend.feed(EventType::Up, 57);

    // The expansion runs on a worker thread: wait for the unicode write.
    let start = Instant::now();
    let injections = loop {
        let injections = backend.injections();
        if injections.contains(&Injected::Unicode('™')) {
            break injections;
        }
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "expansion never happened; injections: {:?}",
            backend.injections()
        );
        std::thread::yield_now();
    };

    // Three backspaces (the word and its trigger) and then the symbol.
    let relevant: Vec<Injected> = injections
        .into_iter()
        .filter(|i| matches!(i, Injected::Press(14) | Injected::Release(14) | Injected::Unicode(_)))
        .collect();
    assert_eq!(
        relevant,
        vec![
            Injected::Press(14),
            Injected::Release(14),
            Injected::Press(14),
            Injected::Release(14),
            Injected::Press(14),
            Injected::Release(14),
            Injected::Unicode('™'),
        ]
    );
}

#[test]
fn scenario_write_restores_held_keys() {
    let (engine, backend) = engine_with_fake();
    engine.hook(false, |_| Decision::Allow).unwrap();
    backend.feed(EventType::Down, 29);

    engine
        .write_with(
            "Hi",
            WriteOptions {
                restore_state_after: true,
                ..Default::default()
            },
        )
        .unwrap();

    let injections = backend.injections();
    assert_eq!(injections.first(), Some(&Injected::Release(29)));
    assert_eq!(injections.last(), Some(&Injected::Press(29)));
    let h_press = injections.iter().position(|i| *i == Injected::Press(35));
    assert!(h_press.is_some(), "H was never typed: {:?}", injections);

    assert_eq!(engine.pressed_scan_codes(), vec![29]);
}

#[test]
fn scenario_record_play_round_trip() {
    let (engine, backend) = engine_with_fake();
    let recording = engine.start_recording().unwrap();

    backend.feed_at(EventType::Down, 57, 0.0);
    backend.feed_at(EventType::Up, 57, 0.05);
    backend.feed_at(EventType::Down, 29, 0.1);
    backend.feed_at(EventType::Down, 42, 0.11);
    backend.feed_at(EventType::Down, 30, 0.12);
    backend.feed_at(EventType::Up, 30, 0.2);
    backend.feed_at(EventType::Up, 42, 0.21);
    backend.feed_at(EventType::Up, 29, 0.22);

    let events = engine.stop_recording(recording);
    assert_eq!(events.len(), 8);

    backend.clear_injections();
    engine.play(&events, 0.0).unwrap();

    let replayed: Vec<Injected> = backend.injections();
    let expected: Vec<Injected> = events
        .iter()
        .map(|e| match e.event_type {
            EventType::Down => Injected::Press(e.scan_code),
            EventType::Up => Injected::Release(e.scan_code),
        })
        .collect();
    assert_eq!(replayed, expected);
}

#[test]
fn pressed_set_matches_down_up_history() {
    let (engine, backend) = engine_with_fake();
    engine.hook(false, |_| Decision::Allow).unwrap();

    let stream = [
        (EventType::Down, 29),
        (EventType::Down, 30),
        (EventType::Up, 30),
        (EventType::Down, 42),
        (EventType::Down, 30),
        (EventType::Up, 29),
        (EventType::Up, 30),
        (EventType::Up, 30), // double release is clamped
    ];
    for (event_type, code) in stream {
        backend.feed(event_type, code);
    }

    assert_eq!(engine.pressed_scan_codes(), vec![42]);
}

#[test]
fn removed_hotkey_never_fires_again() {
    let (engine, backend) = engine_with_fake();
    let count = Arc::new(AtomicUsize::new(0));
    let count_cb = Arc::clone(&count);
    let id = engine
        .add_hotkey("space", HotkeyOptions::default(), move || {
            count_cb.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    backend.feed(EventType::Down, 57);
    backend.feed(EventType::Up, 57);
    wait_for_count(&count, 1);

    assert!(engine.remove_hotkey(id));
    for _ in 0..5 {
        backend.feed(EventType::Down, 57);
        backend.feed(EventType::Up, 57);
    }
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn parse_and_name_round_trips_through_the_engine() {
    let (engine, _backend) = engine_with_fake();

    for spec in ["ctrl+shift+a", "space", "ctrl+a, b", "page up"] {
        let once = engine.parse(spec).unwrap();
        let again = engine.parse(&once.to_string()).unwrap();
        assert_eq!(once, again, "parse(serialize(parse)) changed for {:?}", spec);
    }

    // Every scan code a name resolves to reports a name that resolves back
    // to the same code.
    let table = engine.name_table();
    for name in ["ctrl", "shift", "space", "a", "home"] {
        for code in table.scan_codes(name) {
            let reported = table.preferred_name(code, false).unwrap();
            assert!(
                table.scan_codes(reported).contains(&code),
                "{} -> {} -> {} lost the scan code",
                name,
                code,
                reported
            );
        }
    }
}

#[test]
fn suppressing_and_observing_hooks_coexist() {
    let (engine, backend) = engine_with_fake();

    engine
        .hook(true, |event| {
            if event.scan_code == 1 {
                Decision::Suppress
            } else {
                Decision::Allow
            }
        })
        .unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_cb = Arc::clone(&seen);
    engine
        .hook(false, move |_| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
            Decision::Allow
        })
        .unwrap();

    assert_eq!(backend.feed(EventType::Down, 1), Decision::Suppress);
    assert_eq!(backend.feed(EventType::Down, 30), Decision::Allow);
    // The observer saw both events, including the suppressed one.
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
