//! Command-line mode: bridges the key event stream to line-delimited JSON.
//!
//! Every observed event is written to stdout as one JSON object per line;
//! every line arriving on stdin is parsed as an event and replayed,
//! preserving the relative timing of the incoming records.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use keywatch::{Decision, Error, Event, EventType};

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("keywatch: {:#}", e);
        // Non-zero exit distinguishes unrecoverable backend failures
        // (missing privileges and the like) from a clean shutdown.
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    keywatch::hook(false, |event| {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(out, "{}", event.to_json_line());
        let _ = out.flush();
        Decision::Allow
    })
    .context("failed to install the keyboard hook")?;

    replay_stdin()
}

fn replay_stdin() -> Result<()> {
    let stdin = io::stdin();
    let mut last_time: Option<f64> = None;

    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match Event::from_json_line(&line) {
            Ok(event) => event,
            Err(Error::Parse(message)) => {
                log::warn!("skipping bad input line: {}", message);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(last) = last_time {
            let pause = event.time - last;
            if pause > 0.0 {
                thread::sleep(Duration::from_secs_f64(pause));
            }
        }
        last_time = Some(event.time);

        let result = match event.event_type {
            EventType::Down => keywatch::press(&event.scan_code.to_string()),
            EventType::Up => keywatch::release(&event.scan_code.to_string()),
        };
        if let Err(e) = result {
            log::warn!("failed to replay {}: {}", event, e);
        }
    }
    Ok(())
}
