use std::io::Write;

use chrono::Utc;
use clap::Subcommand;
use tokio::sync::broadcast;

use practimer_core::storage::Database;
use practimer_core::{
    now_ms, Config, Event, Notifier, ResetScope, SessionLog, SessionMachine, SessionRecord,
    SessionService, Ticker,
};

use crate::notify::TerminalNotifier;

const MACHINE_KEY: &str = "session_machine";

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start or resume the countdown
    Start,
    /// Pause the countdown
    Pause,
    /// Skip to the next segment (silent transition)
    Skip,
    /// Reset the current segment, or the whole cycle with --all
    Reset {
        #[arg(long)]
        all: bool,
    },
    /// Print current session state as JSON
    Status,
    /// Run the countdown in the foreground until the cycle completes
    Watch,
}

/// Restore the machine persisted by the previous invocation, rebasing it
/// when the configuration changed in between.
fn load_machine(db: &Database, config: &Config) -> SessionMachine {
    let mut machine = match db.kv_get(MACHINE_KEY) {
        Ok(Some(json)) => serde_json::from_str::<SessionMachine>(&json)
            .unwrap_or_else(|_| SessionMachine::new(config.timer.clone())),
        _ => SessionMachine::new(config.timer.clone()),
    };
    if machine.config() != &config.timer {
        let _ = machine.reconfigure(config.timer.clone());
    }
    machine
}

fn save_machine(db: &Database, machine: &SessionMachine) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string(machine)?;
    db.kv_set(MACHINE_KEY, &json)?;
    Ok(())
}

/// Side effects of a completion that happened while no process was
/// watching: record the segment and beep.
fn handle_completion(event: &Event, config: &Config, db: &Database) {
    let Event::SegmentCompleted {
        previous_mode,
        cycle_complete,
        duration_secs,
        started_at,
        at,
        ..
    } = event
    else {
        return;
    };
    let started = started_at.unwrap_or(*at - chrono::Duration::seconds(*duration_secs as i64));
    let record = SessionRecord {
        kind: *previous_mode,
        started_at: started,
        ended_at: *at,
        duration_secs: *duration_secs,
        completed: true,
    };
    if let Err(err) = db.record_session(&record) {
        tracing::warn!(%err, "failed to record session");
    }
    let notifier = TerminalNotifier::new(config.notifications.clone());
    notifier.segment_completed(event);
    if *cycle_complete {
        notifier.cycle_completed(event);
    }
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let db = Database::open()?;
    let mut machine = load_machine(&db, &config);

    match action {
        TimerAction::Start => {
            // A segment may have finished while no process was running.
            if let Some(event) = machine.tick(now_ms(), machine.epoch()) {
                handle_completion(&event, &config, &db);
                println!("{}", serde_json::to_string_pretty(&event)?);
            }
            match machine.start(now_ms()) {
                Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
                None => println!("{}", serde_json::to_string_pretty(&machine.snapshot())?),
            }
        }
        TimerAction::Pause => match machine.pause(now_ms()) {
            Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
            None => println!("{}", serde_json::to_string_pretty(&machine.snapshot())?),
        },
        TimerAction::Skip => {
            // Abandoned segments go into the history as incomplete.
            if let Some(started) = machine.segment_started_at() {
                let ended = Utc::now();
                let record = SessionRecord {
                    kind: machine.mode(),
                    started_at: started,
                    ended_at: ended,
                    duration_secs: (ended - started).num_seconds().max(0) as u64,
                    completed: false,
                };
                if let Err(err) = db.record_session(&record) {
                    tracing::warn!(%err, "failed to record skipped session");
                }
            }
            let event = machine.skip();
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        TimerAction::Reset { all } => {
            let scope = if all {
                ResetScope::All
            } else {
                ResetScope::Current
            };
            let event = machine.reset(scope);
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        TimerAction::Status => {
            let completed = machine.tick(now_ms(), machine.epoch());
            println!("{}", serde_json::to_string_pretty(&machine.snapshot())?);
            if let Some(event) = completed {
                handle_completion(&event, &config, &db);
                println!("{}", serde_json::to_string_pretty(&event)?);
            }
        }
        TimerAction::Watch => {
            let rt = tokio::runtime::Runtime::new()?;
            machine = rt.block_on(watch(machine, &config))?;
        }
    }

    save_machine(&db, &machine)?;
    Ok(())
}

/// Foreground session: a live tick engine drives the serialized service;
/// the terminal renders the countdown until the cycle completes or Ctrl-C.
async fn watch(
    machine: SessionMachine,
    config: &Config,
) -> Result<SessionMachine, Box<dyn std::error::Error>> {
    let (ticker, ticker_rx) = Ticker::spawn();
    let notifier = TerminalNotifier::new(config.notifications.clone());
    let sink = SessionLog::new(Database::open()?);
    let handle = SessionService::spawn(machine, ticker, ticker_rx, notifier, sink);
    let mut events = handle.subscribe();
    let mut state_rx = handle.watch_state();

    let outcome = handle.start().await?;
    if let Some(warning) = outcome.audio_warning {
        eprintln!("warning: {warning}");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.pause()?;
                println!();
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let s = state_rx.borrow_and_update().clone();
                print!(
                    "\r{:>5} {}/{}  {:02}:{:02}  ",
                    s.mode.as_str(),
                    s.current_iteration,
                    s.total_iterations,
                    s.remaining_secs / 60,
                    s.remaining_secs % 60,
                );
                let _ = std::io::stdout().flush();
            }
            event = events.recv() => {
                match event {
                    Ok(Event::SegmentCompleted { next_mode, next_iteration, cycle_complete, .. }) => {
                        println!();
                        println!(
                            "segment complete -> {} (iteration {next_iteration})",
                            next_mode.as_str()
                        );
                        if !cycle_complete {
                            // Under the manual-advance policy the caller
                            // restarts; with auto_advance this is a no-op.
                            handle.start().await?;
                        }
                    }
                    Ok(Event::CycleCompleted { iterations, .. }) => {
                        println!();
                        println!("cycle complete: {iterations} iterations done");
                        handle.pause()?;
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    let machine = handle.export_machine().await?;
    handle.shutdown()?;
    Ok(machine)
}
