//! Serialized session service.
//!
//! A single tokio task owns the [`SessionMachine`] and is its only writer.
//! Commands from the UI and signals from the tick engine land on channels
//! and are processed one at a time, so no operation ever runs reentrantly
//! from within another's completion handling. Collaborator failures are
//! contained here: a notifier or persistence problem is logged and the
//! countdown keeps going.

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;

use super::config::TimerConfig;
use super::machine::{now_ms, ResetScope, SessionMachine, SessionState};
use crate::error::{AudioResumeError, ConfigError, CoreError};
use crate::events::{Event, SessionRecord};
use crate::notify::Notifier;
use crate::storage::SessionSink;
use crate::ticker::{TickerControl, TickerSignal};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result of a start request. Audio failure is a warning, not an error:
/// the countdown runs either way.
#[derive(Debug)]
pub struct StartOutcome {
    /// False when the machine was already running (no-op).
    pub started: bool,
    pub audio_warning: Option<AudioResumeError>,
}

enum Command {
    Start {
        reply: oneshot::Sender<StartOutcome>,
    },
    Pause,
    Skip,
    Reset(ResetScope),
    Reconfigure {
        config: TimerConfig,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    Export {
        reply: oneshot::Sender<SessionMachine>,
    },
    Shutdown,
}

/// Cloneable handle to a running session service.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    event_tx: broadcast::Sender<Event>,
}

impl SessionHandle {
    /// Begin (or resume) the countdown.
    pub async fn start(&self) -> Result<StartOutcome, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start { reply })
            .map_err(|_| CoreError::ServiceClosed)?;
        rx.await.map_err(|_| CoreError::ServiceClosed)
    }

    pub fn pause(&self) -> Result<(), CoreError> {
        self.cmd_tx
            .send(Command::Pause)
            .map_err(|_| CoreError::ServiceClosed)
    }

    pub fn skip(&self) -> Result<(), CoreError> {
        self.cmd_tx
            .send(Command::Skip)
            .map_err(|_| CoreError::ServiceClosed)
    }

    pub fn reset(&self, scope: ResetScope) -> Result<(), CoreError> {
        self.cmd_tx
            .send(Command::Reset(scope))
            .map_err(|_| CoreError::ServiceClosed)
    }

    pub async fn reconfigure(&self, config: TimerConfig) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Reconfigure { config, reply })
            .map_err(|_| CoreError::ServiceClosed)?;
        rx.await.map_err(|_| CoreError::ServiceClosed)?.map_err(CoreError::from)
    }

    /// Clone out the machine, e.g. to persist it between invocations.
    pub async fn export_machine(&self) -> Result<SessionMachine, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Export { reply })
            .map_err(|_| CoreError::ServiceClosed)?;
        rx.await.map_err(|_| CoreError::ServiceClosed)
    }

    pub fn shutdown(&self) -> Result<(), CoreError> {
        self.cmd_tx
            .send(Command::Shutdown)
            .map_err(|_| CoreError::ServiceClosed)
    }

    /// Current read-only state projection.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel delivering every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}

/// Spawns the service task around a machine, a tick engine, a notifier and
/// a session sink. Must be called from within a tokio runtime.
pub struct SessionService;

impl SessionService {
    pub fn spawn<T, N, S>(
        machine: SessionMachine,
        ticker: T,
        ticker_rx: mpsc::UnboundedReceiver<TickerSignal>,
        notifier: N,
        sink: S,
    ) -> SessionHandle
    where
        T: TickerControl + 'static,
        N: Notifier + 'static,
        S: SessionSink + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let handle = SessionHandle {
            cmd_tx,
            state_rx,
            event_tx: event_tx.clone(),
        };
        tokio::spawn(run(
            machine, ticker, ticker_rx, notifier, sink, cmd_rx, state_tx, event_tx,
        ));
        handle
    }
}

#[allow(clippy::too_many_arguments)]
async fn run<T, N, S>(
    mut machine: SessionMachine,
    ticker: T,
    mut ticker_rx: mpsc::UnboundedReceiver<TickerSignal>,
    notifier: N,
    mut sink: S,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SessionState>,
    event_tx: broadcast::Sender<Event>,
) where
    T: TickerControl,
    N: Notifier,
    S: SessionSink,
{
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Start { reply } => {
                        let audio_warning = notifier.resume_audio().err();
                        if let Some(ref err) = audio_warning {
                            warn!(%err, "audio resume failed; countdown unaffected");
                        }
                        let started = match machine.start(now_ms()) {
                            Some(event) => {
                                ticker.start(machine.remaining_secs(), machine.epoch());
                                let _ = event_tx.send(event);
                                true
                            }
                            None => false,
                        };
                        let _ = reply.send(StartOutcome {
                            started,
                            audio_warning,
                        });
                    }
                    Command::Pause => {
                        if let Some(event) = machine.pause(now_ms()) {
                            ticker.pause();
                            let _ = event_tx.send(event);
                        }
                    }
                    Command::Skip => {
                        let started_at = machine.segment_started_at();
                        let mode = machine.mode();
                        let event = machine.skip();
                        ticker.reset(machine.remaining_secs(), machine.epoch());
                        // Abandoned segments are recorded too, flagged
                        // incomplete, when they ever ran.
                        if let Some(started) = started_at {
                            let ended = Utc::now();
                            let elapsed = (ended - started).num_seconds().max(0) as u64;
                            sink.record(SessionRecord {
                                kind: mode,
                                started_at: started,
                                ended_at: ended,
                                duration_secs: elapsed,
                                completed: false,
                            });
                        }
                        let _ = event_tx.send(event);
                    }
                    Command::Reset(scope) => {
                        let event = machine.reset(scope);
                        ticker.reset(machine.remaining_secs(), machine.epoch());
                        let _ = event_tx.send(event);
                    }
                    Command::Reconfigure { config, reply } => match machine.reconfigure(config) {
                        Ok(event) => {
                            ticker.reset(machine.remaining_secs(), machine.epoch());
                            let _ = event_tx.send(event);
                            let _ = reply.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = reply.send(Err(err));
                        }
                    },
                    Command::Export { reply } => {
                        let _ = reply.send(machine.clone());
                    }
                    Command::Shutdown => break,
                }
                let _ = state_tx.send(machine.state());
            }
            signal = ticker_rx.recv() => {
                let Some(signal) = signal else { break };
                let (epoch, ticker_remaining) = match signal {
                    TickerSignal::Tick { remaining_secs, epoch } => (epoch, Some(remaining_secs)),
                    TickerSignal::Completed { epoch } => (epoch, None),
                };
                if epoch != machine.epoch() {
                    // Stale stream from before a start/reset boundary.
                    continue;
                }
                match machine.tick(now_ms(), epoch) {
                    Some(event) => handle_completion(
                        event,
                        &machine,
                        &ticker,
                        &notifier,
                        &mut sink,
                        &event_tx,
                    ),
                    None => {
                        // Drift correction may have moved the count; keep
                        // the ticker's copy in line.
                        if let Some(r) = ticker_remaining {
                            if r != machine.remaining_secs() {
                                ticker.update_time(machine.remaining_secs());
                            }
                        }
                    }
                }
                let _ = state_tx.send(machine.state());
            }
        }
    }
    // Teardown releases the tick engine.
    ticker.pause();
}

fn handle_completion<T, N, S>(
    event: Event,
    machine: &SessionMachine,
    ticker: &T,
    notifier: &N,
    sink: &mut S,
    event_tx: &broadcast::Sender<Event>,
) where
    T: TickerControl,
    N: Notifier,
    S: SessionSink,
{
    let Event::SegmentCompleted {
        previous_mode,
        cycle_complete,
        duration_secs,
        started_at,
        at,
        ..
    } = &event
    else {
        return;
    };
    let (previous_mode, cycle_complete, duration_secs, at) =
        (*previous_mode, *cycle_complete, *duration_secs, *at);

    let started = started_at.unwrap_or(at - chrono::Duration::seconds(duration_secs as i64));
    sink.record(SessionRecord {
        kind: previous_mode,
        started_at: started,
        ended_at: at,
        duration_secs,
        completed: true,
    });

    notifier.segment_completed(&event);
    let _ = event_tx.send(event);

    if cycle_complete {
        let cycle_event = Event::CycleCompleted {
            iterations: machine.total_iterations(),
            at,
        };
        notifier.cycle_completed(&cycle_event);
        let _ = event_tx.send(cycle_event);
    }

    if machine.is_running() {
        // auto_advance chained into the next segment under a fresh epoch.
        ticker.start(machine.remaining_secs(), machine.epoch());
    } else {
        ticker.reset(machine.remaining_secs(), machine.epoch());
    }
}
