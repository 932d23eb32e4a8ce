//! Background tick engine.
//!
//! A dedicated tokio task owns a repeating 1-second interval and relays
//! simple commands; it carries no session logic. The task keeps ticking even
//! when the consumer is busy, so the countdown survives a stalled driver —
//! the state machine's drift correction absorbs whatever cadence actually
//! arrives.
//!
//! Each ticker is explicitly owned by its session service and dies with it;
//! there is no shared module-level instance. Signals are tagged with the
//! epoch given at `start`/`reset` so consumers can discard stale streams.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Commands a ticker accepts. Mirrors the narrow surface the session
/// service needs: start, pause, reset, update-time.
#[derive(Debug, Clone, Copy)]
enum TickerCommand {
    Start { remaining_secs: u64, epoch: u64 },
    Pause,
    Reset { remaining_secs: u64, epoch: u64 },
    UpdateTime { remaining_secs: u64 },
}

/// Signals emitted by the ticking task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerSignal {
    /// One second elapsed; `remaining_secs` is the ticker's own count.
    Tick { remaining_secs: u64, epoch: u64 },
    /// The count reached zero. Terminal: emitted once, then the loop idles
    /// until the next start.
    Completed { epoch: u64 },
}

/// Control half of a tick engine, held by the session service.
///
/// A trait so tests can drive the service with a scripted ticker.
pub trait TickerControl: Send {
    fn start(&self, remaining_secs: u64, epoch: u64);
    fn pause(&self);
    fn reset(&self, remaining_secs: u64, epoch: u64);
    fn update_time(&self, remaining_secs: u64);
}

/// Handle to a spawned ticking task.
///
/// Dropping the handle closes the command channel and ends the task.
pub struct Ticker {
    cmd_tx: mpsc::UnboundedSender<TickerCommand>,
}

impl Ticker {
    /// Spawn the ticking task. Returns the control handle and the signal
    /// stream. Must be called from within a tokio runtime.
    pub fn spawn() -> (Self, mpsc::UnboundedReceiver<TickerSignal>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(cmd_rx, signal_tx));
        (Self { cmd_tx }, signal_rx)
    }

    fn send(&self, cmd: TickerCommand) {
        // The task only exits when this handle is dropped, so a send error
        // means teardown is already underway.
        let _ = self.cmd_tx.send(cmd);
    }
}

impl TickerControl for Ticker {
    fn start(&self, remaining_secs: u64, epoch: u64) {
        self.send(TickerCommand::Start {
            remaining_secs,
            epoch,
        });
    }

    fn pause(&self) {
        self.send(TickerCommand::Pause);
    }

    fn reset(&self, remaining_secs: u64, epoch: u64) {
        self.send(TickerCommand::Reset {
            remaining_secs,
            epoch,
        });
    }

    fn update_time(&self, remaining_secs: u64) {
        self.send(TickerCommand::UpdateTime { remaining_secs });
    }
}

async fn run(
    mut cmd_rx: mpsc::UnboundedReceiver<TickerCommand>,
    signal_tx: mpsc::UnboundedSender<TickerSignal>,
) {
    let mut remaining_secs: u64 = 0;
    let mut epoch: u64 = 0;
    // At most one live interval; starting replaces any existing schedule.
    let mut interval: Option<time::Interval> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    TickerCommand::Start { remaining_secs: r, epoch: e } => {
                        remaining_secs = r;
                        epoch = e;
                        let mut iv = time::interval_at(
                            time::Instant::now() + TICK_PERIOD,
                            TICK_PERIOD,
                        );
                        iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        interval = Some(iv);
                        debug!(remaining_secs, epoch, "ticker started");
                    }
                    TickerCommand::Pause => {
                        interval = None;
                        debug!(epoch, "ticker paused");
                    }
                    TickerCommand::Reset { remaining_secs: r, epoch: e } => {
                        remaining_secs = r;
                        epoch = e;
                        interval = None;
                        debug!(remaining_secs, epoch, "ticker reset");
                    }
                    TickerCommand::UpdateTime { remaining_secs: r } => {
                        remaining_secs = r;
                    }
                }
            }
            _ = tick(&mut interval), if interval.is_some() => {
                remaining_secs = remaining_secs.saturating_sub(1);
                let signal = if remaining_secs == 0 {
                    interval = None;
                    TickerSignal::Completed { epoch }
                } else {
                    TickerSignal::Tick { remaining_secs, epoch }
                };
                if signal_tx.send(signal).is_err() {
                    break;
                }
            }
        }
    }
}

async fn tick(interval: &mut Option<time::Interval>) {
    match interval {
        Some(iv) => {
            iv.tick().await;
        }
        // Guarded by `if interval.is_some()` in the select arm.
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_count_down_then_single_terminal_signal() {
        let (ticker, mut rx) = Ticker::spawn();
        ticker.start(3, 7);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            rx.recv().await,
            Some(TickerSignal::Tick { remaining_secs: 2, epoch: 7 })
        );
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            rx.recv().await,
            Some(TickerSignal::Tick { remaining_secs: 1, epoch: 7 })
        );
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await, Some(TickerSignal::Completed { epoch: 7 }));

        // Nothing after the terminal signal.
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_delivery() {
        let (ticker, mut rx) = Ticker::spawn();
        ticker.start(60, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(rx.recv().await.is_some());

        ticker.pause();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_restart_yields_one_stream() {
        let (ticker, mut rx) = Ticker::spawn();
        ticker.start(60, 1);
        ticker.start(30, 2);
        ticker.start(10, 3);
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            rx.recv().await,
            Some(TickerSignal::Tick { remaining_secs: 9, epoch: 3 })
        );
        // Exactly one signal per period: no overlapping loops survived.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn update_time_rewrites_the_count() {
        let (ticker, mut rx) = Ticker::spawn();
        ticker.start(60, 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            rx.recv().await,
            Some(TickerSignal::Tick { remaining_secs: 59, epoch: 1 })
        );

        ticker.update_time(5);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            rx.recv().await,
            Some(TickerSignal::Tick { remaining_secs: 4, epoch: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_requires_new_start() {
        let (ticker, mut rx) = Ticker::spawn();
        ticker.start(60, 1);
        ticker.reset(30, 2);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        ticker.start(30, 3);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            rx.recv().await,
            Some(TickerSignal::Tick { remaining_secs: 29, epoch: 3 })
        );
    }
}
