//! Session state machine.
//!
//! The machine is wall-clock-based and has no internal threads: the caller
//! (the session service, or the CLI doing a catch-up on load) supplies
//! `now_ms` and invokes `tick()` as time passes. Remaining time is
//! drift-corrected against the segment deadline, so late or missed ticks
//! never lose time.
//!
//! ## States
//!
//! ```text
//! Idle/Paused <-> Running
//! ```
//!
//! with the orthogonal dimension `mode` (work/break) and the iteration
//! counter. Completed work segments transition to a break of the same
//! iteration; completed breaks advance the iteration, wrapping to 1 after
//! the last one (cycle complete).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{Mode, TickStrategy, TimerConfig};
use crate::events::Event;

/// Gap after which the decrement strategy re-syncs against the anchor.
const RECONCILE_THRESHOLD_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    /// Re-derive the current mode's full duration; mode and iteration keep.
    Current,
    /// Back to work mode, iteration 1.
    All,
}

/// Read-only projection of the machine for UI display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub mode: Mode,
    pub remaining_secs: u64,
    pub total_secs: u64,
    pub is_running: bool,
    pub current_iteration: u32,
    pub total_iterations: u32,
    pub epoch: u64,
}

/// Core session state machine.
///
/// Mutated exclusively through its own operations; collaborators only ever
/// see [`SessionState`] copies and [`Event`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMachine {
    config: TimerConfig,
    mode: Mode,
    remaining_secs: u64,
    total_secs: u64,
    is_running: bool,
    current_iteration: u32,
    /// Wall-clock ms at which the countdown was last (re)started; `None`
    /// while not running.
    #[serde(default)]
    anchor_epoch_ms: Option<u64>,
    /// Remaining seconds at the anchor. Together with the anchor this fixes
    /// the segment deadline.
    #[serde(default)]
    anchor_remaining_secs: u64,
    /// Generation counter, bumped on every start and every transition.
    /// Ticks tagged with an older epoch are discarded.
    #[serde(default)]
    epoch: u64,
    /// Wall-clock ms of the last decrement-strategy reconciliation.
    #[serde(default)]
    last_reconcile_ms: Option<u64>,
    /// Wall time at which the current segment first started running.
    #[serde(default)]
    segment_started_at: Option<DateTime<Utc>>,
}

impl SessionMachine {
    /// Seed a fresh machine from a validated configuration: work mode,
    /// iteration 1, full work duration, not running.
    pub fn new(config: TimerConfig) -> Self {
        let total = config.duration_secs(Mode::Work);
        Self {
            config,
            mode: Mode::Work,
            remaining_secs: total,
            total_secs: total,
            is_running: false,
            current_iteration: 1,
            anchor_epoch_ms: None,
            anchor_remaining_secs: total,
            epoch: 0,
            last_reconcile_ms: None,
            segment_started_at: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn total_secs(&self) -> u64 {
        self.total_secs
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn current_iteration(&self) -> u32 {
        self.current_iteration
    }

    pub fn total_iterations(&self) -> u32 {
        self.config.iterations
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn segment_started_at(&self) -> Option<DateTime<Utc>> {
        self.segment_started_at
    }

    /// 0.0 .. 1.0 progress within the current segment.
    pub fn progress(&self) -> f64 {
        if self.total_secs == 0 {
            return 0.0;
        }
        1.0 - (self.remaining_secs as f64 / self.total_secs as f64)
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            mode: self.mode,
            remaining_secs: self.remaining_secs,
            total_secs: self.total_secs,
            is_running: self.is_running,
            current_iteration: self.current_iteration,
            total_iterations: self.config.iterations,
            epoch: self.epoch,
        }
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            mode: self.mode,
            remaining_secs: self.remaining_secs,
            total_secs: self.total_secs,
            is_running: self.is_running,
            current_iteration: self.current_iteration,
            total_iterations: self.config.iterations,
            progress: self.progress(),
            at: Utc::now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Anchor the countdown at `now_ms` and begin running.
    ///
    /// No-op when already running. Audio-context resume is the service's
    /// side effect; its failure never blocks the countdown.
    pub fn start(&mut self, now_ms: u64) -> Option<Event> {
        if self.is_running {
            return None;
        }
        self.is_running = true;
        self.anchor_epoch_ms = Some(now_ms);
        self.anchor_remaining_secs = self.remaining_secs;
        self.last_reconcile_ms = Some(now_ms);
        self.epoch += 1;
        if self.segment_started_at.is_none() {
            self.segment_started_at = Some(Utc::now());
        }
        Some(Event::SessionStarted {
            mode: self.mode,
            iteration: self.current_iteration,
            remaining_secs: self.remaining_secs,
            epoch: self.epoch,
            at: Utc::now(),
        })
    }

    /// Freeze the countdown at its drift-corrected remaining time.
    ///
    /// No-op when already paused.
    pub fn pause(&mut self, now_ms: u64) -> Option<Event> {
        if !self.is_running {
            return None;
        }
        self.remaining_secs = self.anchored_remaining(now_ms);
        self.is_running = false;
        self.anchor_epoch_ms = None;
        self.last_reconcile_ms = None;
        Some(Event::SessionPaused {
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Apply one tick. Returns `Some(Event::SegmentCompleted)` when the
    /// segment runs down to zero; completion fires exactly once per
    /// segment (later ticks carry a stale epoch and are discarded).
    pub fn tick(&mut self, now_ms: u64, epoch: u64) -> Option<Event> {
        if !self.is_running || epoch != self.epoch {
            return None;
        }
        match self.config.tick_strategy {
            TickStrategy::Anchor => {
                self.remaining_secs = self.anchored_remaining(now_ms);
            }
            TickStrategy::Decrement => {
                self.remaining_secs = self.remaining_secs.saturating_sub(1);
                let overdue = self
                    .last_reconcile_ms
                    .map_or(true, |last| now_ms.saturating_sub(last) > RECONCILE_THRESHOLD_MS);
                if overdue {
                    self.remaining_secs = self.anchored_remaining(now_ms);
                    self.last_reconcile_ms = Some(now_ms);
                }
            }
        }
        if self.remaining_secs == 0 {
            return Some(self.complete_segment(now_ms));
        }
        None
    }

    /// Perform the completion transition immediately, without the
    /// notifications of a natural completion.
    pub fn skip(&mut self) -> Event {
        let previous_mode = self.mode;
        let (next_mode, next_iteration, _) = self.next_segment();
        self.enter_segment(next_mode, next_iteration);
        Event::SessionSkipped {
            previous_mode,
            next_mode,
            next_iteration,
            at: Utc::now(),
        }
    }

    /// Always safe to call; always stops running first.
    pub fn reset(&mut self, scope: ResetScope) -> Event {
        match scope {
            ResetScope::Current => {
                let (mode, iteration) = (self.mode, self.current_iteration);
                self.enter_segment(mode, iteration);
            }
            ResetScope::All => self.enter_segment(Mode::Work, 1),
        }
        Event::SessionReset {
            scope,
            at: Utc::now(),
        }
    }

    /// Swap in a new configuration and rebase the current segment to its
    /// new duration. Stops running first so an in-flight tick cannot race
    /// the rebase.
    pub fn reconfigure(&mut self, config: TimerConfig) -> Result<Event, crate::error::ConfigError> {
        config.validate()?;
        self.config = config;
        let iteration = self.current_iteration.min(self.config.iterations);
        let mode = self.mode;
        self.enter_segment(mode, iteration);
        Ok(Event::Reconfigured {
            work_minutes: self.config.work_minutes,
            break_minutes: self.config.break_minutes,
            iterations: self.config.iterations,
            at: Utc::now(),
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Remaining seconds computed from the segment deadline, rounded up,
    /// clamped to `[0, total_secs]`. A callback firing late reads 0 rather
    /// than going negative.
    fn anchored_remaining(&self, now_ms: u64) -> u64 {
        let Some(anchor) = self.anchor_epoch_ms else {
            return self.remaining_secs;
        };
        let deadline = anchor.saturating_add(self.anchor_remaining_secs.saturating_mul(1000));
        if now_ms >= deadline {
            return 0;
        }
        ((deadline - now_ms + 999) / 1000).min(self.total_secs)
    }

    fn next_segment(&self) -> (Mode, u32, bool) {
        match self.mode {
            Mode::Work => (Mode::Break, self.current_iteration, false),
            Mode::Break => {
                let next = self.current_iteration + 1;
                if next > self.config.iterations {
                    (Mode::Work, 1, true)
                } else {
                    (Mode::Work, next, false)
                }
            }
        }
    }

    fn complete_segment(&mut self, now_ms: u64) -> Event {
        let previous_mode = self.mode;
        let duration_secs = self.total_secs;
        let started_at = self.segment_started_at;
        let (next_mode, next_iteration, cycle_complete) = self.next_segment();
        self.enter_segment(next_mode, next_iteration);
        if self.config.auto_advance {
            // Chain straight into the next segment under a fresh epoch.
            let _ = self.start(now_ms);
        }
        Event::SegmentCompleted {
            previous_mode,
            next_mode,
            next_iteration,
            cycle_complete,
            duration_secs,
            started_at,
            at: Utc::now(),
        }
    }

    /// Move to the given segment at its full duration, stopped. Bumps the
    /// epoch so ticks from the previous segment are inert.
    fn enter_segment(&mut self, mode: Mode, iteration: u32) {
        self.mode = mode;
        self.current_iteration = iteration;
        self.total_secs = self.config.duration_secs(mode);
        self.remaining_secs = self.total_secs;
        self.anchor_remaining_secs = self.total_secs;
        self.is_running = false;
        self.anchor_epoch_ms = None;
        self.last_reconcile_ms = None;
        self.segment_started_at = None;
        self.epoch += 1;
    }
}

/// Wall-clock milliseconds since the Unix epoch — the default clock source
/// for callers driving the machine directly.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SessionMachine {
        SessionMachine::new(TimerConfig::default())
    }

    #[test]
    fn initialize_seeds_work_segment() {
        let m = machine();
        assert_eq!(m.mode(), Mode::Work);
        assert_eq!(m.current_iteration(), 1);
        assert_eq!(m.remaining_secs(), 25 * 60);
        assert_eq!(m.total_secs(), 25 * 60);
        assert!(!m.is_running());
    }

    #[test]
    fn start_is_noop_while_running() {
        let mut m = machine();
        assert!(m.start(1_000).is_some());
        let epoch = m.epoch();
        assert!(m.start(2_000).is_none());
        assert_eq!(m.epoch(), epoch);
    }

    #[test]
    fn pause_twice_equals_pause_once() {
        let mut m = machine();
        m.start(0);
        assert!(m.pause(3_000).is_some());
        let state = m.state();
        assert!(m.pause(4_000).is_none());
        assert_eq!(m.state(), state);
        assert_eq!(state.remaining_secs, 25 * 60 - 3);
    }

    #[test]
    fn running_implies_anchor() {
        let mut m = machine();
        m.start(500);
        assert!(m.anchor_epoch_ms.is_some());
        m.pause(1_500);
        assert!(m.anchor_epoch_ms.is_none());
    }

    #[test]
    fn late_tick_clamps_to_zero_and_completes_once() {
        let mut m = machine();
        m.start(0);
        let epoch = m.epoch();
        // 25 min segment, callback 500 ms late past the deadline.
        let event = m.tick(25 * 60 * 1000 + 500, epoch);
        match event {
            Some(Event::SegmentCompleted {
                previous_mode,
                next_mode,
                next_iteration,
                cycle_complete,
                ..
            }) => {
                assert_eq!(previous_mode, Mode::Work);
                assert_eq!(next_mode, Mode::Break);
                assert_eq!(next_iteration, 1);
                assert!(!cycle_complete);
            }
            other => panic!("expected SegmentCompleted, got {other:?}"),
        }
        // Two stale ticks from the finished epoch must be inert.
        assert!(m.tick(25 * 60 * 1000 + 1500, epoch).is_none());
        assert!(m.tick(25 * 60 * 1000 + 2500, epoch).is_none());
        assert_eq!(m.mode(), Mode::Break);
        assert_eq!(m.remaining_secs(), 5 * 60);
        assert!(!m.is_running());
    }

    #[test]
    fn partial_tick_rounds_up() {
        let mut m = machine();
        m.start(0);
        // 400 ms in: a full 1500 s should still be displayed as 1500.
        assert!(m.tick(400, m.epoch()).is_none());
        assert_eq!(m.remaining_secs(), 25 * 60);
        // 1400 ms in: one second gone.
        assert!(m.tick(1_400, m.epoch()).is_none());
        assert_eq!(m.remaining_secs(), 25 * 60 - 1);
    }

    #[test]
    fn iteration_wraps_after_last_break() {
        let mut m = machine();
        // Drive to break of iteration 4 by skipping.
        for _ in 0..7 {
            m.skip();
        }
        assert_eq!(m.mode(), Mode::Break);
        assert_eq!(m.current_iteration(), 4);

        m.start(0);
        let event = m.tick(5 * 60 * 1000, m.epoch());
        match event {
            Some(Event::SegmentCompleted {
                next_mode,
                next_iteration,
                cycle_complete,
                ..
            }) => {
                assert_eq!(next_mode, Mode::Work);
                assert_eq!(next_iteration, 1);
                assert!(cycle_complete);
            }
            other => panic!("expected SegmentCompleted, got {other:?}"),
        }
        assert_eq!(m.current_iteration(), 1);
    }

    #[test]
    fn single_iteration_cycle_returns_to_start() {
        let mut cfg = TimerConfig::default();
        cfg.iterations = 1;
        let mut m = SessionMachine::new(cfg);

        m.start(0);
        m.tick(25 * 60 * 1000, m.epoch());
        assert_eq!(m.mode(), Mode::Break);
        assert_eq!(m.current_iteration(), 1);

        m.start(25 * 60 * 1000);
        let event = m.tick(30 * 60 * 1000, m.epoch());
        match event {
            Some(Event::SegmentCompleted { cycle_complete, .. }) => assert!(cycle_complete),
            other => panic!("expected SegmentCompleted, got {other:?}"),
        }
        assert_eq!(m.mode(), Mode::Work);
        assert_eq!(m.current_iteration(), 1);
    }

    #[test]
    fn skip_is_a_silent_transition() {
        let mut m = machine();
        m.skip(); // work 1 -> break 1
        m.skip(); // break 1 -> work 2
        let event = m.skip(); // work 2 -> break 2
        match event {
            Event::SessionSkipped {
                previous_mode,
                next_mode,
                next_iteration,
                ..
            } => {
                assert_eq!(previous_mode, Mode::Work);
                assert_eq!(next_mode, Mode::Break);
                assert_eq!(next_iteration, 2);
            }
            other => panic!("expected SessionSkipped, got {other:?}"),
        }
    }

    #[test]
    fn reset_current_keeps_mode_and_iteration() {
        let mut m = machine();
        m.skip(); // now in break, iteration 1, total 300
        m.start(0);
        m.tick(200_000, m.epoch());
        assert_eq!(m.remaining_secs(), 100);

        m.reset(ResetScope::Current);
        assert_eq!(m.mode(), Mode::Break);
        assert_eq!(m.current_iteration(), 1);
        assert_eq!(m.remaining_secs(), 300);
        assert_eq!(m.total_secs(), 300);
        assert!(!m.is_running());
    }

    #[test]
    fn reset_all_returns_to_work_iteration_one() {
        let mut m = machine();
        for _ in 0..3 {
            m.skip();
        }
        m.start(0);
        m.reset(ResetScope::All);
        assert_eq!(m.mode(), Mode::Work);
        assert_eq!(m.current_iteration(), 1);
        assert_eq!(m.remaining_secs(), 25 * 60);
        assert!(!m.is_running());
    }

    #[test]
    fn reconfigure_rebases_current_segment() {
        let mut m = machine();
        m.start(0);
        m.tick(60_000, m.epoch());
        assert_eq!(m.remaining_secs(), 24 * 60);

        let mut cfg = TimerConfig::default();
        cfg.work_minutes = 30;
        m.reconfigure(cfg).unwrap();
        assert_eq!(m.total_secs(), 30 * 60);
        assert_eq!(m.remaining_secs(), 30 * 60);
        assert!(!m.is_running());
    }

    #[test]
    fn reconfigure_rejects_invalid_values() {
        let mut m = machine();
        let mut cfg = TimerConfig::default();
        cfg.iterations = 0;
        assert!(m.reconfigure(cfg).is_err());
        // State untouched on rejection.
        assert_eq!(m.total_iterations(), 4);
    }

    #[test]
    fn reconfigure_clamps_iteration_into_new_range() {
        let mut cfg = TimerConfig::default();
        cfg.iterations = 8;
        let mut m = SessionMachine::new(cfg);
        for _ in 0..12 {
            m.skip(); // lands on work, iteration 7
        }
        assert_eq!(m.current_iteration(), 7);

        let mut smaller = TimerConfig::default();
        smaller.iterations = 2;
        m.reconfigure(smaller).unwrap();
        assert_eq!(m.current_iteration(), 2);
    }

    #[test]
    fn stale_epoch_tick_is_discarded() {
        let mut m = machine();
        m.start(0);
        let old_epoch = m.epoch();
        m.reset(ResetScope::Current);
        m.start(10_000);
        // A tick from before the reset arrives late; it must not touch the
        // fresh countdown.
        assert!(m.tick(9_000, old_epoch).is_none());
        assert_eq!(m.remaining_secs(), 25 * 60);
    }

    #[test]
    fn decrement_strategy_reconciles_after_gap() {
        let mut cfg = TimerConfig::default();
        cfg.tick_strategy = TickStrategy::Decrement;
        let mut m = SessionMachine::new(cfg);
        m.start(0);
        let epoch = m.epoch();
        // Normal cadence: plain decrements.
        m.tick(1_000, epoch);
        m.tick(2_000, epoch);
        assert_eq!(m.remaining_secs(), 25 * 60 - 2);
        // A throttled context delivers the next tick 30 s later; the
        // reconciliation resynchronizes against real elapsed time.
        m.tick(32_000, epoch);
        assert_eq!(m.remaining_secs(), 25 * 60 - 32);
    }

    #[test]
    fn auto_advance_chains_into_next_segment() {
        let mut cfg = TimerConfig::default();
        cfg.auto_advance = true;
        let mut m = SessionMachine::new(cfg);
        m.start(0);
        let event = m.tick(25 * 60 * 1000, m.epoch());
        assert!(matches!(event, Some(Event::SegmentCompleted { .. })));
        assert_eq!(m.mode(), Mode::Break);
        assert!(m.is_running());
        assert_eq!(m.remaining_secs(), 5 * 60);
        // The chained segment ticks under its own epoch.
        m.tick(25 * 60 * 1000 + 60_000, m.epoch());
        assert_eq!(m.remaining_secs(), 4 * 60);
    }

    #[test]
    fn pause_resume_preserves_remaining() {
        let mut m = machine();
        m.start(0);
        m.tick(120_000, m.epoch());
        m.pause(120_000);
        assert_eq!(m.remaining_secs(), 23 * 60);
        // Ten minutes later the countdown resumes where it froze.
        m.start(720_000);
        m.tick(721_000, m.epoch());
        assert_eq!(m.remaining_secs(), 23 * 60 - 1);
    }

    #[test]
    fn serde_roundtrip_preserves_state() {
        let mut m = machine();
        m.start(0);
        m.tick(5_000, m.epoch());
        let json = serde_json::to_string(&m).unwrap();
        let restored: SessionMachine = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.state(), m.state());
    }
}
