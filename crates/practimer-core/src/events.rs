use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{Mode, ResetScope};

/// Every state change in the session produces an Event.
/// The UI subscribes to the stream; collaborators receive copies, never
/// mutation access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        mode: Mode,
        iteration: u32,
        remaining_secs: u64,
        epoch: u64,
        at: DateTime<Utc>,
    },
    SessionPaused {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    /// A segment ran down to zero. Fired exactly once per segment.
    SegmentCompleted {
        previous_mode: Mode,
        next_mode: Mode,
        next_iteration: u32,
        /// True only when a Break at the last iteration wrapped back to
        /// Work/iteration 1.
        cycle_complete: bool,
        duration_secs: u64,
        started_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    /// The distinguished wrap event: all iterations finished.
    CycleCompleted {
        iterations: u32,
        at: DateTime<Utc>,
    },
    /// Same transition as a completion, but silent: no notifier hooks fire.
    SessionSkipped {
        previous_mode: Mode,
        next_mode: Mode,
        next_iteration: u32,
        at: DateTime<Utc>,
    },
    SessionReset {
        scope: ResetScope,
        at: DateTime<Utc>,
    },
    Reconfigured {
        work_minutes: u32,
        break_minutes: u32,
        iterations: u32,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        mode: Mode,
        remaining_secs: u64,
        total_secs: u64,
        is_running: bool,
        current_iteration: u32,
        total_iterations: u32,
        /// 0.0 .. 1.0 progress within the current segment.
        progress: f64,
        at: DateTime<Utc>,
    },
}

/// A finished (or abandoned) segment, handed to the persistence
/// collaborator. Fire-and-forget, at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub kind: Mode,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub completed: bool,
}
