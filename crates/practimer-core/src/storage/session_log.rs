//! Fire-and-forget session recording.
//!
//! The session service hands finished segments to a [`SessionSink`] and
//! moves on; a failed write must never roll back or block a state
//! transition. [`SessionLog`] keeps failed records in a bounded local queue
//! and retries them on the next write, which is the whole of the retry
//! contract — delivery is at most once.

use std::collections::VecDeque;

use tracing::warn;

use super::database::Database;
use crate::events::SessionRecord;

/// Oldest queued records are dropped beyond this.
const MAX_PENDING: usize = 64;

pub trait SessionSink: Send {
    /// Persist one record. Must not fail outward.
    fn record(&mut self, record: SessionRecord);
}

/// Sink that drops everything. Headless and test use.
#[derive(Debug, Default)]
pub struct NullSink;

impl SessionSink for NullSink {
    fn record(&mut self, _record: SessionRecord) {}
}

/// Sink backed by the SQLite database, with a local retry queue.
pub struct SessionLog {
    db: Database,
    pending: VecDeque<SessionRecord>,
}

impl SessionLog {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            pending: VecDeque::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn flush_pending(&mut self) {
        while let Some(front) = self.pending.front() {
            match self.db.record_session(front) {
                Ok(_) => {
                    self.pending.pop_front();
                }
                Err(err) => {
                    warn!(%err, queued = self.pending.len(), "session log retry failed");
                    return;
                }
            }
        }
    }
}

impl SessionSink for SessionLog {
    fn record(&mut self, record: SessionRecord) {
        self.flush_pending();
        if let Err(err) = self.db.record_session(&record) {
            warn!(%err, "session record failed; queued for retry");
            if self.pending.len() >= MAX_PENDING {
                self.pending.pop_front();
            }
            self.pending.push_back(record);
        }
    }
}
