//! SQLite-based session history and statistics.
//!
//! Provides persistent storage for:
//! - Finished (and skipped) work/break segments
//! - Session statistics (daily and all-time)
//! - Key-value store for application state (the CLI persists the state
//!   machine here between invocations)

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::DatabaseError;
use crate::events::SessionRecord;

/// A session row as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub id: i64,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stats {
    pub total_sessions: u64,
    pub completed_work_sessions: u64,
    pub total_work_secs: u64,
    pub total_break_secs: u64,
    pub today_work_sessions: u64,
    pub today_work_secs: u64,
}

/// SQLite database for session history.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/practimer/practimer.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let path = data_dir()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .join("practimer.db");
        let conn = Connection::open(&path)
            .map_err(|source| DatabaseError::OpenFailed { path, source })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (tests, throwaway use).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::from)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                kind          TEXT NOT NULL,
                started_at    TEXT NOT NULL,
                ended_at      TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                completed     INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_ended_at ON sessions(ended_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_kind ON sessions(kind);",
        )?;
        Ok(())
    }

    /// Insert one session record.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn record_session(&self, record: &SessionRecord) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO sessions (kind, started_at, ended_at, duration_secs, completed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.kind.as_str(),
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                record.duration_secs,
                record.completed,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent sessions, newest first.
    pub fn recent_sessions(&self, limit: u32) -> Result<Vec<StoredSession>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, started_at, ended_at, duration_secs, completed
             FROM sessions ORDER BY ended_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u64>(4)?,
                row.get::<_, bool>(5)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, kind, started_at, ended_at, duration_secs, completed) = row?;
            sessions.push(StoredSession {
                id,
                kind,
                started_at: parse_timestamp(&started_at)?,
                ended_at: parse_timestamp(&ended_at)?,
                duration_secs,
                completed,
            });
        }
        Ok(sessions)
    }

    pub fn stats_today(&self) -> Result<Stats, DatabaseError> {
        let midnight = today_midnight();
        let mut stmt = self.conn.prepare(
            "SELECT kind, completed, COUNT(*), COALESCE(SUM(duration_secs), 0)
             FROM sessions
             WHERE ended_at >= ?1
             GROUP BY kind, completed",
        )?;
        let mut stats = collect_stats(&mut stmt, params![midnight])?;
        stats.today_work_sessions = stats.completed_work_sessions;
        stats.today_work_secs = stats.total_work_secs;
        Ok(stats)
    }

    pub fn stats_all(&self) -> Result<Stats, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, completed, COUNT(*), COALESCE(SUM(duration_secs), 0)
             FROM sessions
             GROUP BY kind, completed",
        )?;
        let mut stats = collect_stats(&mut stmt, [])?;

        let mut stmt2 = self.conn.prepare(
            "SELECT COUNT(*), COALESCE(SUM(duration_secs), 0)
             FROM sessions
             WHERE kind = 'work' AND completed = 1 AND ended_at >= ?1",
        )?;
        let row = stmt2.query_row(params![today_midnight()], |row| {
            Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?))
        })?;
        stats.today_work_sessions = row.0;
        stats.today_work_secs = row.1;

        Ok(stats)
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

fn today_midnight() -> String {
    format!("{}T00:00:00+00:00", Utc::now().format("%Y-%m-%d"))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::QueryFailed(format!("bad timestamp '{s}': {e}")))
}

fn collect_stats<P: rusqlite::Params>(
    stmt: &mut rusqlite::Statement<'_>,
    params: P,
) -> Result<Stats, DatabaseError> {
    let mut stats = Stats::default();
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, bool>(1)?,
            row.get::<_, u64>(2)?,
            row.get::<_, u64>(3)?,
        ))
    })?;

    for row in rows {
        let (kind, completed, count, secs) = row?;
        stats.total_sessions += count;
        match kind.as_str() {
            "work" => {
                stats.total_work_secs += secs;
                if completed {
                    stats.completed_work_sessions += count;
                }
            }
            "break" => {
                stats.total_break_secs += secs;
            }
            _ => {}
        }
    }
    Ok(stats)
}
