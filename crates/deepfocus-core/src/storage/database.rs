//! SQLite-backed storage.
//!
//! Provides persistent storage for:
//! - Timer records (key-value table, the CLI's stand-in for browser storage)
//! - Session requests and their terminal outcomes
//! - Aggregate XP statistics

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{data_dir, KeyValueStore};
use crate::error::{CoreError, Result, StorageError};
use crate::session::{OutcomeStatus, SessionOutcome, SessionRequest, SessionStore};
use crate::xp::{SessionDuration, WillpowerLevel};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Stats {
    pub completed_sessions: u64,
    pub interrupted_sessions: u64,
    pub total_xp: u64,
    pub total_focus_min: u64,
    pub today_sessions: u64,
    pub today_xp: u64,
}

/// SQLite database for timer state and session history.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `<data_dir>/deepfocus.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("deepfocus.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_requests (
                session_id       TEXT PRIMARY KEY,
                user_id          TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                willpower        TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_outcomes (
                session_id       TEXT PRIMARY KEY,
                user_id          TEXT NOT NULL,
                status           TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                willpower        TEXT NOT NULL,
                xp               INTEGER NOT NULL,
                ended_at         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_outcomes_ended_at ON session_outcomes(ended_at);",
        )?;
        Ok(())
    }

    /// Aggregate statistics over all recorded outcomes.
    pub fn stats(&self) -> Result<Stats> {
        self.stats_at(Utc::now())
    }

    /// Like [`Database::stats`], with "today" taken as the UTC day of `now`.
    pub fn stats_at(&self, now: DateTime<Utc>) -> Result<Stats> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*), COALESCE(SUM(xp), 0), COALESCE(SUM(duration_minutes), 0)
             FROM session_outcomes
             GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, u64>(3)?,
            ))
        })?;

        let mut stats = Stats::default();
        for row in rows {
            let (status, count, xp, minutes) = row?;
            stats.total_xp += xp;
            match status.parse::<OutcomeStatus>()? {
                OutcomeStatus::Completed => {
                    stats.completed_sessions += count;
                    stats.total_focus_min += minutes;
                }
                OutcomeStatus::Interrupted => stats.interrupted_sessions += count,
            }
        }

        let today = now.format("%Y-%m-%d").to_string();
        let (today_sessions, today_xp) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(xp), 0)
             FROM session_outcomes
             WHERE ended_at >= ?1",
            params![format!("{today}T00:00:00+00:00")],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;
        stats.today_sessions = today_sessions;
        stats.today_xp = today_xp;

        Ok(stats)
    }

    /// Most recent outcomes, newest first.
    pub fn recent_outcomes(&self, limit: usize) -> Result<Vec<SessionOutcome>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, user_id, status, duration_minutes, willpower, xp, ended_at
             FROM session_outcomes
             ORDER BY ended_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], outcome_row)?;
        let mut outcomes = Vec::new();
        for row in rows {
            outcomes.push(decode_outcome(row?)?);
        }
        Ok(outcomes)
    }
}

type OutcomeRow = (String, String, String, u32, String, u32, String);

fn outcome_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutcomeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_outcome(row: OutcomeRow) -> Result<SessionOutcome> {
    let (session_id, user_id, status, duration_minutes, willpower, xp, ended_at) = row;
    let ended_at = DateTime::parse_from_rfc3339(&ended_at)
        .map_err(|e| CoreError::Custom(format!("bad ended_at for {session_id}: {e}")))?
        .with_timezone(&Utc);
    Ok(SessionOutcome {
        status: status.parse()?,
        willpower: willpower.parse::<WillpowerLevel>()?,
        session_id,
        user_id,
        duration_minutes,
        xp,
        ended_at,
    })
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| match StorageError::from(e) {
                StorageError::QuotaExceeded { .. } => StorageError::QuotaExceeded {
                    key: key.to_string(),
                },
                other => other,
            })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

impl SessionStore for Database {
    fn save_request(&self, req: &SessionRequest) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO session_requests (session_id, user_id, duration_minutes, willpower)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                req.session_id,
                req.user_id,
                req.duration.minutes(),
                req.willpower.as_str(),
            ],
        )?;
        Ok(())
    }

    fn request(&self, session_id: &str) -> Result<Option<SessionRequest>> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, duration_minutes, willpower FROM session_requests WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((user_id, minutes, willpower)) = row else {
            return Ok(None);
        };
        let duration = SessionDuration::from_minutes(minutes).ok_or_else(|| {
            CoreError::Custom(format!("stored session {session_id} has unsupported duration {minutes}"))
        })?;
        Ok(Some(SessionRequest {
            session_id: session_id.to_string(),
            user_id,
            duration,
            willpower: willpower.parse()?,
        }))
    }

    fn record_outcome(&self, outcome: &SessionOutcome) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO session_outcomes
                (session_id, user_id, status, duration_minutes, willpower, xp, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                outcome.session_id,
                outcome.user_id,
                outcome.status.as_str(),
                outcome.duration_minutes,
                outcome.willpower.as_str(),
                outcome.xp,
                outcome.ended_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn outcome(&self, session_id: &str) -> Result<Option<SessionOutcome>> {
        let row = self
            .conn
            .query_row(
                "SELECT session_id, user_id, status, duration_minutes, willpower, xp, ended_at
                 FROM session_outcomes WHERE session_id = ?1",
                params![session_id],
                outcome_row,
            )
            .optional()?;
        row.map(decode_outcome).transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn request(id: &str) -> SessionRequest {
        SessionRequest {
            session_id: id.into(),
            user_id: "u".into(),
            duration: SessionDuration::Sixty,
            willpower: WillpowerLevel::High,
        }
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.get("test").unwrap().is_none());
        db.set("test", "hello").unwrap();
        db.set("test", "again").unwrap();
        assert_eq!(db.get("test").unwrap().unwrap(), "again");
        assert_eq!(db.keys().unwrap(), vec!["test"]);
        db.remove("test").unwrap();
        assert!(db.get("test").unwrap().is_none());
    }

    #[test]
    fn request_round_trip() {
        let db = Database::open_memory().unwrap();
        assert!(db.request("a").unwrap().is_none());
        db.save_request(&request("a")).unwrap();
        assert_eq!(db.request("a").unwrap(), Some(request("a")));
    }

    #[test]
    fn first_request_is_kept() {
        let db = Database::open_memory().unwrap();
        db.save_request(&request("a")).unwrap();
        let changed = SessionRequest {
            willpower: WillpowerLevel::Low,
            ..request("a")
        };
        db.save_request(&changed).unwrap();
        assert_eq!(db.request("a").unwrap(), Some(request("a")));
    }

    #[test]
    fn outcome_first_write_wins() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let done = SessionOutcome::completed(&request("a"), now);
        assert!(db.record_outcome(&done).unwrap());
        assert!(!db.record_outcome(&SessionOutcome::interrupted(&request("a"), now)).unwrap());

        let stored = db.outcome("a").unwrap().unwrap();
        assert_eq!(stored.status, OutcomeStatus::Completed);
        assert_eq!(stored.xp, 40);
    }

    #[test]
    fn stats_aggregate_outcomes() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        db.record_outcome(&SessionOutcome::completed(&request("a"), now)).unwrap();
        db.record_outcome(&SessionOutcome::completed(&request("b"), now)).unwrap();
        db.record_outcome(&SessionOutcome::interrupted(&request("c"), now)).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.completed_sessions, 2);
        assert_eq!(stats.interrupted_sessions, 1);
        assert_eq!(stats.total_xp, 90);
        assert_eq!(stats.total_focus_min, 120);
        assert_eq!(stats.today_sessions, 3);

        let recent = db.recent_outcomes(2).unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn today_follows_the_given_day() {
        let db = Database::open_memory().unwrap();
        let day = |d: u32, h: u32| Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap();
        db.record_outcome(&SessionOutcome::completed(&request("a"), day(9, 23))).unwrap();
        db.record_outcome(&SessionOutcome::completed(&request("b"), day(10, 0))).unwrap();
        db.record_outcome(&SessionOutcome::interrupted(&request("c"), day(10, 8))).unwrap();

        let stats = db.stats_at(day(10, 12)).unwrap();
        assert_eq!(stats.today_sessions, 2);
        assert_eq!(stats.today_xp, 50);
        assert_eq!(stats.total_xp, 90);

        let next_day = db.stats_at(day(11, 1)).unwrap();
        assert_eq!(next_day.today_sessions, 0);
        assert_eq!(next_day.today_xp, 0);
    }
}
