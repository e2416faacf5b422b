//! SQLite-backed persistence for the advancement engine.
//!
//! One connection behind a mutex. Every public method takes the lock for
//! its own duration only, so callers never hold it across an `.await`.

mod executions;
mod feedback;
mod reminders;
mod rules;
mod schedules;

pub use schedules::Enrichment;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use stagehand_core::error::{Result, StagehandError};

/// Advancement database: schedules, feedback, rule catalog and audit log.
pub struct AdvanceDb {
    conn: Mutex<Connection>,
}

impl AdvanceDb {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| StagehandError::Database(format!("DB open error: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StagehandError::Database(format!("DB pragma error: {e}")))?;
        Self::init(conn)
    }

    /// Fresh private database, used by tests and dry experiments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StagehandError::Database(format!("DB open error: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StagehandError::Database(format!("DB pragma error: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS interview_schedules (
                schedule_id TEXT PRIMARY KEY,
                application_id TEXT NOT NULL,
                candidate_id TEXT,
                interview_stage_id TEXT,
                interview_plan_id TEXT,          -- NULL until enrichment succeeds
                job_id TEXT,
                status TEXT NOT NULL,            -- Scheduled, WaitingOnFeedback, Complete
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_evaluated_for_advancement_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_application ON interview_schedules(application_id);
            CREATE INDEX IF NOT EXISTS idx_schedules_status ON interview_schedules(status, updated_at);

            CREATE TABLE IF NOT EXISTS interview_events (
                event_id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                interview_id TEXT NOT NULL,
                start_time TEXT,
                end_time TEXT,
                feedback_link TEXT,
                location TEXT,
                meeting_link TEXT,
                has_submitted_feedback INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (schedule_id) REFERENCES interview_schedules(schedule_id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_events_schedule ON interview_events(schedule_id);

            CREATE TABLE IF NOT EXISTS interview_assignments (
                event_id TEXT NOT NULL,
                interviewer_id TEXT NOT NULL,
                first_name TEXT,
                last_name TEXT,
                email TEXT,
                global_role TEXT,
                training_role TEXT,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                manager_id TEXT,
                pool_id TEXT,
                pool_title TEXT,
                pool_is_archived INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (event_id, interviewer_id),
                FOREIGN KEY (event_id) REFERENCES interview_events(event_id) ON DELETE CASCADE
            );

            -- event_id is a weak reference: events are replaced wholesale
            CREATE TABLE IF NOT EXISTS feedback_submissions (
                feedback_id TEXT PRIMARY KEY,
                application_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                interviewer_id TEXT NOT NULL,
                interview_id TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                submitted_values TEXT NOT NULL,  -- JSON object
                processed_for_advancement_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_event ON feedback_submissions(event_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_application ON feedback_submissions(application_id);

            CREATE TABLE IF NOT EXISTS advancement_rules (
                rule_id TEXT PRIMARY KEY,
                job_id TEXT,                     -- NULL applies to all jobs
                interview_plan_id TEXT NOT NULL,
                interview_stage_id TEXT NOT NULL,
                target_stage_id TEXT,            -- NULL means next sequential stage
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_lookup
                ON advancement_rules(interview_plan_id, interview_stage_id, is_active);

            CREATE TABLE IF NOT EXISTS advancement_rule_requirements (
                requirement_id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                interview_id TEXT NOT NULL,
                score_field_path TEXT NOT NULL,
                operator TEXT NOT NULL,
                threshold_value TEXT NOT NULL,
                is_required INTEGER NOT NULL DEFAULT 1,
                position INTEGER NOT NULL,
                FOREIGN KEY (rule_id) REFERENCES advancement_rules(rule_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS advancement_rule_actions (
                action_id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                action_config TEXT NOT NULL DEFAULT '{}',
                execution_order INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY (rule_id) REFERENCES advancement_rules(rule_id) ON DELETE CASCADE
            );

            -- Append-only audit log
            CREATE TABLE IF NOT EXISTS advancement_executions (
                execution_id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                application_id TEXT NOT NULL,
                rule_id TEXT,
                from_stage_id TEXT,
                to_stage_id TEXT,
                execution_status TEXT NOT NULL,  -- success, failed, dry_run, rejected
                failure_reason TEXT,
                evaluation_results TEXT,         -- JSON snapshot
                executed_at TEXT NOT NULL,
                executed_by TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_schedule ON advancement_executions(schedule_id);
            CREATE INDEX IF NOT EXISTS idx_executions_status
                ON advancement_executions(execution_status, executed_at);

            -- No foreign key: a reminder stays sent when its event is replaced
            CREATE TABLE IF NOT EXISTS feedback_reminders_sent (
                event_id TEXT NOT NULL,
                interviewer_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                PRIMARY KEY (event_id, interviewer_id)
            );
         ",
            )
            .map_err(|e| StagehandError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StagehandError::Database(format!("DB lock poisoned: {e}")))
    }
}

/// Map a rusqlite error into the shared taxonomy with some context.
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> StagehandError {
    move |e| StagehandError::Database(format!("{context}: {e}"))
}

/// Fixed-width RFC3339 so that text comparison matches time order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = StagehandError>,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_and_reopen() {
        let dir = std::env::temp_dir().join(format!("stagehand-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("advance.db");
        {
            let db = AdvanceDb::open(&path).unwrap();
            assert_eq!(db.list_rules(false).unwrap().len(), 0);
        }
        // Migrations are idempotent.
        let db = AdvanceDb::open(&path).unwrap();
        assert_eq!(db.list_rules(false).unwrap().len(), 0);
        drop(db);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T09:00:00Z").unwrap().with_timezone(&Utc);
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(ts(&a) < ts(&b));
        assert_eq!(parse_ts(0, &ts(&b)).unwrap(), b);
    }
}
