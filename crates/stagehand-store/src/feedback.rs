//! Feedback store — idempotent on `feedback_id`.

use chrono::{DateTime, Utc};
use rusqlite::params;
use stagehand_core::error::Result;
use stagehand_core::types::{FeedbackSubmission, SubmittedValues};

use crate::{AdvanceDb, db_err, parse_json, parse_opt_ts, parse_ts, ts};

impl AdvanceDb {
    /// Insert a submission unless its `feedback_id` is already known.
    /// Returns `true` when a row was written.
    pub fn insert_feedback(&self, fb: &FeedbackSubmission, now: DateTime<Utc>) -> Result<bool> {
        let values = serde_json::to_string(&fb.submitted_values)?;
        let n = self
            .conn()?
            .execute(
                "INSERT INTO feedback_submissions
                    (feedback_id, application_id, event_id, interviewer_id, interview_id,
                     submitted_at, submitted_values, processed_for_advancement_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (feedback_id) DO NOTHING",
                params![
                    fb.feedback_id,
                    fb.application_id,
                    fb.event_id,
                    fb.interviewer_id,
                    fb.interview_id,
                    ts(&fb.submitted_at),
                    values,
                    fb.processed_for_advancement_at.as_ref().map(ts),
                    ts(&now),
                ],
            )
            .map_err(db_err("Insert feedback"))?;
        Ok(n > 0)
    }

    /// Feedback linked to the schedule's current events, oldest first.
    /// Submissions whose event was replaced away are not returned.
    pub fn feedback_for_schedule(&self, schedule_id: &str) -> Result<Vec<FeedbackSubmission>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT f.feedback_id, f.application_id, f.event_id, f.interviewer_id,
                        f.interview_id, f.submitted_at, f.submitted_values,
                        f.processed_for_advancement_at
                 FROM feedback_submissions f
                 JOIN interview_events e ON e.event_id = f.event_id
                 WHERE e.schedule_id = ?1
                 ORDER BY f.submitted_at ASC, f.feedback_id ASC",
            )
            .map_err(db_err("Prepare feedback"))?;
        let rows = stmt
            .query_map(params![schedule_id], |row| {
                let submitted_at: String = row.get(5)?;
                let values: String = row.get(6)?;
                Ok(FeedbackSubmission {
                    feedback_id: row.get(0)?,
                    application_id: row.get(1)?,
                    event_id: row.get(2)?,
                    interviewer_id: row.get(3)?,
                    interview_id: row.get(4)?,
                    submitted_at: parse_ts(5, &submitted_at)?,
                    submitted_values: parse_json::<SubmittedValues>(6, &values)?,
                    processed_for_advancement_at: parse_opt_ts(7, row.get(7)?)?,
                })
            })
            .map_err(db_err("Query feedback"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read feedback"))?;
        Ok(rows)
    }

    /// Stamp every unprocessed submission of an application.
    pub fn mark_feedback_processed(&self, application_id: &str, now: DateTime<Utc>) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE feedback_submissions SET processed_for_advancement_at = ?1
                 WHERE application_id = ?2 AND processed_for_advancement_at IS NULL",
                params![ts(&now), application_id],
            )
            .map_err(db_err("Mark feedback processed"))
    }

    pub fn event_exists(&self, event_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM interview_events WHERE event_id = ?1",
                params![event_id],
                |r| r.get(0),
            )
            .map_err(db_err("Event lookup"))?;
        Ok(n > 0)
    }
}
