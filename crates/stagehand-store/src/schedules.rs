//! Schedule aggregate: schedules → events → interviewer assignments.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};
use stagehand_core::error::Result;
use stagehand_core::types::{
    InterviewEvent, InterviewSchedule, InterviewerAssignment, ScheduleChange, ScheduleStatus,
};

use crate::{AdvanceDb, db_err, parse_enum, parse_opt_ts, parse_ts, ts};

/// Plan/job identifiers resolved for a schedule. `None` keeps whatever
/// was resolved before, as long as the stage did not change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub interview_plan_id: Option<String>,
    pub job_id: Option<String>,
}

const SCHEDULE_SELECT: &str = "SELECT schedule_id, application_id, candidate_id, interview_stage_id, \
     interview_plan_id, job_id, status, updated_at, last_evaluated_for_advancement_at \
     FROM interview_schedules";

fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<InterviewSchedule> {
    let status: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(InterviewSchedule {
        schedule_id: row.get(0)?,
        application_id: row.get(1)?,
        candidate_id: row.get(2)?,
        interview_stage_id: row.get(3)?,
        interview_plan_id: row.get(4)?,
        job_id: row.get(5)?,
        status: parse_enum(6, &status)?,
        updated_at: parse_ts(7, &updated_at)?,
        last_evaluated_for_advancement_at: parse_opt_ts(8, row.get(8)?)?,
    })
}

impl AdvanceDb {
    // ─── Reconciliation writes ──────────────────────────────

    /// Upsert the schedule and replace its events and assignments, all in
    /// one transaction.
    pub fn apply_schedule_replace(
        &self,
        change: &ScheduleChange,
        status: ScheduleStatus,
        enrichment: &Enrichment,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Begin reconcile"))?;
        let now_s = ts(&now);

        tx.execute(
            "INSERT INTO interview_schedules
                (schedule_id, application_id, candidate_id, interview_stage_id,
                 interview_plan_id, job_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (schedule_id) DO UPDATE SET
                application_id = excluded.application_id,
                candidate_id = excluded.candidate_id,
                interview_plan_id = CASE
                    WHEN excluded.interview_stage_id IS interview_schedules.interview_stage_id
                    THEN COALESCE(excluded.interview_plan_id, interview_schedules.interview_plan_id)
                    ELSE excluded.interview_plan_id END,
                job_id = CASE
                    WHEN excluded.interview_stage_id IS interview_schedules.interview_stage_id
                    THEN COALESCE(excluded.job_id, interview_schedules.job_id)
                    ELSE excluded.job_id END,
                interview_stage_id = excluded.interview_stage_id,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                change.schedule_id,
                change.application_id,
                change.candidate_id,
                change.interview_stage_id,
                enrichment.interview_plan_id,
                enrichment.job_id,
                status.as_str(),
                now_s,
            ],
        )
        .map_err(db_err("Upsert schedule"))?;

        tx.execute(
            "DELETE FROM interview_events WHERE schedule_id = ?1",
            params![change.schedule_id],
        )
        .map_err(db_err("Clear events"))?;

        for event in &change.events {
            // An event id seen under another schedule moves here.
            tx.execute(
                "DELETE FROM interview_events WHERE event_id = ?1",
                params![event.event_id],
            )
            .map_err(db_err("Clear moved event"))?;

            tx.execute(
                "INSERT INTO interview_events
                    (event_id, schedule_id, interview_id, start_time, end_time, feedback_link,
                     location, meeting_link, has_submitted_feedback, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.event_id,
                    change.schedule_id,
                    event.interview_id,
                    event.start_time.as_ref().map(ts),
                    event.end_time.as_ref().map(ts),
                    event.feedback_link,
                    event.location,
                    event.meeting_link,
                    event.has_submitted_feedback as i32,
                    now_s,
                ],
            )
            .map_err(db_err("Insert event"))?;

            for a in &event.interviewers {
                tx.execute(
                    "INSERT OR REPLACE INTO interview_assignments
                        (event_id, interviewer_id, first_name, last_name, email, global_role,
                         training_role, is_enabled, manager_id, pool_id, pool_title, pool_is_archived)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        event.event_id,
                        a.interviewer_id,
                        a.first_name,
                        a.last_name,
                        a.email,
                        a.global_role,
                        a.training_role,
                        a.is_enabled as i32,
                        a.manager_id,
                        a.pool_id,
                        a.pool_title,
                        a.pool_is_archived as i32,
                    ],
                )
                .map_err(db_err("Insert assignment"))?;
            }
        }

        tx.commit().map_err(db_err("Commit reconcile"))?;
        Ok(())
    }

    /// Delete a schedule; events and assignments cascade. Returns whether a row existed.
    pub fn delete_schedule(&self, schedule_id: &str) -> Result<bool> {
        let n = self
            .conn()?
            .execute(
                "DELETE FROM interview_schedules WHERE schedule_id = ?1",
                params![schedule_id],
            )
            .map_err(db_err("Delete schedule"))?;
        Ok(n > 0)
    }

    // ─── Reads ──────────────────────────────────────────────

    pub fn get_schedule(&self, schedule_id: &str) -> Result<Option<InterviewSchedule>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{SCHEDULE_SELECT} WHERE schedule_id = ?1"),
            params![schedule_id],
            row_to_schedule,
        )
        .optional()
        .map_err(db_err("Get schedule"))
    }

    /// Events of a schedule with their interviewer assignments.
    pub fn list_events(&self, schedule_id: &str) -> Result<Vec<InterviewEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT event_id, interview_id, start_time, end_time, feedback_link, location,
                        meeting_link, has_submitted_feedback
                 FROM interview_events WHERE schedule_id = ?1
                 ORDER BY start_time, event_id",
            )
            .map_err(db_err("Prepare events"))?;
        let mut events = stmt
            .query_map(params![schedule_id], |row| {
                Ok(InterviewEvent {
                    event_id: row.get(0)?,
                    interview_id: row.get(1)?,
                    start_time: parse_opt_ts(2, row.get(2)?)?,
                    end_time: parse_opt_ts(3, row.get(3)?)?,
                    feedback_link: row.get(4)?,
                    location: row.get(5)?,
                    meeting_link: row.get(6)?,
                    has_submitted_feedback: row.get::<_, i32>(7)? != 0,
                    interviewers: Vec::new(),
                })
            })
            .map_err(db_err("Query events"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read events"))?;

        let mut stmt = conn
            .prepare(
                "SELECT interviewer_id, first_name, last_name, email, global_role, training_role,
                        is_enabled, manager_id, pool_id, pool_title, pool_is_archived
                 FROM interview_assignments WHERE event_id = ?1
                 ORDER BY interviewer_id",
            )
            .map_err(db_err("Prepare assignments"))?;
        for event in &mut events {
            event.interviewers = stmt
                .query_map(params![event.event_id], |row| {
                    Ok(InterviewerAssignment {
                        interviewer_id: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        email: row.get(3)?,
                        global_role: row.get(4)?,
                        training_role: row.get(5)?,
                        is_enabled: row.get::<_, i32>(6)? != 0,
                        manager_id: row.get(7)?,
                        pool_id: row.get(8)?,
                        pool_title: row.get(9)?,
                        pool_is_archived: row.get::<_, i32>(10)? != 0,
                    })
                })
                .map_err(db_err("Query assignments"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("Read assignments"))?;
        }
        Ok(events)
    }

    /// Schedules awaiting a decision that changed since they were last
    /// evaluated, are enriched, and were updated within the timeout window.
    /// Oldest first.
    pub fn schedules_ready_for_evaluation(
        &self,
        now: DateTime<Utc>,
        timeout_days: i64,
    ) -> Result<Vec<InterviewSchedule>> {
        let cutoff = ts(&(now - Duration::days(timeout_days)));
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SCHEDULE_SELECT}
                 WHERE status IN ('WaitingOnFeedback', 'Complete')
                   AND (last_evaluated_for_advancement_at IS NULL
                        OR updated_at > last_evaluated_for_advancement_at)
                   AND updated_at > ?1
                   AND interview_plan_id IS NOT NULL
                 ORDER BY updated_at ASC"
            ))
            .map_err(db_err("Prepare eligible"))?;
        let rows = stmt
            .query_map(params![cutoff], row_to_schedule)
            .map_err(db_err("Query eligible"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read eligible"))?;
        Ok(rows)
    }

    /// Record that an evaluation attempt happened.
    pub fn mark_evaluated(&self, schedule_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE interview_schedules SET last_evaluated_for_advancement_at = ?1
                 WHERE schedule_id = ?2",
                params![ts(&now), schedule_id],
            )
            .map_err(db_err("Mark evaluated"))?;
        Ok(())
    }

    /// Bump `updated_at` on every schedule of an application so that new
    /// feedback re-triggers evaluation.
    pub fn touch_schedules_for_application(
        &self,
        application_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE interview_schedules SET updated_at = ?1 WHERE application_id = ?2",
                params![ts(&now), application_id],
            )
            .map_err(db_err("Touch schedules"))
    }

    /// Candidates for the enrichment refetch sweep.
    pub fn schedules_missing_plan(
        &self,
        now: DateTime<Utc>,
        lookback_days: i64,
        limit: u32,
    ) -> Result<Vec<InterviewSchedule>> {
        let cutoff = ts(&(now - Duration::days(lookback_days)));
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SCHEDULE_SELECT}
                 WHERE interview_plan_id IS NULL
                   AND interview_stage_id IS NOT NULL
                   AND status IN ('Scheduled', 'WaitingOnFeedback', 'Complete')
                   AND updated_at > ?1
                 ORDER BY updated_at DESC
                 LIMIT ?2"
            ))
            .map_err(db_err("Prepare missing plan"))?;
        let rows = stmt
            .query_map(params![cutoff, limit], row_to_schedule)
            .map_err(db_err("Query missing plan"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read missing plan"))?;
        Ok(rows)
    }

    /// Store late-resolved plan/job identifiers. A `None` job keeps the old value.
    pub fn set_enrichment(&self, schedule_id: &str, enrichment: &Enrichment) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE interview_schedules
                 SET interview_plan_id = COALESCE(?1, interview_plan_id),
                     job_id = COALESCE(?2, job_id)
                 WHERE schedule_id = ?3",
                params![enrichment.interview_plan_id, enrichment.job_id, schedule_id],
            )
            .map_err(db_err("Set enrichment"))?;
        Ok(())
    }

    /// Distinct applications with a schedule awaiting a decision.
    pub fn active_application_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT application_id FROM interview_schedules
                 WHERE status IN ('WaitingOnFeedback', 'Complete')
                 ORDER BY application_id",
            )
            .map_err(db_err("Prepare applications"))?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err("Query applications"))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(db_err("Read applications"))?;
        Ok(ids)
    }

    /// Most recently updated schedule of an application.
    pub fn latest_schedule_for_application(
        &self,
        application_id: &str,
    ) -> Result<Option<InterviewSchedule>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "{SCHEDULE_SELECT} WHERE application_id = ?1
                 ORDER BY updated_at DESC, schedule_id DESC LIMIT 1"
            ),
            params![application_id],
            row_to_schedule,
        )
        .optional()
        .map_err(db_err("Latest schedule"))
    }
}
