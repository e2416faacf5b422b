//! Feedback reminders: who is about to interview, and who was already told.

use chrono::{DateTime, Utc};
use rusqlite::params;
use stagehand_core::error::Result;
use stagehand_core::types::DueReminder;

use crate::{AdvanceDb, db_err, parse_opt_ts, parse_ts, ts};

impl AdvanceDb {
    /// Interviewers on events of still-scheduled schedules starting within
    /// `[from, until]` who have an email and no reminder on record.
    pub fn reminders_due(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<DueReminder>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT e.event_id, e.interview_id, e.start_time, e.end_time, e.meeting_link,
                        e.location, e.feedback_link, a.interviewer_id, a.email, a.first_name,
                        a.last_name, s.schedule_id, s.application_id, s.candidate_id, s.job_id
                 FROM interview_events e
                 JOIN interview_assignments a ON a.event_id = e.event_id
                 JOIN interview_schedules s ON s.schedule_id = e.schedule_id
                 WHERE e.start_time BETWEEN ?1 AND ?2
                   AND s.status = 'Scheduled'
                   AND a.email IS NOT NULL AND a.email != ''
                   AND NOT EXISTS (
                       SELECT 1 FROM feedback_reminders_sent r
                       WHERE r.event_id = e.event_id AND r.interviewer_id = a.interviewer_id
                   )
                 ORDER BY e.start_time, e.event_id, a.interviewer_id",
            )
            .map_err(db_err("Prepare reminders"))?;
        let rows = stmt
            .query_map(params![ts(&from), ts(&until)], |row| {
                let start: String = row.get(2)?;
                let first: Option<String> = row.get(9)?;
                let last: Option<String> = row.get(10)?;
                let name = [first, last].into_iter().flatten().collect::<Vec<_>>().join(" ");
                Ok(DueReminder {
                    event_id: row.get(0)?,
                    interview_id: row.get(1)?,
                    start_time: parse_ts(2, &start)?,
                    end_time: parse_opt_ts(3, row.get(3)?)?,
                    meeting_link: row.get(4)?,
                    location: row.get(5)?,
                    feedback_link: row.get(6)?,
                    interviewer_id: row.get(7)?,
                    interviewer_email: row.get(8)?,
                    interviewer_name: (!name.is_empty()).then_some(name),
                    schedule_id: row.get(11)?,
                    application_id: row.get(12)?,
                    candidate_id: row.get(13)?,
                    job_id: row.get(14)?,
                })
            })
            .map_err(db_err("Query reminders"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read reminders"))?;
        Ok(rows)
    }

    /// Remember a delivered reminder. `false` when it was already recorded.
    pub fn record_reminder_sent(
        &self,
        event_id: &str,
        interviewer_id: &str,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self
            .conn()?
            .execute(
                "INSERT INTO feedback_reminders_sent (event_id, interviewer_id, recipient, sent_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (event_id, interviewer_id) DO NOTHING",
                params![event_id, interviewer_id, recipient, ts(&now)],
            )
            .map_err(db_err("Record reminder"))?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Enrichment;
    use chrono::Duration;
    use stagehand_core::types::{InterviewEvent, InterviewerAssignment, ScheduleChange, ScheduleStatus};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn who(id: &str, email: Option<&str>) -> InterviewerAssignment {
        InterviewerAssignment {
            interviewer_id: id.into(),
            first_name: Some("Alan".into()),
            last_name: Some("Turing".into()),
            email: email.map(Into::into),
            is_enabled: true,
            ..Default::default()
        }
    }

    fn seed(db: &AdvanceDb, status: ScheduleStatus, start: DateTime<Utc>, now: DateTime<Utc>) {
        let change = ScheduleChange {
            schedule_id: "sch-1".into(),
            status: status.as_str().into(),
            application_id: "app-1".into(),
            candidate_id: Some("cand-1".into()),
            interview_stage_id: Some("stage-1".into()),
            events: vec![
                InterviewEvent {
                    event_id: "e-soon".into(),
                    interview_id: "int-1".into(),
                    start_time: Some(start),
                    interviewers: vec![who("u1", Some("alan@example.com")), who("u2", None)],
                    ..Default::default()
                },
                InterviewEvent {
                    event_id: "e-later".into(),
                    interview_id: "int-2".into(),
                    start_time: Some(start + Duration::hours(3)),
                    interviewers: vec![who("u3", Some("grace@example.com"))],
                    ..Default::default()
                },
            ],
        };
        db.apply_schedule_replace(&change, status, &Enrichment::default(), now).unwrap();
    }

    #[test]
    fn test_due_window_and_email_filter() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let now = at("2026-03-02T09:00:00Z");
        seed(&db, ScheduleStatus::Scheduled, now + Duration::minutes(10), now);

        let due = db.reminders_due(now + Duration::minutes(4), now + Duration::minutes(20)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event_id, "e-soon");
        assert_eq!(due[0].interviewer_email, "alan@example.com");
        assert_eq!(due[0].interviewer_name.as_deref(), Some("Alan Turing"));
        assert_eq!(due[0].candidate_id.as_deref(), Some("cand-1"));
    }

    #[test]
    fn test_sent_reminder_survives_replay() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let now = at("2026-03-02T09:00:00Z");
        let (from, until) = (now + Duration::minutes(4), now + Duration::minutes(20));
        seed(&db, ScheduleStatus::Scheduled, now + Duration::minutes(10), now);

        assert!(db.record_reminder_sent("e-soon", "u1", "alan@example.com", now).unwrap());
        assert!(!db.record_reminder_sent("e-soon", "u1", "alan@example.com", now).unwrap());
        assert!(db.reminders_due(from, until).unwrap().is_empty());

        // Re-delivery replaces the events; the sent marker stays.
        seed(&db, ScheduleStatus::Scheduled, now + Duration::minutes(10), now);
        assert!(db.reminders_due(from, until).unwrap().is_empty());
    }

    #[test]
    fn test_only_scheduled_schedules_are_reminded() {
        let db = AdvanceDb::open_in_memory().unwrap();
        let now = at("2026-03-02T09:00:00Z");
        seed(&db, ScheduleStatus::Complete, now + Duration::minutes(10), now);
        let due = db.reminders_due(now + Duration::minutes(4), now + Duration::minutes(20)).unwrap();
        assert!(due.is_empty());
    }
}
