//! Feedback pull — copies submitted interview feedback from the ATS into the
//! local store for every application with a schedule awaiting a decision.

use std::sync::Arc;

use serde::Serialize;
use stagehand_core::error::Result;
use stagehand_core::time::Clock;
use stagehand_core::traits::FeedbackSource;
use stagehand_core::types::{FeedbackRecord, FeedbackSubmission};
use stagehand_store::AdvanceDb;

use crate::scheduler::JobGate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub applications: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct FeedbackSync {
    db: Arc<AdvanceDb>,
    source: Arc<dyn FeedbackSource>,
    clock: Arc<dyn Clock>,
    gate: JobGate,
}

impl FeedbackSync {
    pub fn new(db: Arc<AdvanceDb>, source: Arc<dyn FeedbackSource>, clock: Arc<dyn Clock>) -> Self {
        Self { db, source, clock, gate: JobGate::new("feedback sync") }
    }

    /// Skip-if-busy wrapper around [`FeedbackSync::sync_all`].
    pub async fn try_sync_all(&self) -> Result<Option<SyncReport>> {
        let Some(_running) = self.gate.try_enter() else {
            return Ok(None);
        };
        self.sync_all().await.map(Some)
    }

    /// Pull feedback for every active application. A failing application is
    /// counted and skipped.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let applications = self.db.active_application_ids()?;
        let mut report = SyncReport { applications: applications.len(), ..Default::default() };

        for application_id in &applications {
            match self.sync_application(application_id).await {
                Ok((inserted, skipped)) => {
                    report.inserted += inserted;
                    report.skipped += skipped;
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(application_id = %application_id, "⚠️ feedback sync failed: {e}");
                }
            }
        }

        tracing::info!(
            applications = report.applications,
            inserted = report.inserted,
            skipped = report.skipped,
            errors = report.errors,
            "✅ Feedback sync completed"
        );
        Ok(report)
    }

    /// Returns `(inserted, skipped)`. New feedback bumps the application's
    /// schedules so they become eligible for evaluation again.
    pub async fn sync_application(&self, application_id: &str) -> Result<(usize, usize)> {
        let records = self.source.fetch_application_feedback(application_id).await?;
        let now = self.clock.now();
        let (mut inserted, mut skipped) = (0, 0);

        for record in records {
            let Some(submission) = self.link(record)? else {
                skipped += 1;
                continue;
            };
            if self.db.insert_feedback(&submission, now)? {
                inserted += 1;
            }
        }

        if inserted > 0 {
            self.db.touch_schedules_for_application(application_id, now)?;
            tracing::info!(application_id, inserted, "📝 new feedback stored");
        }
        Ok((inserted, skipped))
    }

    /// Keep only feedback tied to a known event and interviewer.
    fn link(&self, record: FeedbackRecord) -> Result<Option<FeedbackSubmission>> {
        let (Some(event_id), Some(interviewer_id)) = (record.event_id, record.interviewer_id) else {
            tracing::debug!(feedback_id = %record.feedback_id, "feedback without event or interviewer skipped");
            return Ok(None);
        };
        if !self.db.event_exists(&event_id)? {
            tracing::debug!(feedback_id = %record.feedback_id, event_id = %event_id, "feedback for unknown event skipped");
            return Ok(None);
        }
        Ok(Some(FeedbackSubmission {
            feedback_id: record.feedback_id,
            application_id: record.application_id,
            event_id,
            interviewer_id,
            interview_id: record.interview_id,
            submitted_at: record.submitted_at,
            submitted_values: record.submitted_values,
            processed_for_advancement_at: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use stagehand_core::error::StagehandError;
    use stagehand_core::time::FixedClock;
    use stagehand_core::types::{
        FieldValue, InterviewEvent, InterviewerAssignment, ScheduleChange, ScheduleStatus, SubmittedValues,
    };
    use stagehand_store::Enrichment;

    struct StaticFeedback(Vec<FeedbackRecord>);

    #[async_trait]
    impl FeedbackSource for StaticFeedback {
        async fn fetch_application_feedback(&self, application_id: &str) -> Result<Vec<FeedbackRecord>> {
            if application_id == "app-broken" {
                return Err(StagehandError::external("ats", "HTTP 500"));
            }
            Ok(self.0.iter().filter(|r| r.application_id == application_id).cloned().collect())
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn record(id: &str, event: Option<&str>, interviewer: Option<&str>) -> FeedbackRecord {
        let mut values = SubmittedValues::new();
        values.insert("overall_score".into(), FieldValue::Number(4.0));
        FeedbackRecord {
            feedback_id: id.into(),
            application_id: "app-1".into(),
            event_id: event.map(str::to_string),
            interviewer_id: interviewer.map(str::to_string),
            interview_id: "int-1".into(),
            submitted_at: at("2026-03-01T09:00:00Z"),
            submitted_values: values,
        }
    }

    fn seed(db: &AdvanceDb, schedule_id: &str, application_id: &str, event_id: &str, now: DateTime<Utc>) {
        let change = ScheduleChange {
            schedule_id: schedule_id.into(),
            status: "Complete".into(),
            application_id: application_id.into(),
            candidate_id: None,
            interview_stage_id: Some("stage-1".into()),
            events: vec![InterviewEvent {
                event_id: event_id.into(),
                interview_id: "int-1".into(),
                interviewers: vec![InterviewerAssignment { interviewer_id: "u1".into(), ..Default::default() }],
                ..Default::default()
            }],
        };
        db.apply_schedule_replace(&change, ScheduleStatus::Complete, &Enrichment::default(), now)
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_links_and_touches() {
        let db = Arc::new(AdvanceDb::open_in_memory().unwrap());
        let start = at("2026-03-01T08:00:00Z");
        seed(&db, "sch-1", "app-1", "e1", start);
        seed(&db, "sch-2", "app-broken", "e9", start);

        let clock = Arc::new(FixedClock::new(start + Duration::hours(2)));
        let source = StaticFeedback(vec![
            record("fb-1", Some("e1"), Some("u1")),
            record("fb-2", None, Some("u1")),
            record("fb-3", Some("gone"), Some("u1")),
            record("fb-4", Some("e1"), None),
        ]);
        let sync = FeedbackSync::new(db.clone(), Arc::new(source), clock.clone());

        let report = sync.sync_all().await.unwrap();
        assert_eq!(
            report,
            SyncReport { applications: 2, inserted: 1, skipped: 3, errors: 1 }
        );
        let schedule = db.get_schedule("sch-1").unwrap().unwrap();
        assert_eq!(schedule.updated_at, start + Duration::hours(2));
        assert_eq!(db.feedback_for_schedule("sch-1").unwrap().len(), 1);

        // Replays insert nothing and leave the schedule alone.
        clock.advance(Duration::hours(1));
        let again = sync.sync_application("app-1").await.unwrap();
        assert_eq!(again, (0, 3));
        let schedule = db.get_schedule("sch-1").unwrap().unwrap();
        assert_eq!(schedule.updated_at, start + Duration::hours(2));
    }
}
