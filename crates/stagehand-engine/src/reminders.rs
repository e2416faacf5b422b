//! Feedback reminders: a direct message to every interviewer shortly
//! before their interview starts, at most once per event and interviewer.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use stagehand_core::config::ReminderConfig;
use stagehand_core::error::Result;
use stagehand_core::time::Clock;
use stagehand_core::traits::CandidateDirectory;
use stagehand_core::types::DueReminder;
use stagehand_store::AdvanceDb;

use crate::notify::{self, Notifier};
use crate::scheduler::JobGate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct FeedbackReminders {
    db: Arc<AdvanceDb>,
    candidates: Arc<dyn CandidateDirectory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    window_start: Duration,
    window_end: Duration,
    profile_url_base: String,
    gate: JobGate,
}

impl FeedbackReminders {
    pub fn new(
        db: Arc<AdvanceDb>,
        candidates: Arc<dyn CandidateDirectory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: &ReminderConfig,
        profile_url_base: &str,
    ) -> Self {
        Self {
            db,
            candidates,
            notifier,
            clock,
            window_start: Duration::minutes(config.window_start_mins),
            window_end: Duration::minutes(config.window_end_mins),
            profile_url_base: profile_url_base.to_string(),
            gate: JobGate::new("feedback reminders"),
        }
    }

    pub async fn try_run(&self) -> Result<Option<ReminderReport>> {
        let Some(_running) = self.gate.try_enter() else {
            return Ok(None);
        };
        self.run().await.map(Some)
    }

    /// Remind everyone due in the window. A failed delivery is not recorded,
    /// so the next run retries it while the event is still in the window.
    pub async fn run(&self) -> Result<ReminderReport> {
        let now = self.clock.now();
        let due = self.db.reminders_due(now + self.window_start, now + self.window_end)?;
        let mut report = ReminderReport { due: due.len(), ..Default::default() };
        if due.is_empty() {
            tracing::debug!("no reminders to send");
            return Ok(report);
        }

        for reminder in &due {
            match self.send(reminder).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        event_id = %reminder.event_id,
                        interviewer_id = %reminder.interviewer_id,
                        "❌ feedback reminder failed: {e}"
                    );
                }
            }
        }

        tracing::info!(due = report.due, sent = report.sent, failed = report.failed, "🔔 Feedback reminders done");
        Ok(report)
    }

    async fn send(&self, reminder: &DueReminder) -> Result<()> {
        let candidate_id = reminder.candidate_id.as_deref().unwrap_or("unknown");
        let candidate_name = match reminder.candidate_id.as_deref() {
            Some(id) => match self.candidates.fetch_candidate(id).await {
                Ok(c) => c.name,
                Err(e) => {
                    tracing::warn!(candidate_id = id, "candidate lookup failed: {e}");
                    "Unknown candidate".to_string()
                }
            },
            None => "Unknown candidate".to_string(),
        };
        let job_title = match reminder.job_id.as_deref() {
            Some(job_id) => self.candidates.fetch_job_title(job_id).await.ok(),
            None => None,
        };

        let message = notify::feedback_reminder(
            reminder,
            &candidate_name,
            job_title.as_deref(),
            &notify::profile_url(&self.profile_url_base, candidate_id),
            self.clock.now(),
        );
        self.notifier.notify(&message).await?;
        self.db.record_reminder_sent(
            &reminder.event_id,
            &reminder.interviewer_id,
            &reminder.interviewer_email,
            self.clock.now(),
        )?;
        tracing::info!(
            event_id = %reminder.event_id,
            interviewer_id = %reminder.interviewer_id,
            application_id = %reminder.application_id,
            "📨 Feedback reminder sent"
        );
        Ok(())
    }
}
