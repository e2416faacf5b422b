//! Notifications: rejection prompts and failure alerts for operators,
//! feedback reminders for interviewers.
//! Fire-and-forget; a failed delivery never blocks the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_core::error::Result;
use stagehand_core::types::{DueReminder, FeedbackSubmission};

/// A notification for the operators' channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Title/summary.
    pub title: String,
    /// Body content (Slack mrkdwn).
    pub body: String,
    pub priority: NotifyPriority,
    /// Which part of the engine raised it.
    pub source: String,
    pub timestamp: DateTime<Utc>,
    /// Email of one person to message directly. `None` goes to the
    /// operators' channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Notification {
    pub fn new(
        title: &str,
        body: &str,
        source: &str,
        priority: NotifyPriority,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            priority,
            source: source.to_string(),
            timestamp,
            recipient: None,
        }
    }

    pub fn with_recipient(mut self, email: &str) -> Self {
        self.recipient = Some(email.to_string());
        self
    }
}

/// Delivers notifications somewhere a human will see them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Candidate link in the ATS.
pub fn profile_url(base: &str, candidate_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), candidate_id)
}

/// Prompt a recruiter to confirm archival of a candidate who did not meet
/// the advancement criteria.
pub fn rejection_notice(
    candidate_name: &str,
    job_title: &str,
    application_id: &str,
    profile_url: &str,
    feedback: &[FeedbackSubmission],
    now: DateTime<Utc>,
) -> Notification {
    let mut body = format!(
        "*{candidate_name}* did not meet the advancement criteria for *{job_title}*.\n\
         Application: `{application_id}`\nProfile: {profile_url}\n"
    );
    if feedback.is_empty() {
        body.push_str("\n_No feedback on record._\n");
    }
    for fb in feedback {
        let scores = fb
            .submitted_values
            .iter()
            .map(|(field, value)| format!("{field}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        body.push_str(&format!(
            "\n• Interview `{}` submitted {}: {}",
            fb.interview_id,
            fb.submitted_at.format("%Y-%m-%d %H:%M UTC"),
            if scores.is_empty() { "no scores".to_string() } else { scores }
        ));
    }
    body.push_str("\n\nConfirm the rejection to archive this application.");

    Notification::new(
        &format!("Candidate {candidate_name} did not meet advancement criteria"),
        &body,
        "advancement",
        NotifyPriority::Normal,
        now,
    )
}

/// Alert operators that a stage advance exhausted its retries.
pub fn advancement_failure_alert(
    schedule_id: &str,
    application_id: &str,
    candidate_name: &str,
    error: &str,
    profile_url: &str,
    now: DateTime<Utc>,
) -> Notification {
    let body = format!(
        "*Schedule:* `{schedule_id}`\n*Application:* `{application_id}`\n\
         *Candidate:* {candidate_name}\n*Error:* {error}\n\n*Profile:* {profile_url}"
    );
    Notification::new("Auto-advancement failed", &body, "advancement", NotifyPriority::High, now)
}

/// Direct message asking an interviewer to submit feedback for an
/// interview that is about to start.
pub fn feedback_reminder(
    reminder: &DueReminder,
    candidate_name: &str,
    job_title: Option<&str>,
    profile_url: &str,
    now: DateTime<Utc>,
) -> Notification {
    let greeting = reminder.interviewer_name.as_deref().unwrap_or("there");
    let role = job_title.map(|t| format!(" for *{t}*")).unwrap_or_default();
    let mut body = format!(
        "Hi {greeting}, you are interviewing *{candidate_name}*{role} at {}.\n\
         Interview: `{}`\nCandidate: {profile_url}\n",
        reminder.start_time.format("%Y-%m-%d %H:%M UTC"),
        reminder.interview_id,
    );
    if let Some(link) = &reminder.meeting_link {
        body.push_str(&format!("Meeting: {link}\n"));
    }
    if let Some(location) = &reminder.location {
        body.push_str(&format!("Location: {location}\n"));
    }
    match &reminder.feedback_link {
        Some(link) => body.push_str(&format!("\nPlease submit your feedback when you are done: {link}")),
        None => body.push_str("\nPlease submit your feedback in the ATS when you are done."),
    }

    Notification::new(
        &format!("Interview feedback reminder for {candidate_name}"),
        &body,
        "reminders",
        NotifyPriority::Normal,
        now,
    )
    .with_recipient(&reminder.interviewer_email)
}
