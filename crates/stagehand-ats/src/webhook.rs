//! Webhook payloads pushed by the ATS.
//!
//! ```text
//! { "action": "interviewScheduleUpdate",
//!   "data": { "interviewSchedule": { "id", "status", "applicationId", "candidateId",
//!                                    "interviewStageId", "interviewEvents": [...] } } }
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use stagehand_core::error::{Result, StagehandError};
use stagehand_core::types::{InterviewEvent, InterviewerAssignment, ScheduleChange};

pub const SCHEDULE_UPDATE: &str = "interviewScheduleUpdate";

/// What an incoming webhook asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    ScheduleUpdate(ScheduleChange),
    Ping,
    Ignored(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSchedule {
    id: String,
    status: String,
    application_id: String,
    candidate_id: Option<String>,
    interview_stage_id: Option<String>,
    #[serde(default)]
    interview_events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    id: String,
    interview_id: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    feedback_link: Option<String>,
    location: Option<String>,
    meeting_link: Option<String>,
    #[serde(default)]
    has_submitted_feedback: bool,
    #[serde(default)]
    interviewers: Vec<WireInterviewer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInterviewer {
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    global_role: Option<String>,
    training_role: Option<String>,
    #[serde(default = "default_enabled")]
    is_enabled: bool,
    manager_id: Option<String>,
    interviewer_pool: Option<WirePool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePool {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    is_archived: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<WireInterviewer> for InterviewerAssignment {
    fn from(w: WireInterviewer) -> Self {
        let pool = w.interviewer_pool;
        Self {
            interviewer_id: w.id,
            first_name: w.first_name,
            last_name: w.last_name,
            email: w.email,
            global_role: w.global_role,
            training_role: w.training_role,
            is_enabled: w.is_enabled,
            manager_id: w.manager_id,
            pool_is_archived: pool.as_ref().is_some_and(|p| p.is_archived),
            pool_id: pool.as_ref().and_then(|p| p.id.clone()),
            pool_title: pool.and_then(|p| p.title),
        }
    }
}

impl From<WireEvent> for InterviewEvent {
    fn from(w: WireEvent) -> Self {
        Self {
            event_id: w.id,
            interview_id: w.interview_id,
            start_time: w.start_time,
            end_time: w.end_time,
            feedback_link: w.feedback_link,
            location: w.location,
            meeting_link: w.meeting_link,
            has_submitted_feedback: w.has_submitted_feedback,
            interviewers: w.interviewers.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<WireSchedule> for ScheduleChange {
    fn from(w: WireSchedule) -> Self {
        Self {
            schedule_id: w.id,
            status: w.status,
            application_id: w.application_id,
            candidate_id: w.candidate_id,
            interview_stage_id: w.interview_stage_id,
            events: w.interview_events.into_iter().map(Into::into).collect(),
        }
    }
}

/// Decode a raw webhook body.
pub fn parse_webhook(body: &[u8]) -> Result<WebhookAction> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| StagehandError::Validation(format!("invalid webhook JSON: {e}")))?;

    if payload["action"] == "ping" || payload["type"] == "ping" {
        return Ok(WebhookAction::Ping);
    }

    let action = payload["action"]
        .as_str()
        .ok_or_else(|| StagehandError::Validation("webhook payload has no action".into()))?;
    if action != SCHEDULE_UPDATE {
        return Ok(WebhookAction::Ignored(action.to_string()));
    }

    let schedule = payload["data"]["interviewSchedule"].clone();
    if schedule.is_null() {
        return Err(StagehandError::Validation(
            "interviewScheduleUpdate without data.interviewSchedule".into(),
        ));
    }
    let wire: WireSchedule = serde_json::from_value(schedule)
        .map_err(|e| StagehandError::Validation(format!("invalid interview schedule: {e}")))?;
    Ok(WebhookAction::ScheduleUpdate(wire.into()))
}
