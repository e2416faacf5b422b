//! Domain model — schedules, feedback, rules and the execution audit trail.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StagehandError;

// ─── Schedules ──────────────────────────────────────────────

/// Lifecycle status of an interview schedule as reported by the ATS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Scheduled,
    WaitingOnFeedback,
    Complete,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "Scheduled",
            ScheduleStatus::WaitingOnFeedback => "WaitingOnFeedback",
            ScheduleStatus::Complete => "Complete",
            ScheduleStatus::Cancelled => "Cancelled",
        }
    }

    /// Statuses for which an advancement decision can be made.
    pub fn awaits_decision(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::WaitingOnFeedback | ScheduleStatus::Complete
        )
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduled" => Ok(ScheduleStatus::Scheduled),
            "WaitingOnFeedback" => Ok(ScheduleStatus::WaitingOnFeedback),
            "Complete" => Ok(ScheduleStatus::Complete),
            "Cancelled" => Ok(ScheduleStatus::Cancelled),
            other => Err(StagehandError::Validation(format!(
                "unknown schedule status '{other}'"
            ))),
        }
    }
}

/// One candidate's round of interviews for an application and stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewSchedule {
    pub schedule_id: String,
    pub application_id: String,
    pub candidate_id: Option<String>,
    pub interview_stage_id: Option<String>,
    /// Resolved from the stage; NULL until enrichment succeeds.
    pub interview_plan_id: Option<String>,
    pub job_id: Option<String>,
    pub status: ScheduleStatus,
    pub updated_at: DateTime<Utc>,
    pub last_evaluated_for_advancement_at: Option<DateTime<Utc>>,
}

/// Interviewer assigned to an event, with a snapshot of their profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterviewerAssignment {
    pub interviewer_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub global_role: Option<String>,
    pub training_role: Option<String>,
    pub is_enabled: bool,
    pub manager_id: Option<String>,
    pub pool_id: Option<String>,
    pub pool_title: Option<String>,
    pub pool_is_archived: bool,
}

/// A concrete interview session inside a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterviewEvent {
    pub event_id: String,
    pub interview_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub feedback_link: Option<String>,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub has_submitted_feedback: bool,
    pub interviewers: Vec<InterviewerAssignment>,
}

/// A scheduling-change notification, already decoded from its wire format.
///
/// `status` stays a raw string: unrecognised statuses must reach the
/// reconciler so it can ignore them explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleChange {
    pub schedule_id: String,
    pub status: String,
    pub application_id: String,
    pub candidate_id: Option<String>,
    pub interview_stage_id: Option<String>,
    pub events: Vec<InterviewEvent>,
}

/// An interviewer on an upcoming event who has not been reminded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueReminder {
    pub event_id: String,
    pub interview_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub meeting_link: Option<String>,
    pub location: Option<String>,
    pub feedback_link: Option<String>,
    pub interviewer_id: String,
    pub interviewer_email: String,
    pub interviewer_name: Option<String>,
    pub schedule_id: String,
    pub application_id: String,
    pub candidate_id: Option<String>,
    pub job_id: Option<String>,
}

// ─── Feedback ──────────────────────────────────────────────

/// Leaf value of a submitted feedback form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Convert a JSON value. `null` means "no value"; nested structures
    /// are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            other => Some(FieldValue::Text(other.to_string())),
        }
    }

    /// Numeric view used by score comparisons. Booleans count as 1 / 0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// Flat map of form field path → submitted value.
pub type SubmittedValues = BTreeMap<String, FieldValue>;

/// Build [`SubmittedValues`] from a JSON object, dropping `null` entries.
pub fn submitted_values_from_json(value: &serde_json::Value) -> SubmittedValues {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| FieldValue::from_json(v).map(|fv| (k.clone(), fv)))
                .collect()
        })
        .unwrap_or_default()
}

/// One interviewer's submitted feedback, as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub feedback_id: String,
    pub application_id: String,
    /// Weak reference: the event may have been replaced since.
    pub event_id: String,
    pub interviewer_id: String,
    pub interview_id: String,
    pub submitted_at: DateTime<Utc>,
    pub submitted_values: SubmittedValues,
    pub processed_for_advancement_at: Option<DateTime<Utc>>,
}

/// Feedback as yielded by the external source, before link validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: String,
    pub application_id: String,
    pub event_id: Option<String>,
    pub interviewer_id: Option<String>,
    pub interview_id: String,
    pub submitted_at: DateTime<Utc>,
    pub submitted_values: SubmittedValues,
}

// ─── Rules ──────────────────────────────────────────────

/// Score comparison operator of a rule requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "<")]
    Lt,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Eq => "==",
            ComparisonOperator::Lte => "<=",
            ComparisonOperator::Lt => "<",
        }
    }

    pub fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            ComparisonOperator::Gte => lhs >= rhs,
            ComparisonOperator::Gt => lhs > rhs,
            ComparisonOperator::Eq => lhs == rhs,
            ComparisonOperator::Lte => lhs <= rhs,
            ComparisonOperator::Lt => lhs < rhs,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOperator {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">=" => Ok(ComparisonOperator::Gte),
            ">" => Ok(ComparisonOperator::Gt),
            "==" => Ok(ComparisonOperator::Eq),
            "<=" => Ok(ComparisonOperator::Lte),
            "<" => Ok(ComparisonOperator::Lt),
            other => Err(StagehandError::Validation(format!(
                "unsupported operator '{other}' (expected >=, >, ==, <=, <)"
            ))),
        }
    }
}

/// Kind of action attached to a rule. Only `advance_stage` is dispatched;
/// the rest are carried for the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    AdvanceStage,
    SendRejectionNotification,
    Other(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::AdvanceStage => "advance_stage",
            ActionType::SendRejectionNotification => "send_rejection_notification",
            ActionType::Other(s) => s,
        }
    }
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "advance_stage" => ActionType::AdvanceStage,
            "send_rejection_notification" => ActionType::SendRejectionNotification,
            _ => ActionType::Other(s),
        }
    }
}

impl From<ActionType> for String {
    fn from(a: ActionType) -> Self {
        a.as_str().to_string()
    }
}

/// Typed action configuration (key → scalar).
pub type ActionConfig = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRequirement {
    pub requirement_id: String,
    pub interview_id: String,
    pub score_field_path: String,
    pub operator: ComparisonOperator,
    /// Stored as text and cast at evaluation time.
    pub threshold_value: String,
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub action_id: String,
    pub action_type: ActionType,
    pub action_config: ActionConfig,
    pub execution_order: i64,
}

/// An advancement rule with its requirements and ordered actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancementRule {
    pub rule_id: String,
    /// `None` applies to every job.
    pub job_id: Option<String>,
    pub interview_plan_id: String,
    pub interview_stage_id: String,
    /// `None` means "next sequential stage".
    pub target_stage_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub requirements: Vec<RuleRequirement>,
    pub actions: Vec<RuleAction>,
}

fn default_true() -> bool {
    true
}

fn default_execution_order() -> i64 {
    1
}

/// Input shape for creating a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequirement {
    pub interview_id: String,
    pub score_field_path: String,
    pub operator: String,
    pub threshold_value: String,
    #[serde(default = "default_true")]
    pub is_required: bool,
}

/// Input shape for creating an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub action_type: String,
    #[serde(default)]
    pub action_config: ActionConfig,
    #[serde(default = "default_execution_order")]
    pub execution_order: i64,
}

/// Input shape for creating a rule (CLI import, tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub job_id: Option<String>,
    pub interview_plan_id: String,
    pub interview_stage_id: String,
    #[serde(default)]
    pub target_stage_id: Option<String>,
    pub requirements: Vec<NewRequirement>,
    pub actions: Vec<NewAction>,
}

// ─── Execution audit ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    DryRun,
    Rejected,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::DryRun => "dry_run",
            ExecutionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "dry_run" => Ok(ExecutionStatus::DryRun),
            "rejected" => Ok(ExecutionStatus::Rejected),
            other => Err(StagehandError::Validation(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

/// Who performed an execution.
pub const EXECUTED_BY_SYSTEM: &str = "system";
pub const EXECUTED_BY_RECRUITER: &str = "recruiter_manual";

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancementExecution {
    pub execution_id: String,
    pub schedule_id: String,
    pub application_id: String,
    pub rule_id: Option<String>,
    pub from_stage_id: Option<String>,
    pub to_stage_id: Option<String>,
    pub execution_status: ExecutionStatus,
    pub failure_reason: Option<String>,
    pub evaluation_results: Option<serde_json::Value>,
    pub executed_at: DateTime<Utc>,
    pub executed_by: String,
}

/// Audit row to append; the store assigns `execution_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub schedule_id: String,
    pub application_id: String,
    pub rule_id: Option<String>,
    pub from_stage_id: Option<String>,
    pub to_stage_id: Option<String>,
    pub execution_status: ExecutionStatus,
    pub failure_reason: Option<String>,
    pub evaluation_results: Option<serde_json::Value>,
    pub executed_at: DateTime<Utc>,
    pub executed_by: String,
}

/// Summary of a recent failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub execution_id: String,
    pub schedule_id: String,
    pub application_id: String,
    pub failure_reason: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Operational counters for dashboards and the `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancementStats {
    pub active_rules: u64,
    pub pending_evaluations: u64,
    pub total_executions_30d: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub dry_run_count: u64,
    pub rejected_count: u64,
    pub recent_failures: Vec<FailureSummary>,
}

// ─── External metadata ──────────────────────────────────────

/// Result of a stage lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub interview_plan_id: String,
    pub job_id: Option<String>,
}

/// A stage of an interview plan, with its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStage {
    pub id: String,
    pub title: Option<String>,
    pub order: i64,
}

/// Candidate details used in notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_unknown() {
        assert_eq!(
            "WaitingOnFeedback".parse::<ScheduleStatus>().unwrap(),
            ScheduleStatus::WaitingOnFeedback
        );
        assert!("NeedsScheduling".parse::<ScheduleStatus>().is_err());
        assert!(ScheduleStatus::Complete.awaits_decision());
        assert!(!ScheduleStatus::Scheduled.awaits_decision());
    }

    #[test]
    fn test_field_value_numeric_view() {
        assert_eq!(FieldValue::Number(3.0).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Text(" 4 ".into()).as_f64(), Some(4.0));
        assert_eq!(FieldValue::Text("strong_yes".into()).as_f64(), None);
        assert_eq!(FieldValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(FieldValue::Bool(false).as_f64(), Some(0.0));
    }

    #[test]
    fn test_submitted_values_drop_nulls() {
        let values = submitted_values_from_json(&serde_json::json!({
            "overall_score": 4,
            "notes": "solid",
            "skipped": null,
            "hire": true,
        }));
        assert_eq!(values.len(), 3);
        assert_eq!(values["overall_score"], FieldValue::Number(4.0));
        assert_eq!(values["hire"], FieldValue::Bool(true));
        assert!(!values.contains_key("skipped"));
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(">=".parse::<ComparisonOperator>().unwrap(), ComparisonOperator::Gte);
        assert!("=>".parse::<ComparisonOperator>().is_err());
        assert!(ComparisonOperator::Lte.holds(2.0, 3.0));
        assert!(!ComparisonOperator::Gt.holds(3.0, 3.0));
    }

    #[test]
    fn test_action_type_serde() {
        let a: ActionType = serde_json::from_str("\"advance_stage\"").unwrap();
        assert_eq!(a, ActionType::AdvanceStage);
        let other: ActionType = serde_json::from_str("\"post_to_channel\"").unwrap();
        assert_eq!(other, ActionType::Other("post_to_channel".into()));
        assert_eq!(serde_json::to_string(&other).unwrap(), "\"post_to_channel\"");
    }

    #[test]
    fn test_new_rule_defaults() {
        let rule: NewRule = serde_json::from_value(serde_json::json!({
            "interview_plan_id": "plan-1",
            "interview_stage_id": "stage-1",
            "requirements": [{
                "interview_id": "int-1",
                "score_field_path": "overall_score",
                "operator": ">=",
                "threshold_value": "3"
            }],
            "actions": [{"action_type": "advance_stage"}]
        }))
        .unwrap();
        assert!(rule.job_id.is_none());
        assert!(rule.requirements[0].is_required);
        assert_eq!(rule.actions[0].execution_order, 1);
    }
}
