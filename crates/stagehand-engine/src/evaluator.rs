//! Rule matching and requirement evaluation.
//!
//! ## Decision order
//! ```text
//! schedule
//!   → schedule_not_found
//!   → no_rule                 (no active rule for job/plan/stage)
//!   → no_feedback_submitted   (nothing linked to the current events)
//!   → too_recent              (debounce window)
//!   → requirements_not_met    (carries per-requirement results)
//!   → target_stage_error: …   (explicit target missing, no next stage)
//!   → ready
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use stagehand_core::error::{Result, StagehandError};
use stagehand_core::traits::StageMetadataSource;
use stagehand_core::types::{
    AdvancementRule, ComparisonOperator, FeedbackSubmission, FieldValue, InterviewEvent,
};
use stagehand_store::AdvanceDb;

// ─── Results ──────────────────────────────────────────────

/// Verdict for one interviewer (or one event, when feedback is missing).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterviewerResult {
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interviewer_id: Option<String>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_value: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<ComparisonOperator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
}

impl InterviewerResult {
    fn failed(event_id: &str, interviewer_id: Option<&str>, reason: String) -> Self {
        Self {
            event_id: event_id.to_string(),
            interviewer_id: interviewer_id.map(String::from),
            passed: false,
            reason: Some(reason),
            score_value: None,
            operator: None,
            threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementResult {
    pub requirement_id: String,
    pub interview_id: String,
    pub passed: bool,
    pub blocking_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interviewer_results: Vec<InterviewerResult>,
}

/// Outcome of evaluating every requirement of a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEvaluation {
    pub all_passed: bool,
    pub results: Vec<RequirementResult>,
}

/// Why a schedule is not ready to advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockingReason {
    ScheduleNotFound,
    NoRule,
    NoFeedbackSubmitted,
    TooRecent,
    RequirementsNotMet,
    TargetStageError(String),
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingReason::ScheduleNotFound => f.write_str("schedule_not_found"),
            BlockingReason::NoRule => f.write_str("no_rule"),
            BlockingReason::NoFeedbackSubmitted => f.write_str("no_feedback_submitted"),
            BlockingReason::TooRecent => f.write_str("too_recent"),
            BlockingReason::RequirementsNotMet => f.write_str("requirements_not_met"),
            BlockingReason::TargetStageError(msg) => write!(f, "target_stage_error: {msg}"),
        }
    }
}

impl Serialize for BlockingReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Structured verdict for one schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub schedule_id: String,
    pub ready: bool,
    pub blocking_reason: Option<BlockingReason>,
    pub rule_id: Option<String>,
    pub target_stage_id: Option<String>,
    pub evaluation_results: Option<RuleEvaluation>,
}

impl Verdict {
    fn blocked(schedule_id: &str, reason: BlockingReason) -> Self {
        Self {
            schedule_id: schedule_id.to_string(),
            ready: false,
            blocking_reason: Some(reason),
            rule_id: None,
            target_stage_id: None,
            evaluation_results: None,
        }
    }

    /// Results snapshot as stored in the audit log.
    pub fn results_json(&self) -> Option<serde_json::Value> {
        self.evaluation_results
            .as_ref()
            .and_then(|r| serde_json::to_value(r).ok())
    }
}

/// Failure to resolve where a candidate should go next.
#[derive(Debug, thiserror::Error)]
pub enum TargetStageError {
    #[error("current stage {stage_id} not found in plan {plan_id}")]
    CurrentStageNotFound { stage_id: String, plan_id: String },
    #[error("no next stage (current order: {current_order}, plan: {plan_id})")]
    NoNextStage { current_order: i64, plan_id: String },
    #[error(transparent)]
    Lookup(#[from] StagehandError),
}

// ─── Score comparison ──────────────────────────────────────

/// Result of comparing one submitted value to a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreComparison {
    Passed,
    Failed,
    /// Ordering operator applied to a non-numeric value.
    NonNumeric,
}

impl ScoreComparison {
    pub fn passed(&self) -> bool {
        matches!(self, ScoreComparison::Passed)
    }
}

/// Numeric comparison when both sides parse as numbers, text equality for
/// `==` otherwise.
pub fn compare_score(value: &FieldValue, op: ComparisonOperator, threshold: &str) -> ScoreComparison {
    let threshold_num = threshold.trim().parse::<f64>().ok().filter(|n| n.is_finite());
    match (value.as_f64(), threshold_num) {
        (Some(lhs), Some(rhs)) => {
            if op.holds(lhs, rhs) {
                ScoreComparison::Passed
            } else {
                ScoreComparison::Failed
            }
        }
        _ if op == ComparisonOperator::Eq => {
            if value.to_string() == threshold {
                ScoreComparison::Passed
            } else {
                ScoreComparison::Failed
            }
        }
        _ => {
            tracing::warn!(
                score_value = %value,
                threshold,
                operator = %op,
                "non_numeric_comparison"
            );
            ScoreComparison::NonNumeric
        }
    }
}

/// Evaluate every requirement of `rule` against the schedule's current
/// events and the feedback linked to them.
///
/// Completeness is judged per event by assigned interviewer: each one must
/// have at least one submission on that event. Every submission on a
/// complete event must then pass.
pub fn evaluate_requirements(
    rule: &AdvancementRule,
    events: &[InterviewEvent],
    feedback: &[FeedbackSubmission],
) -> RuleEvaluation {
    let mut events_by_interview: BTreeMap<&str, Vec<&InterviewEvent>> = BTreeMap::new();
    for event in events {
        events_by_interview
            .entry(event.interview_id.as_str())
            .or_default()
            .push(event);
    }
    let mut feedback_by_event: BTreeMap<&str, Vec<&FeedbackSubmission>> = BTreeMap::new();
    for fb in feedback {
        feedback_by_event.entry(fb.event_id.as_str()).or_default().push(fb);
    }

    let mut results = Vec::with_capacity(rule.requirements.len());
    for req in &rule.requirements {
        let Some(scheduled) = events_by_interview.get(req.interview_id.as_str()) else {
            if req.is_required {
                results.push(RequirementResult {
                    requirement_id: req.requirement_id.clone(),
                    interview_id: req.interview_id.clone(),
                    passed: false,
                    blocking_reason: Some("required_interview_not_scheduled".into()),
                    note: None,
                    interviewer_results: Vec::new(),
                });
            } else {
                results.push(RequirementResult {
                    requirement_id: req.requirement_id.clone(),
                    interview_id: req.interview_id.clone(),
                    passed: true,
                    blocking_reason: None,
                    note: Some("optional_interview_not_scheduled".into()),
                    interviewer_results: Vec::new(),
                });
            }
            continue;
        };

        let mut passed = true;
        let mut interviewer_results = Vec::new();

        for event in scheduled {
            let submissions = feedback_by_event
                .get(event.event_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let submitters: BTreeSet<&str> =
                submissions.iter().map(|fb| fb.interviewer_id.as_str()).collect();
            let expected = event.interviewers.len();
            let submitted = event
                .interviewers
                .iter()
                .filter(|a| submitters.contains(a.interviewer_id.as_str()))
                .count();
            if submitted < expected {
                interviewer_results.push(InterviewerResult::failed(
                    &event.event_id,
                    None,
                    format!("missing_feedback_{submitted}_of_{expected}"),
                ));
                passed = false;
                continue;
            }

            for fb in submissions {
                let Some(value) = fb.submitted_values.get(&req.score_field_path) else {
                    interviewer_results.push(InterviewerResult::failed(
                        &event.event_id,
                        Some(fb.interviewer_id.as_str()),
                        format!("score_field_missing_{}", req.score_field_path),
                    ));
                    passed = false;
                    continue;
                };

                let cmp = compare_score(value, req.operator, &req.threshold_value);
                interviewer_results.push(InterviewerResult {
                    event_id: event.event_id.clone(),
                    interviewer_id: Some(fb.interviewer_id.clone()),
                    passed: cmp.passed(),
                    reason: (cmp == ScoreComparison::NonNumeric)
                        .then(|| "non_numeric_comparison".to_string()),
                    score_value: Some(value.clone()),
                    operator: Some(req.operator),
                    threshold: Some(req.threshold_value.clone()),
                });
                if !cmp.passed() {
                    passed = false;
                }
            }
        }

        results.push(RequirementResult {
            requirement_id: req.requirement_id.clone(),
            interview_id: req.interview_id.clone(),
            passed,
            blocking_reason: (!passed).then(|| "score_threshold_not_met".to_string()),
            note: None,
            interviewer_results,
        });
    }

    RuleEvaluation {
        all_passed: results.iter().all(|r| r.passed),
        results,
    }
}

// ─── Evaluator ──────────────────────────────────────────────

/// Reads the rule catalog, schedule aggregate and feedback store, and asks
/// the stage metadata source for sequential targets.
pub struct Evaluator {
    db: Arc<AdvanceDb>,
    metadata: Arc<dyn StageMetadataSource>,
}

impl Evaluator {
    pub fn new(db: Arc<AdvanceDb>, metadata: Arc<dyn StageMetadataSource>) -> Self {
        Self { db, metadata }
    }

    pub fn find_matching_rule(
        &self,
        job_id: Option<&str>,
        interview_plan_id: &str,
        interview_stage_id: &str,
    ) -> Result<Option<AdvancementRule>> {
        self.db.find_matching_rule(job_id, interview_plan_id, interview_stage_id)
    }

    /// Evaluate a rule against a schedule's current events.
    pub fn evaluate_rule_requirements(
        &self,
        rule: &AdvancementRule,
        schedule_id: &str,
        feedback: &[FeedbackSubmission],
    ) -> Result<RuleEvaluation> {
        let events = self.db.list_events(schedule_id)?;
        let evaluation = evaluate_requirements(rule, &events, feedback);
        tracing::info!(
            rule_id = %rule.rule_id,
            schedule_id,
            all_passed = evaluation.all_passed,
            total_requirements = rule.requirements.len(),
            "rule requirements evaluated"
        );
        Ok(evaluation)
    }

    /// Explicit target when the rule names one, otherwise the stage whose
    /// order is one past the current stage's.
    pub async fn get_target_stage_for_rule(
        &self,
        rule: &AdvancementRule,
        current_stage_id: &str,
        interview_plan_id: &str,
    ) -> std::result::Result<String, TargetStageError> {
        if let Some(target) = &rule.target_stage_id {
            tracing::debug!(rule_id = %rule.rule_id, target_stage_id = %target, "explicit target stage");
            return Ok(target.clone());
        }

        let stages = self.metadata.list_stages(interview_plan_id).await?;
        let current = stages
            .iter()
            .find(|s| s.id == current_stage_id)
            .ok_or_else(|| TargetStageError::CurrentStageNotFound {
                stage_id: current_stage_id.to_string(),
                plan_id: interview_plan_id.to_string(),
            })?;
        let next_order = current.order + 1;
        let next = stages
            .iter()
            .find(|s| s.order == next_order)
            .ok_or_else(|| TargetStageError::NoNextStage {
                current_order: current.order,
                plan_id: interview_plan_id.to_string(),
            })?;

        tracing::debug!(
            rule_id = %rule.rule_id,
            current_order = current.order,
            target_stage_id = %next.id,
            "sequential target stage"
        );
        Ok(next.id.clone())
    }

    /// Full decision for one schedule. Read-only: nothing is marked or recorded.
    pub async fn evaluate_schedule(
        &self,
        schedule_id: &str,
        now: DateTime<Utc>,
        min_wait: chrono::Duration,
    ) -> Result<Verdict> {
        let Some(schedule) = self.db.get_schedule(schedule_id)? else {
            return Ok(Verdict::blocked(schedule_id, BlockingReason::ScheduleNotFound));
        };
        let (Some(plan_id), Some(stage_id)) =
            (schedule.interview_plan_id.as_deref(), schedule.interview_stage_id.as_deref())
        else {
            return Ok(Verdict::blocked(schedule_id, BlockingReason::NoRule));
        };

        let Some(rule) = self.find_matching_rule(schedule.job_id.as_deref(), plan_id, stage_id)? else {
            return Ok(Verdict::blocked(schedule_id, BlockingReason::NoRule));
        };

        let feedback = self.db.feedback_for_schedule(schedule_id)?;
        if feedback.is_empty() {
            let mut v = Verdict::blocked(schedule_id, BlockingReason::NoFeedbackSubmitted);
            v.rule_id = Some(rule.rule_id);
            return Ok(v);
        }

        let debounce_from = now - min_wait;
        if feedback.iter().any(|fb| fb.submitted_at > debounce_from) {
            let mut v = Verdict::blocked(schedule_id, BlockingReason::TooRecent);
            v.rule_id = Some(rule.rule_id);
            return Ok(v);
        }

        let evaluation = self.evaluate_rule_requirements(&rule, schedule_id, &feedback)?;
        if !evaluation.all_passed {
            let mut v = Verdict::blocked(schedule_id, BlockingReason::RequirementsNotMet);
            v.rule_id = Some(rule.rule_id);
            v.evaluation_results = Some(evaluation);
            return Ok(v);
        }

        match self.get_target_stage_for_rule(&rule, stage_id, plan_id).await {
            Ok(target) => {
                tracing::info!(
                    schedule_id,
                    rule_id = %rule.rule_id,
                    target_stage_id = %target,
                    "schedule ready for advancement"
                );
                Ok(Verdict {
                    schedule_id: schedule_id.to_string(),
                    ready: true,
                    blocking_reason: None,
                    rule_id: Some(rule.rule_id),
                    target_stage_id: Some(target),
                    evaluation_results: Some(evaluation),
                })
            }
            Err(e) => {
                tracing::error!(schedule_id, rule_id = %rule.rule_id, "target stage error: {e}");
                let mut v = Verdict::blocked(schedule_id, BlockingReason::TargetStageError(e.to_string()));
                v.rule_id = Some(rule.rule_id);
                v.evaluation_results = Some(evaluation);
                Ok(v)
            }
        }
    }
}
