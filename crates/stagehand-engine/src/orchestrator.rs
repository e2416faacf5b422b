//! Advancement Execution Orchestrator — the per-tick control loop.
//!
//! ## Per schedule
//! ```text
//! eligible schedule
//!   → Evaluator.evaluate_schedule
//!     ├── ready                → advance (dry-run: audit only | live: retry, audit, alert on failure)
//!     ├── requirements_not_met → rejection notice, mark evaluated, no audit row
//!     └── anything else        → mark evaluated
//! ```
//!
//! Every database write that follows the last `.await` of a branch runs
//! synchronously, so a per-schedule timeout can only cut a schedule off
//! between whole steps, never halfway through recording a result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stagehand_core::config::StagehandConfig;
use stagehand_core::error::{Result, StagehandError};
use stagehand_core::time::{Clock, Sleeper};
use stagehand_core::traits::{AdvanceSink, ArchiveSink, CandidateDirectory, StageMetadataSource};
use stagehand_core::types::{
    EXECUTED_BY_RECRUITER, EXECUTED_BY_SYSTEM, ExecutionStatus, InterviewSchedule, NewExecution,
};
use stagehand_store::AdvanceDb;

use crate::evaluator::{BlockingReason, Evaluator, Verdict};
use crate::notify::{self, Notifier};
use crate::retry::RetryPolicy;
use crate::scheduler::JobGate;

/// Collaborators the engine is built from.
#[derive(Clone)]
pub struct EngineContext {
    pub db: Arc<AdvanceDb>,
    pub metadata: Arc<dyn StageMetadataSource>,
    pub advance: Arc<dyn AdvanceSink>,
    pub archive: Arc<dyn ArchiveSink>,
    pub candidates: Arc<dyn CandidateDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Operational knobs, usually derived from [`StagehandConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub dry_run: bool,
    pub feedback_timeout_days: i64,
    /// Debounce window after the latest feedback.
    pub min_wait: chrono::Duration,
    /// Hard bound on one schedule's evaluate + execute.
    pub schedule_timeout: Duration,
    pub advance_retry: RetryPolicy,
    pub default_archive_reason_id: Option<String>,
    pub profile_url_base: String,
}

impl EngineSettings {
    pub fn from_config(config: &StagehandConfig) -> Self {
        let adv = &config.advancement;
        Self {
            dry_run: adv.dry_run,
            feedback_timeout_days: adv.feedback_timeout_days,
            min_wait: chrono::Duration::minutes(adv.feedback_min_wait_minutes),
            schedule_timeout: Duration::from_secs(adv.schedule_timeout_secs),
            advance_retry: RetryPolicy::from_secs(adv.advance_max_attempts, &adv.advance_retry_delays_secs),
            default_archive_reason_id: adv.default_archive_reason_id.clone(),
            profile_url_base: config.ats.profile_url_base.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&StagehandConfig::default())
    }
}

/// What happened to one schedule during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Advanced { execution_id: String, target_stage_id: String },
    DryRun { execution_id: String, target_stage_id: String },
    Failed { execution_id: String, error: String },
    RejectionNotified,
    Blocked { reason: String },
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub total: usize,
    pub advanced: usize,
    pub dry_run: usize,
    pub rejected: usize,
    pub blocked: usize,
    pub failed: usize,
    pub errors: usize,
    pub timed_out: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &ScheduleOutcome) {
        match outcome {
            ScheduleOutcome::Advanced { .. } => self.advanced += 1,
            ScheduleOutcome::DryRun { .. } => self.dry_run += 1,
            ScheduleOutcome::Failed { .. } => self.failed += 1,
            ScheduleOutcome::RejectionNotified => self.rejected += 1,
            ScheduleOutcome::Blocked { .. } => self.blocked += 1,
        }
    }
}

/// Result of a manual rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionOutcome {
    pub application_id: String,
    /// `None` when no schedule is on record to attach the audit row to.
    pub execution_id: Option<String>,
}

/// The advancement engine: eligibility gate, evaluation and execution.
pub struct AdvancementEngine {
    ctx: EngineContext,
    settings: EngineSettings,
    evaluator: Evaluator,
    gate: JobGate,
}

impl AdvancementEngine {
    pub fn new(ctx: EngineContext, settings: EngineSettings) -> Self {
        let evaluator = Evaluator::new(ctx.db.clone(), ctx.metadata.clone());
        Self { ctx, settings, evaluator, gate: JobGate::new("advancement") }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn db(&self) -> &Arc<AdvanceDb> {
        &self.ctx.db
    }

    /// Run a tick unless one is already in flight. `Ok(None)` means skipped.
    pub async fn try_tick(&self) -> Result<Option<TickReport>> {
        let Some(_running) = self.gate.try_enter() else {
            return Ok(None);
        };
        self.tick().await.map(Some)
    }

    /// Evaluate and act on every eligible schedule, oldest first. One
    /// schedule's failure or timeout never stops the rest of the batch.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.ctx.clock.now();
        let schedules = self
            .ctx
            .db
            .schedules_ready_for_evaluation(now, self.settings.feedback_timeout_days)?;
        let mut report = TickReport { total: schedules.len(), ..Default::default() };
        tracing::info!(
            "🔍 Advancement evaluation started: {} schedule(s), dry_run={}",
            schedules.len(),
            self.settings.dry_run
        );

        for schedule in &schedules {
            let run = tokio::time::timeout(self.settings.schedule_timeout, self.process_schedule(schedule));
            match run.await {
                Ok(Ok(outcome)) => report.record(&outcome),
                Ok(Err(e)) => {
                    report.errors += 1;
                    tracing::error!(
                        schedule_id = %schedule.schedule_id,
                        application_id = %schedule.application_id,
                        "schedule evaluation error: {e}"
                    );
                }
                Err(_) => {
                    report.errors += 1;
                    report.timed_out += 1;
                    tracing::error!(
                        schedule_id = %schedule.schedule_id,
                        "schedule evaluation timed out after {:?}",
                        self.settings.schedule_timeout
                    );
                }
            }
        }

        tracing::info!(
            total = report.total,
            advanced = report.advanced,
            dry_run = report.dry_run,
            rejected = report.rejected,
            blocked = report.blocked,
            failed = report.failed,
            errors = report.errors,
            "✅ Advancement evaluation completed"
        );
        Ok(report)
    }

    /// Diagnostic evaluation of one schedule. Nothing is recorded.
    pub async fn evaluate_schedule(&self, schedule_id: &str) -> Result<Verdict> {
        self.evaluator
            .evaluate_schedule(schedule_id, self.ctx.clock.now(), self.settings.min_wait)
            .await
    }

    /// Evaluate one eligible schedule and act on the verdict.
    pub async fn process_schedule(&self, schedule: &InterviewSchedule) -> Result<ScheduleOutcome> {
        let now = self.ctx.clock.now();
        let verdict = self
            .evaluator
            .evaluate_schedule(&schedule.schedule_id, now, self.settings.min_wait)
            .await?;

        if verdict.ready {
            return self.execute_advancement(schedule, &verdict, now).await;
        }

        match verdict.blocking_reason {
            Some(BlockingReason::RequirementsNotMet) => {
                tracing::info!(
                    schedule_id = %schedule.schedule_id,
                    application_id = %schedule.application_id,
                    "requirements not met, sending rejection notification"
                );
                self.send_rejection_notification(schedule).await;
                self.ctx.db.mark_evaluated(&schedule.schedule_id, now)?;
                Ok(ScheduleOutcome::RejectionNotified)
            }
            other => {
                self.ctx.db.mark_evaluated(&schedule.schedule_id, now)?;
                let reason = other.map(|r| r.to_string()).unwrap_or_else(|| "unknown".into());
                tracing::info!(schedule_id = %schedule.schedule_id, reason = %reason, "advancement blocked");
                Ok(ScheduleOutcome::Blocked { reason })
            }
        }
    }

    /// Carry out a ready verdict: audit-only in dry-run mode, otherwise the
    /// stage advance with bounded retries.
    pub async fn execute_advancement(
        &self,
        schedule: &InterviewSchedule,
        verdict: &Verdict,
        evaluated_at: DateTime<Utc>,
    ) -> Result<ScheduleOutcome> {
        let target = verdict.target_stage_id.clone().ok_or_else(|| {
            StagehandError::Validation(format!(
                "verdict for schedule {} has no target stage",
                schedule.schedule_id
            ))
        })?;
        let audit = |status: ExecutionStatus, failure_reason: Option<String>| NewExecution {
            schedule_id: schedule.schedule_id.clone(),
            application_id: schedule.application_id.clone(),
            rule_id: verdict.rule_id.clone(),
            from_stage_id: schedule.interview_stage_id.clone(),
            to_stage_id: Some(target.clone()),
            execution_status: status,
            failure_reason,
            evaluation_results: verdict.results_json(),
            executed_at: self.ctx.clock.now(),
            executed_by: EXECUTED_BY_SYSTEM.to_string(),
        };

        if self.settings.dry_run {
            let execution_id = self.ctx.db.record_execution(&audit(ExecutionStatus::DryRun, None))?;
            self.ctx.db.mark_evaluated(&schedule.schedule_id, evaluated_at)?;
            tracing::info!(
                schedule_id = %schedule.schedule_id,
                application_id = %schedule.application_id,
                rule_id = ?verdict.rule_id,
                from_stage_id = ?schedule.interview_stage_id,
                target_stage_id = %target,
                execution_id = %execution_id,
                "🧪 DRY RUN: would advance candidate"
            );
            return Ok(ScheduleOutcome::DryRun { execution_id, target_stage_id: target });
        }

        let sink = self.ctx.advance.as_ref();
        let application_id = schedule.application_id.as_str();
        let target_ref = target.as_str();
        let attempt = self
            .settings
            .advance_retry
            .run(self.ctx.sleeper.as_ref(), "stage advance", move |_| async move {
                sink.advance(application_id, target_ref).await
            })
            .await;

        match attempt {
            Ok(()) => {
                let execution_id = self.ctx.db.record_execution(&audit(ExecutionStatus::Success, None))?;
                self.ctx.db.mark_feedback_processed(&schedule.application_id, evaluated_at)?;
                self.ctx.db.mark_evaluated(&schedule.schedule_id, evaluated_at)?;
                tracing::info!(
                    schedule_id = %schedule.schedule_id,
                    application_id = %schedule.application_id,
                    execution_id = %execution_id,
                    target_stage_id = %target,
                    "🚀 Candidate advanced"
                );
                Ok(ScheduleOutcome::Advanced { execution_id, target_stage_id: target })
            }
            Err(e) => {
                let reason = e.last_error.to_string();
                let execution_id = self
                    .ctx
                    .db
                    .record_execution(&audit(ExecutionStatus::Failed, Some(reason.clone())))?;
                self.ctx.db.mark_evaluated(&schedule.schedule_id, evaluated_at)?;
                tracing::error!(
                    schedule_id = %schedule.schedule_id,
                    application_id = %schedule.application_id,
                    execution_id = %execution_id,
                    attempts = e.attempts,
                    "❌ Advancement failed: {reason}"
                );
                self.handle_advancement_error(schedule, &reason).await;
                Ok(ScheduleOutcome::Failed { execution_id, error: reason })
            }
        }
    }

    /// Archive an application after a human confirmed the rejection.
    pub async fn execute_rejection(&self, application_id: &str) -> Result<RejectionOutcome> {
        let reason_id = self
            .settings
            .default_archive_reason_id
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                StagehandError::Configuration(
                    "DEFAULT_ARCHIVE_REASON_ID must be configured to execute rejections".into(),
                )
            })?;

        self.ctx.archive.archive(application_id, reason_id).await?;

        let execution_id = match self.ctx.db.latest_schedule_for_application(application_id)? {
            Some(schedule) => Some(self.ctx.db.record_execution(&NewExecution {
                schedule_id: schedule.schedule_id,
                application_id: application_id.to_string(),
                rule_id: None,
                from_stage_id: schedule.interview_stage_id,
                to_stage_id: None,
                execution_status: ExecutionStatus::Rejected,
                failure_reason: None,
                evaluation_results: None,
                executed_at: self.ctx.clock.now(),
                executed_by: EXECUTED_BY_RECRUITER.to_string(),
            })?),
            None => {
                tracing::warn!(application_id, "no schedule on record, rejection not audited");
                None
            }
        };

        tracing::info!(application_id, "🗄️ Candidate rejected manually");
        Ok(RejectionOutcome { application_id: application_id.to_string(), execution_id })
    }

    /// Best effort: any failure here is logged and swallowed.
    async fn send_rejection_notification(&self, schedule: &InterviewSchedule) {
        let Some(candidate_id) = schedule.candidate_id.as_deref() else {
            tracing::warn!(schedule_id = %schedule.schedule_id, "no candidate id, rejection notice skipped");
            return;
        };

        let candidate_name = match self.ctx.candidates.fetch_candidate(candidate_id).await {
            Ok(c) => c.name,
            Err(e) => {
                tracing::warn!(candidate_id, "candidate lookup failed: {e}");
                "Unknown candidate".to_string()
            }
        };
        let job_title = match schedule.job_id.as_deref() {
            Some(job_id) => match self.ctx.candidates.fetch_job_title(job_id).await {
                Ok(title) => title,
                Err(e) => {
                    tracing::warn!(job_id, "job title lookup failed: {e}");
                    "Position".to_string()
                }
            },
            None => "Position".to_string(),
        };
        let feedback = match self.ctx.db.feedback_for_schedule(&schedule.schedule_id) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(schedule_id = %schedule.schedule_id, "feedback summary unavailable: {e}");
                Vec::new()
            }
        };

        let notice = notify::rejection_notice(
            &candidate_name,
            &job_title,
            &schedule.application_id,
            &notify::profile_url(&self.settings.profile_url_base, candidate_id),
            &feedback,
            self.ctx.clock.now(),
        );
        match self.ctx.notifier.notify(&notice).await {
            Ok(()) => tracing::info!(
                application_id = %schedule.application_id,
                candidate_id,
                "📨 Rejection notification sent"
            ),
            Err(e) => tracing::error!(
                application_id = %schedule.application_id,
                schedule_id = %schedule.schedule_id,
                "rejection notification failed: {e}"
            ),
        }
    }

    /// Alert operators about an exhausted advance. Best effort.
    async fn handle_advancement_error(&self, schedule: &InterviewSchedule, error: &str) {
        let candidate_id = schedule.candidate_id.as_deref().unwrap_or("unknown");
        let candidate_name = match schedule.candidate_id.as_deref() {
            Some(id) => self
                .ctx
                .candidates
                .fetch_candidate(id)
                .await
                .map(|c| c.name)
                .unwrap_or_else(|_| "Unknown".to_string()),
            None => "Unknown".to_string(),
        };
        let alert = notify::advancement_failure_alert(
            &schedule.schedule_id,
            &schedule.application_id,
            &candidate_name,
            error,
            &notify::profile_url(&self.settings.profile_url_base, candidate_id),
            self.ctx.clock.now(),
        );
        if let Err(e) = self.ctx.notifier.notify(&alert).await {
            tracing::error!(schedule_id = %schedule.schedule_id, "error alert failed: {e}");
        }
    }
}
