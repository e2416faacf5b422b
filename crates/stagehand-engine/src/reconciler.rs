//! Schedule State Reconciler — applies scheduling-change notifications to
//! the local schedule aggregate.
//!
//! Plan/job lookups happen before the write transaction opens, so a slow
//! or failing ATS never holds the database. The write itself (upsert +
//! full replace of events and assignments) is a single transaction.

use std::sync::Arc;

use serde::Serialize;
use stagehand_core::error::Result;
use stagehand_core::time::{Clock, Sleeper};
use stagehand_core::traits::StageMetadataSource;
use stagehand_core::types::{ScheduleChange, ScheduleStatus};
use stagehand_store::{AdvanceDb, Enrichment};

use crate::retry::RetryPolicy;

/// What a reconciliation pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Upserted { events: usize, enriched: bool },
    Deleted { existed: bool },
    Ignored { status: String },
}

/// Resolve plan and job for a stage, with retries on the plan lookup.
///
/// The job lookup is best effort inside a successful attempt: when it
/// fails the job stays unknown and only global rules can match.
pub async fn resolve_enrichment(
    metadata: &dyn StageMetadataSource,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
    interview_stage_id: &str,
    application_id: &str,
) -> Option<Enrichment> {
    let resolved = policy
        .run(sleeper, "stage lookup", move |_| async move {
            let info = metadata.fetch_stage_info(interview_stage_id).await?;
            let job_id = match info.job_id {
                Some(job) => Some(job),
                None => match metadata.fetch_application_job(application_id).await {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::warn!(application_id, "job id lookup failed: {e}");
                        None
                    }
                },
            };
            Ok(Enrichment { interview_plan_id: Some(info.interview_plan_id), job_id })
        })
        .await;

    match resolved {
        Ok(enrichment) => Some(enrichment),
        Err(e) => {
            tracing::error!(interview_stage_id, "plan/job enrichment failed: {e}");
            None
        }
    }
}

pub struct Reconciler {
    db: Arc<AdvanceDb>,
    metadata: Arc<dyn StageMetadataSource>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        db: Arc<AdvanceDb>,
        metadata: Arc<dyn StageMetadataSource>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self { db, metadata, clock, sleeper, policy }
    }

    /// Apply one scheduling-change notification. Safe to replay.
    pub async fn reconcile(&self, change: &ScheduleChange) -> Result<ReconcileOutcome> {
        tracing::info!(
            schedule_id = %change.schedule_id,
            status = %change.status,
            events = change.events.len(),
            "processing schedule update"
        );

        let status = match change.status.parse::<ScheduleStatus>() {
            Ok(s @ (ScheduleStatus::Scheduled | ScheduleStatus::Complete | ScheduleStatus::Cancelled)) => s,
            _ => {
                tracing::info!(schedule_id = %change.schedule_id, status = %change.status, "schedule status ignored");
                return Ok(ReconcileOutcome::Ignored { status: change.status.clone() });
            }
        };

        if status == ScheduleStatus::Cancelled {
            let existed = self.db.delete_schedule(&change.schedule_id)?;
            tracing::info!(schedule_id = %change.schedule_id, existed, "🗑️ schedule cancelled");
            return Ok(ReconcileOutcome::Deleted { existed });
        }

        let enrichment = match change.interview_stage_id.as_deref() {
            Some(stage_id) => {
                resolve_enrichment(
                    self.metadata.as_ref(),
                    self.sleeper.as_ref(),
                    &self.policy,
                    stage_id,
                    &change.application_id,
                )
                .await
            }
            None => None,
        };
        let enriched = enrichment.is_some();

        self.db.apply_schedule_replace(
            change,
            status,
            &enrichment.unwrap_or_default(),
            self.clock.now(),
        )?;

        tracing::info!(
            schedule_id = %change.schedule_id,
            status = %status,
            enriched,
            "schedule updated"
        );
        Ok(ReconcileOutcome::Upserted { events: change.events.len(), enriched })
    }
}
