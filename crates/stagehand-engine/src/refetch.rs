//! Enrichment sweep — retries plan/job resolution for recent schedules whose
//! interview plan is still unknown, so they can match rules again.

use std::sync::Arc;

use serde::Serialize;
use stagehand_core::config::EnrichmentConfig;
use stagehand_core::error::Result;
use stagehand_core::time::{Clock, Sleeper};
use stagehand_core::traits::StageMetadataSource;
use stagehand_store::AdvanceDb;

use crate::reconciler::resolve_enrichment;
use crate::retry::RetryPolicy;
use crate::scheduler::JobGate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub enriched: usize,
    pub failed: usize,
}

pub struct EnrichmentSweep {
    db: Arc<AdvanceDb>,
    metadata: Arc<dyn StageMetadataSource>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    batch_size: u32,
    lookback_days: i64,
    gate: JobGate,
}

impl EnrichmentSweep {
    pub fn new(
        db: Arc<AdvanceDb>,
        metadata: Arc<dyn StageMetadataSource>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        config: &EnrichmentConfig,
    ) -> Self {
        Self {
            db,
            metadata,
            clock,
            sleeper,
            batch_size: config.refetch_batch_size,
            lookback_days: config.refetch_lookback_days,
            gate: JobGate::new("enrichment sweep"),
        }
    }

    pub async fn try_run(&self) -> Result<Option<SweepReport>> {
        let Some(_running) = self.gate.try_enter() else {
            return Ok(None);
        };
        self.run().await.map(Some)
    }

    /// One lookup attempt per schedule; the next sweep retries failures.
    pub async fn run(&self) -> Result<SweepReport> {
        let pending = self
            .db
            .schedules_missing_plan(self.clock.now(), self.lookback_days, self.batch_size)?;
        let mut report = SweepReport { candidates: pending.len(), ..Default::default() };
        if pending.is_empty() {
            return Ok(report);
        }

        let policy = RetryPolicy::once();
        for schedule in &pending {
            let Some(stage_id) = schedule.interview_stage_id.as_deref() else {
                continue;
            };
            let resolved = resolve_enrichment(
                self.metadata.as_ref(),
                self.sleeper.as_ref(),
                &policy,
                stage_id,
                &schedule.application_id,
            )
            .await;
            match resolved {
                Some(enrichment) => {
                    self.db.set_enrichment(&schedule.schedule_id, &enrichment)?;
                    report.enriched += 1;
                }
                None => report.failed += 1,
            }
        }

        tracing::info!(
            candidates = report.candidates,
            enriched = report.enriched,
            failed = report.failed,
            "🔁 Enrichment sweep completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use stagehand_core::error::StagehandError;
    use stagehand_core::time::{FixedClock, RecordingSleeper};
    use stagehand_core::types::{PlanStage, ScheduleChange, ScheduleStatus, StageInfo};
    use stagehand_store::Enrichment;

    struct PartialMetadata;

    #[async_trait]
    impl StageMetadataSource for PartialMetadata {
        async fn fetch_stage_info(&self, stage: &str) -> Result<StageInfo> {
            match stage {
                "stage-ok" => Ok(StageInfo { interview_plan_id: "plan-1".into(), job_id: Some("job-1".into()) }),
                _ => Err(StagehandError::external("ats", "stage not found")),
            }
        }
        async fn fetch_application_job(&self, _app: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn list_stages(&self, _plan: &str) -> Result<Vec<PlanStage>> {
            Ok(Vec::new())
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn seed(db: &AdvanceDb, schedule_id: &str, stage: &str, now: DateTime<Utc>) {
        let change = ScheduleChange {
            schedule_id: schedule_id.into(),
            status: "Scheduled".into(),
            application_id: format!("app-{schedule_id}"),
            candidate_id: None,
            interview_stage_id: Some(stage.into()),
            events: Vec::new(),
        };
        db.apply_schedule_replace(&change, ScheduleStatus::Scheduled, &Enrichment::default(), now)
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_fills_missing_plans() {
        let db = Arc::new(AdvanceDb::open_in_memory().unwrap());
        let now = at("2026-03-10T12:00:00Z");
        seed(&db, "s-ok", "stage-ok", now - Duration::days(1));
        seed(&db, "s-bad", "stage-missing", now - Duration::days(1));
        seed(&db, "s-old", "stage-ok", now - Duration::days(30));

        let sleeper = Arc::new(RecordingSleeper::new());
        let sweep = EnrichmentSweep::new(
            db.clone(),
            Arc::new(PartialMetadata),
            Arc::new(FixedClock::new(now)),
            sleeper.clone(),
            &EnrichmentConfig::default(),
        );

        let report = sweep.run().await.unwrap();
        assert_eq!(report, SweepReport { candidates: 2, enriched: 1, failed: 1 });
        assert!(sleeper.recorded().is_empty());

        let ok = db.get_schedule("s-ok").unwrap().unwrap();
        assert_eq!(ok.interview_plan_id.as_deref(), Some("plan-1"));
        assert_eq!(ok.job_id.as_deref(), Some("job-1"));
        assert!(db.get_schedule("s-old").unwrap().unwrap().interview_plan_id.is_none());
    }
}
