//! End-to-end advancement scenarios against an in-memory store and fake ATS.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stagehand_core::error::{Result, StagehandError};
use stagehand_core::time::{Clock, FixedClock, RecordingSleeper};
use stagehand_core::traits::{AdvanceSink, ArchiveSink, CandidateDirectory, StageMetadataSource};
use stagehand_core::types::{
    CandidateSummary, ExecutionStatus, FeedbackSubmission, FieldValue, InterviewEvent,
    InterviewerAssignment, NewAction, NewRequirement, NewRule, PlanStage, ScheduleChange, StageInfo,
    SubmittedValues,
};
use stagehand_engine::{
    AdvancementEngine, EngineContext, EngineSettings, Notification, Notifier, Reconciler, RetryPolicy,
    ScheduleOutcome,
};
use stagehand_store::AdvanceDb;

// ─── Fakes ──────────────────────────────────────────────

#[derive(Default)]
struct FakeAts {
    stages: Vec<PlanStage>,
    advance_failures: AtomicU32,
    slow_application: Option<String>,
    advanced: Mutex<Vec<(String, String)>>,
    archived: Mutex<Vec<(String, String)>>,
}

impl FakeAts {
    fn with_stages(ids: &[&str]) -> Self {
        Self {
            stages: ids
                .iter()
                .enumerate()
                .map(|(i, id)| PlanStage { id: id.to_string(), title: None, order: i as i64 + 1 })
                .collect(),
            ..Default::default()
        }
    }

    fn advance_calls(&self) -> usize {
        self.advanced.lock().unwrap().len()
    }
}

#[async_trait]
impl StageMetadataSource for FakeAts {
    async fn fetch_stage_info(&self, _stage: &str) -> Result<StageInfo> {
        Ok(StageInfo { interview_plan_id: "plan-1".into(), job_id: None })
    }
    async fn fetch_application_job(&self, _app: &str) -> Result<Option<String>> {
        Ok(Some("job-1".into()))
    }
    async fn list_stages(&self, _plan: &str) -> Result<Vec<PlanStage>> {
        Ok(self.stages.clone())
    }
}

#[async_trait]
impl AdvanceSink for FakeAts {
    async fn advance(&self, application_id: &str, target_stage_id: &str) -> Result<()> {
        if self.slow_application.as_deref() == Some(application_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.advanced
            .lock()
            .unwrap()
            .push((application_id.to_string(), target_stage_id.to_string()));
        let remaining = self.advance_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.advance_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StagehandError::external("ats", "HTTP 503"));
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveSink for FakeAts {
    async fn archive(&self, application_id: &str, reason: &str) -> Result<()> {
        self.archived
            .lock()
            .unwrap()
            .push((application_id.to_string(), reason.to_string()));
        Ok(())
    }
}

#[async_trait]
impl CandidateDirectory for FakeAts {
    async fn fetch_candidate(&self, candidate_id: &str) -> Result<CandidateSummary> {
        Ok(CandidateSummary { id: candidate_id.into(), name: "Ada Lovelace".into(), email: None })
    }
    async fn fetch_job_title(&self, _job_id: &str) -> Result<String> {
        Ok("Backend Engineer".into())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ─── Harness ──────────────────────────────────────────────

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn minutes(m: i64) -> chrono::Duration {
    chrono::Duration::minutes(m)
}

/// Evaluation time used by every scenario.
fn t0() -> DateTime<Utc> {
    at("2026-03-02T12:00:00Z")
}

struct Harness {
    db: Arc<AdvanceDb>,
    ats: Arc<FakeAts>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<FixedClock>,
    sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    fn new(ats: FakeAts) -> Self {
        Self {
            db: Arc::new(AdvanceDb::open_in_memory().unwrap()),
            ats: Arc::new(ats),
            notifier: Arc::new(RecordingNotifier::default()),
            clock: Arc::new(FixedClock::new(t0() - minutes(120))),
            sleeper: Arc::new(RecordingSleeper::new()),
        }
    }

    fn engine(&self, settings: EngineSettings) -> AdvancementEngine {
        AdvancementEngine::new(
            EngineContext {
                db: self.db.clone(),
                metadata: self.ats.clone(),
                advance: self.ats.clone(),
                archive: self.ats.clone(),
                candidates: self.ats.clone(),
                notifier: self.notifier.clone(),
                clock: self.clock.clone(),
                sleeper: self.sleeper.clone(),
            },
            settings,
        )
    }

    /// Completed schedule with one event `e-<schedule_id>` and interviewer `u1`.
    async fn schedule(&self, schedule_id: &str, application_id: &str) {
        let reconciler = Reconciler::new(
            self.db.clone(),
            self.ats.clone(),
            self.clock.clone(),
            self.sleeper.clone(),
            RetryPolicy::enrichment(),
        );
        let change = ScheduleChange {
            schedule_id: schedule_id.into(),
            status: "Complete".into(),
            application_id: application_id.into(),
            candidate_id: Some(format!("cand-{application_id}")),
            interview_stage_id: Some("stage-1".into()),
            events: vec![InterviewEvent {
                event_id: format!("e-{schedule_id}"),
                interview_id: "int-1".into(),
                interviewers: vec![InterviewerAssignment { interviewer_id: "u1".into(), ..Default::default() }],
                ..Default::default()
            }],
        };
        reconciler.reconcile(&change).await.unwrap();
    }

    fn feedback(&self, schedule_id: &str, application_id: &str, score: f64, submitted_at: DateTime<Utc>) {
        let mut values = SubmittedValues::new();
        values.insert("overall_score".into(), FieldValue::Number(score));
        let fb = FeedbackSubmission {
            feedback_id: format!("fb-{schedule_id}-{submitted_at}"),
            application_id: application_id.into(),
            event_id: format!("e-{schedule_id}"),
            interviewer_id: "u1".into(),
            interview_id: "int-1".into(),
            submitted_at,
            submitted_values: values,
            processed_for_advancement_at: None,
        };
        assert!(self.db.insert_feedback(&fb, submitted_at).unwrap());
    }

    fn rule(&self, target_stage_id: Option<&str>) -> String {
        let rule = NewRule {
            job_id: None,
            interview_plan_id: "plan-1".into(),
            interview_stage_id: "stage-1".into(),
            target_stage_id: target_stage_id.map(str::to_string),
            requirements: vec![NewRequirement {
                interview_id: "int-1".into(),
                score_field_path: "overall_score".into(),
                operator: ">=".into(),
                threshold_value: "3".into(),
                is_required: true,
            }],
            actions: vec![NewAction {
                action_type: "advance_stage".into(),
                action_config: Default::default(),
                execution_order: 1,
            }],
        };
        self.db.create_rule(&rule, t0() - minutes(24 * 60)).unwrap().rule_id
    }
}

// ─── Scenarios ──────────────────────────────────────────────

#[tokio::test]
async fn test_full_advancement_flow() {
    let h = Harness::new(FakeAts::with_stages(&["stage-1", "stage-2", "stage-3"]));
    let rule_id = h.rule(None);
    h.schedule("sch-1", "app-1").await;
    h.feedback("sch-1", "app-1", 4.0, t0() - minutes(60));
    h.clock.set(t0());

    let engine = h.engine(EngineSettings::default());
    let verdict = engine.evaluate_schedule("sch-1").await.unwrap();
    assert!(verdict.ready);
    assert_eq!(verdict.target_stage_id.as_deref(), Some("stage-2"));

    let report = engine.tick().await.unwrap();
    assert_eq!((report.total, report.advanced, report.errors), (1, 1, 0));
    assert_eq!(
        *h.ats.advanced.lock().unwrap(),
        vec![("app-1".to_string(), "stage-2".to_string())]
    );

    let rows = h.db.executions_for_schedule("sch-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].execution_status, ExecutionStatus::Success);
    assert_eq!(rows[0].rule_id.as_deref(), Some(rule_id.as_str()));
    assert_eq!(rows[0].from_stage_id.as_deref(), Some("stage-1"));
    assert_eq!(rows[0].to_stage_id.as_deref(), Some("stage-2"));
    assert_eq!(rows[0].executed_by, "system");
    assert!(rows[0].evaluation_results.is_some());

    let feedback = h.db.feedback_for_schedule("sch-1").unwrap();
    assert!(feedback.iter().all(|f| f.processed_for_advancement_at.is_some()));

    // Nothing changed since: the next tick has no work.
    h.clock.advance(minutes(30));
    assert_eq!(engine.tick().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_dry_run_never_calls_sink() {
    let h = Harness::new(FakeAts::with_stages(&["stage-1", "stage-2"]));
    h.rule(None);
    h.schedule("sch-1", "app-1").await;
    h.feedback("sch-1", "app-1", 5.0, t0() - minutes(60));
    h.clock.set(t0());

    let engine = h.engine(EngineSettings { dry_run: true, ..Default::default() });
    let report = engine.tick().await.unwrap();
    assert_eq!(report.dry_run, 1);
    assert_eq!(h.ats.advance_calls(), 0);

    let rows = h.db.executions_for_schedule("sch-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].execution_status, ExecutionStatus::DryRun);
    assert_eq!(rows[0].to_stage_id.as_deref(), Some("stage-2"));
    let schedule = h.db.get_schedule("sch-1").unwrap().unwrap();
    assert_eq!(schedule.last_evaluated_for_advancement_at, Some(t0()));
}

#[tokio::test]
async fn test_advance_retries_then_fails_once() {
    let ats = FakeAts::with_stages(&["stage-1", "stage-2"]);
    ats.advance_failures.store(10, Ordering::SeqCst);
    let h = Harness::new(ats);
    h.rule(None);
    h.schedule("sch-1", "app-1").await;
    h.feedback("sch-1", "app-1", 4.0, t0() - minutes(60));
    h.clock.set(t0());

    let engine = h.engine(EngineSettings::default());
    let report = engine.tick().await.unwrap();
    assert_eq!((report.failed, report.errors), (1, 0));
    assert_eq!(h.ats.advance_calls(), 3);

    let waits = h.sleeper.recorded();
    assert_eq!(waits, vec![Duration::from_secs(2), Duration::from_secs(4)]);
    assert!(waits.windows(2).all(|w| w[0] <= w[1]));

    let rows = h.db.executions_for_schedule("sch-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].execution_status, ExecutionStatus::Failed);
    assert!(rows[0].failure_reason.as_deref().unwrap_or_default().contains("HTTP 503"));
    assert_eq!(h.notifier.titles(), vec!["Auto-advancement failed".to_string()]);

    h.clock.advance(minutes(30));
    assert_eq!(engine.tick().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_transient_advance_failure_recovers() {
    let ats = FakeAts::with_stages(&["stage-1", "stage-2"]);
    ats.advance_failures.store(1, Ordering::SeqCst);
    let h = Harness::new(ats);
    h.rule(Some("stage-final"));
    h.schedule("sch-1", "app-1").await;
    h.feedback("sch-1", "app-1", 3.0, t0() - minutes(45));
    h.clock.set(t0());

    let outcome = {
        let engine = h.engine(EngineSettings::default());
        let schedule = h.db.get_schedule("sch-1").unwrap().unwrap();
        engine.process_schedule(&schedule).await.unwrap()
    };
    assert!(matches!(
        outcome,
        ScheduleOutcome::Advanced { ref target_stage_id, .. } if target_stage_id == "stage-final"
    ));
    assert_eq!(h.sleeper.recorded(), vec![Duration::from_secs(2)]);
    assert!(h.notifier.titles().is_empty());
}

#[tokio::test]
async fn test_debounce_window() {
    let h = Harness::new(FakeAts::with_stages(&["stage-1", "stage-2"]));
    h.rule(None);
    h.schedule("sch-1", "app-1").await;
    h.feedback("sch-1", "app-1", 4.0, t0() - minutes(10));
    h.clock.set(t0());

    let engine = h.engine(EngineSettings::default());
    let report = engine.tick().await.unwrap();
    assert_eq!(report.blocked, 1);
    assert_eq!(h.ats.advance_calls(), 0);

    // Marked evaluated: waiting alone does not re-trigger.
    h.clock.advance(minutes(30));
    assert_eq!(engine.tick().await.unwrap().total, 0);

    // New activity on the application does.
    h.db.touch_schedules_for_application("app-1", h.clock.now()).unwrap();
    let report = engine.tick().await.unwrap();
    assert_eq!(report.advanced, 1);
}

#[tokio::test]
async fn test_no_next_stage_blocks() {
    let h = Harness::new(FakeAts::with_stages(&["stage-1"]));
    h.rule(None);
    h.schedule("sch-1", "app-1").await;
    h.feedback("sch-1", "app-1", 4.0, t0() - minutes(60));
    h.clock.set(t0());

    let engine = h.engine(EngineSettings::default());
    let verdict = engine.evaluate_schedule("sch-1").await.unwrap();
    assert!(!verdict.ready);
    let reason = verdict.blocking_reason.unwrap().to_string();
    assert!(reason.starts_with("target_stage_error"), "{reason}");

    let schedule = h.db.get_schedule("sch-1").unwrap().unwrap();
    let outcome = engine.process_schedule(&schedule).await.unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Blocked { .. }));
    assert!(h.db.executions_for_schedule("sch-1").unwrap().is_empty());
}

#[tokio::test]
async fn test_rejection_branch_notifies_without_audit() {
    let h = Harness::new(FakeAts::with_stages(&["stage-1", "stage-2"]));
    h.rule(None);
    h.schedule("sch-1", "app-1").await;
    h.feedback("sch-1", "app-1", 2.0, t0() - minutes(60));
    h.clock.set(t0());

    let engine = h.engine(EngineSettings::default());
    let report = engine.tick().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(h.ats.advance_calls(), 0);

    let sent = h.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].title.contains("Ada Lovelace"));
    assert!(sent[0].body.contains("app-1"));
    assert!(h.db.executions_for_schedule("sch-1").unwrap().is_empty());
    let schedule = h.db.get_schedule("sch-1").unwrap().unwrap();
    assert!(schedule.last_evaluated_for_advancement_at.is_some());
}

#[tokio::test]
async fn test_manual_rejection() {
    let h = Harness::new(FakeAts::with_stages(&["stage-1", "stage-2"]));
    h.schedule("sch-1", "app-1").await;
    h.clock.set(t0());

    let unconfigured = h.engine(EngineSettings::default());
    let err = unconfigured.execute_rejection("app-1").await.unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");
    assert!(h.ats.archived.lock().unwrap().is_empty());

    let engine = h.engine(EngineSettings {
        default_archive_reason_id: Some("reason-1".into()),
        ..Default::default()
    });
    let outcome = engine.execute_rejection("app-1").await.unwrap();
    assert!(outcome.execution_id.is_some());
    assert_eq!(
        *h.ats.archived.lock().unwrap(),
        vec![("app-1".to_string(), "reason-1".to_string())]
    );

    let rows = h.db.executions_for_schedule("sch-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].execution_status, ExecutionStatus::Rejected);
    assert_eq!(rows[0].executed_by, "recruiter_manual");
    assert!(rows[0].rule_id.is_none());

    // Unknown application: archived, nothing to audit against.
    let outcome = engine.execute_rejection("app-unknown").await.unwrap();
    assert!(outcome.execution_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_slow_schedule_does_not_block_batch() {
    let ats = FakeAts {
        slow_application: Some("app-slow".into()),
        ..FakeAts::with_stages(&["stage-1", "stage-2"])
    };
    let h = Harness::new(ats);
    h.rule(None);
    h.schedule("sch-slow", "app-slow").await;
    h.clock.advance(minutes(1));
    h.schedule("sch-fast", "app-fast").await;
    h.feedback("sch-slow", "app-slow", 4.0, t0() - minutes(60));
    h.feedback("sch-fast", "app-fast", 4.0, t0() - minutes(60));
    h.clock.set(t0());

    let engine = h.engine(EngineSettings { schedule_timeout: Duration::from_secs(5), ..Default::default() });
    let report = engine.tick().await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.advanced, 1);
    assert!(h.db.executions_for_schedule("sch-slow").unwrap().is_empty());
    assert_eq!(h.db.executions_for_schedule("sch-fast").unwrap().len(), 1);

    // The timed-out schedule was never marked, so the next tick retries it.
    let slow = h.db.get_schedule("sch-slow").unwrap().unwrap();
    assert!(slow.last_evaluated_for_advancement_at.is_none());
}

#[tokio::test]
async fn test_try_tick_runs_when_idle() {
    let h = Harness::new(FakeAts::with_stages(&["stage-1", "stage-2"]));
    h.clock.set(t0());
    let engine = h.engine(EngineSettings::default());
    let report = engine.try_tick().await.unwrap();
    assert_eq!(report.map(|r| r.total), Some(0));
}
