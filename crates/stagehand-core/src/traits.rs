//! Collaborator seams. The engine only sees these traits; the ATS client
//! implements them in production and tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CandidateSummary, FeedbackRecord, PlanStage, StageInfo};

/// Stage, plan and job metadata lookups.
#[async_trait]
pub trait StageMetadataSource: Send + Sync {
    /// Resolve the interview plan (and job, when the ATS reports it) owning a stage.
    async fn fetch_stage_info(&self, interview_stage_id: &str) -> Result<StageInfo>;

    /// Resolve the job an application belongs to.
    async fn fetch_application_job(&self, application_id: &str) -> Result<Option<String>>;

    /// Stages of a plan. Order of the returned list is not significant.
    async fn list_stages(&self, interview_plan_id: &str) -> Result<Vec<PlanStage>>;
}

/// Moves an application to another stage.
#[async_trait]
pub trait AdvanceSink: Send + Sync {
    async fn advance(&self, application_id: &str, target_stage_id: &str) -> Result<()>;
}

/// Archives an application with a reason.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn archive(&self, application_id: &str, archive_reason_id: &str) -> Result<()>;
}

/// Submitted feedback for an application.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn fetch_application_feedback(&self, application_id: &str) -> Result<Vec<FeedbackRecord>>;
}

/// Candidate and job display details for notifications.
#[async_trait]
pub trait CandidateDirectory: Send + Sync {
    async fn fetch_candidate(&self, candidate_id: &str) -> Result<CandidateSummary>;
    async fn fetch_job_title(&self, job_id: &str) -> Result<String>;
}
