//! ATS API client.
//!
//! Response bodies are read as `serde_json::Value` and picked apart with
//! small parse functions, so payload quirks stay testable without a server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use stagehand_core::config::AtsConfig;
use stagehand_core::error::{Result, StagehandError};
use stagehand_core::traits::{
    AdvanceSink, ArchiveSink, CandidateDirectory, FeedbackSource, StageMetadataSource,
};
use stagehand_core::types::{
    CandidateSummary, FeedbackRecord, PlanStage, StageInfo, submitted_values_from_json,
};

const SERVICE: &str = "ats";
const PAGE_SIZE: u64 = 100;

pub struct AtsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AtsClient {
    pub fn new(config: &AtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StagehandError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, &config.base_url, &config.api_key))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Call one endpoint and return the whole envelope on `success: true`.
    async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        if self.api_key.is_empty() {
            return Err(StagehandError::Configuration("ATS api_key is not set".into()));
        }
        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::debug!(endpoint, "ATS request");

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.api_key, None::<&str>)
            .header("Accept", "application/json; version=1")
            .json(&body)
            .send()
            .await
            .map_err(|e| StagehandError::external(SERVICE, format!("{endpoint} connection failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StagehandError::external(
                SERVICE,
                format!("{endpoint} HTTP {status}: {text}"),
            ));
        }
        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| StagehandError::external(SERVICE, format!("{endpoint} bad response: {e}")))?;
        check_envelope(endpoint, envelope)
    }
}

/// Map a `success: false` envelope to an error.
pub fn check_envelope(endpoint: &str, envelope: Value) -> Result<Value> {
    if envelope["success"].as_bool() == Some(true) {
        return Ok(envelope);
    }
    let detail = match (&envelope["errors"], &envelope["error"]) {
        (Value::Array(errs), _) if !errs.is_empty() => errs
            .iter()
            .map(|e| e.as_str().map(String::from).unwrap_or_else(|| e.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        (_, Value::String(e)) => e.clone(),
        _ => "unknown error".to_string(),
    };
    tracing::error!(endpoint, "ATS request rejected: {detail}");
    Err(StagehandError::external(SERVICE, format!("{endpoint} failed: {detail}")))
}

fn required_str(value: &Value, field: &str, what: &str) -> Result<String> {
    value[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| StagehandError::external(SERVICE, format!("{what} payload missing '{field}'")))
}

pub fn parse_stage_info(results: &Value) -> Result<StageInfo> {
    Ok(StageInfo {
        interview_plan_id: required_str(results, "interviewPlanId", "interview stage")?,
        job_id: results["jobId"].as_str().map(String::from),
    })
}

pub fn parse_application_job(results: &Value) -> Option<String> {
    results["job"]["id"]
        .as_str()
        .or_else(|| results["jobId"].as_str())
        .map(String::from)
}

pub fn parse_stages(results: &Value) -> Result<Vec<PlanStage>> {
    let Some(items) = results.as_array() else {
        return Err(StagehandError::external(SERVICE, "interview stage list is not an array"));
    };
    items
        .iter()
        .map(|s| {
            Ok(PlanStage {
                id: required_str(s, "id", "interview stage")?,
                title: s["title"].as_str().map(String::from),
                order: s["orderInInterviewPlan"].as_i64().ok_or_else(|| {
                    StagehandError::external(SERVICE, "interview stage missing 'orderInInterviewPlan'")
                })?,
            })
        })
        .collect()
}

/// `None` for submissions the engine cannot use at all.
pub fn parse_feedback(item: &Value) -> Option<FeedbackRecord> {
    let submitted_at = item["submittedAt"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
        .with_timezone(&Utc);
    Some(FeedbackRecord {
        feedback_id: item["id"].as_str()?.to_string(),
        application_id: item["applicationId"].as_str()?.to_string(),
        event_id: item["interviewEventId"].as_str().map(String::from),
        interviewer_id: item["submittedByUser"]["id"].as_str().map(String::from),
        interview_id: item["interviewId"].as_str().unwrap_or_default().to_string(),
        submitted_at,
        submitted_values: submitted_values_from_json(&item["submittedValues"]),
    })
}

pub fn parse_candidate(results: &Value) -> Result<CandidateSummary> {
    Ok(CandidateSummary {
        id: required_str(results, "id", "candidate")?,
        name: required_str(results, "name", "candidate")?,
        email: results["primaryEmailAddress"]["value"].as_str().map(String::from),
    })
}

#[async_trait]
impl StageMetadataSource for AtsClient {
    async fn fetch_stage_info(&self, interview_stage_id: &str) -> Result<StageInfo> {
        let envelope = self
            .post("interviewStage.info", json!({ "interviewStageId": interview_stage_id }))
            .await?;
        parse_stage_info(&envelope["results"])
    }

    async fn fetch_application_job(&self, application_id: &str) -> Result<Option<String>> {
        let envelope = self
            .post("application.info", json!({ "applicationId": application_id }))
            .await?;
        Ok(parse_application_job(&envelope["results"]))
    }

    async fn list_stages(&self, interview_plan_id: &str) -> Result<Vec<PlanStage>> {
        let envelope = self
            .post("interviewStage.list", json!({ "interviewPlanId": interview_plan_id }))
            .await?;
        let stages = parse_stages(&envelope["results"])?;
        tracing::debug!(interview_plan_id, count = stages.len(), "interview stages listed");
        Ok(stages)
    }
}

#[async_trait]
impl AdvanceSink for AtsClient {
    async fn advance(&self, application_id: &str, target_stage_id: &str) -> Result<()> {
        self.post(
            "application.changeStage",
            json!({ "applicationId": application_id, "interviewStageId": target_stage_id }),
        )
        .await?;
        tracing::info!(application_id, target_stage_id, "application stage changed");
        Ok(())
    }
}

#[async_trait]
impl ArchiveSink for AtsClient {
    async fn archive(&self, application_id: &str, archive_reason_id: &str) -> Result<()> {
        self.post(
            "application.changeStage",
            json!({ "applicationId": application_id, "archiveReasonId": archive_reason_id }),
        )
        .await?;
        tracing::info!(application_id, archive_reason_id, "application archived");
        Ok(())
    }
}

#[async_trait]
impl FeedbackSource for AtsClient {
    async fn fetch_application_feedback(&self, application_id: &str) -> Result<Vec<FeedbackRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "applicationId": application_id, "limit": PAGE_SIZE });
            if let Some(c) = &cursor {
                body["cursor"] = json!(c);
            }
            let envelope = self.post("applicationFeedback.list", body).await?;
            if let Some(items) = envelope["results"].as_array() {
                records.extend(items.iter().filter_map(parse_feedback));
            }
            match envelope["nextCursor"].as_str() {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next) => {
                    cursor = Some(next.to_string());
                }
                _ => break,
            }
        }
        tracing::debug!(application_id, count = records.len(), "application feedback fetched");
        Ok(records)
    }
}

#[async_trait]
impl CandidateDirectory for AtsClient {
    async fn fetch_candidate(&self, candidate_id: &str) -> Result<CandidateSummary> {
        let envelope = self.post("candidate.info", json!({ "id": candidate_id })).await?;
        parse_candidate(&envelope["results"])
    }

    async fn fetch_job_title(&self, job_id: &str) -> Result<String> {
        let envelope = self.post("job.info", json!({ "id": job_id })).await?;
        required_str(&envelope["results"], "title", "job")
    }
}
