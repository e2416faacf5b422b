//! API route handlers for the gateway.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};
use stagehand_ats::{WebhookAction, parse_webhook};

use crate::error::ApiError;
use crate::server::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError(e.into()))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "stagehand",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "dry_run": state.engine.settings().dry_run,
    }))
}

/// ATS webhook intake: schedule updates are reconciled, pings acknowledged,
/// everything else acknowledged and dropped.
pub async fn ats_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    match parse_webhook(&body)? {
        WebhookAction::Ping => {
            tracing::info!("webhook ping received");
            Ok(Json(json!({ "status": "ok" })))
        }
        WebhookAction::Ignored(action) => {
            tracing::info!(action = %action, "webhook action ignored");
            Ok(Json(json!({ "status": "ignored", "action": action })))
        }
        WebhookAction::ScheduleUpdate(change) => {
            tracing::info!(schedule_id = %change.schedule_id, "webhook received");
            let outcome = state.reconciler.reconcile(&change).await?;
            Ok(Json(json!({ "status": "processed", "result": to_json(&outcome)? })))
        }
    }
}

/// Diagnostic evaluation; nothing is executed or recorded.
pub async fn evaluate_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> ApiResult {
    let verdict = state.engine.evaluate_schedule(&schedule_id).await?;
    Ok(Json(to_json(&verdict)?))
}

/// Trigger one evaluation tick now, unless one is already running.
pub async fn run_tick(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match state.engine.try_tick().await? {
        Some(report) => Ok((
            StatusCode::OK,
            Json(json!({ "status": "completed", "report": to_json(&report)? })),
        )),
        None => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "status": "skipped", "reason": "evaluation already running" })),
        )),
    }
}

/// Archive an application after a recruiter confirmed the rejection.
pub async fn reject_application(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
) -> ApiResult {
    let outcome = state.engine.execute_rejection(&application_id).await?;
    Ok(Json(to_json(&outcome)?))
}

pub async fn advancement_stats(State(state): State<Arc<AppState>>) -> ApiResult {
    let stats = state.db.statistics(state.clock.now())?;
    Ok(Json(to_json(&stats)?))
}
