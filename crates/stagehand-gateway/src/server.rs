//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use stagehand_core::config::GatewayConfig;
use stagehand_core::time::Clock;
use stagehand_engine::{AdvancementEngine, Reconciler};
use stagehand_store::AdvanceDb;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
pub struct AppState {
    pub engine: Arc<AdvancementEngine>,
    pub reconciler: Arc<Reconciler>,
    pub db: Arc<AdvanceDb>,
    pub clock: Arc<dyn Clock>,
    pub start_time: Instant,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/webhooks/ats", post(routes::ats_webhook))
        .route("/advancement/evaluate/{schedule_id}", post(routes::evaluate_schedule))
        .route("/advancement/run", post(routes::run_tick))
        .route("/advancement/reject/{application_id}", post(routes::reject_application))
        .route("/advancement/stats", get(routes::advancement_stats))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve until `shutdown` flips to true; in-flight requests are drained.
pub async fn start(
    state: Arc<AppState>,
    config: &GatewayConfig,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    tracing::info!("🛑 Gateway stopped");
    Ok(())
}
