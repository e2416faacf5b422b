//! # Stagehand Gateway
//!
//! Thin HTTP boundary over the engine:
//! ```text
//! GET  /health
//! POST /webhooks/ats                         → Reconciler
//! POST /advancement/evaluate/{schedule_id}   → verdict only, nothing recorded
//! POST /advancement/run                      → one tick (409 while another runs)
//! POST /advancement/reject/{application_id}  → archive + audit
//! GET  /advancement/stats
//! ```

pub mod error;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
