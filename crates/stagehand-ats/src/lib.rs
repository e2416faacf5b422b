//! # Stagehand ATS
//!
//! The applicant tracking system as seen by the engine: an RPC-style JSON
//! client (every call is `POST {base_url}/{endpoint}` with basic auth and a
//! `{success, results}` envelope) and the webhook payloads it pushes.

pub mod client;
pub mod webhook;

pub use client::AtsClient;
pub use webhook::{WebhookAction, parse_webhook};
