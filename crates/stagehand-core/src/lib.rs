//! # Stagehand Core
//!
//! Shared vocabulary for the advancement engine: domain types, the
//! collaborator traits the engine is written against, the error taxonomy
//! and configuration.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use config::StagehandConfig;
pub use error::{Result, StagehandError};
pub use time::{Clock, Sleeper, SystemClock, TokioSleeper};
pub use traits::{AdvanceSink, ArchiveSink, CandidateDirectory, FeedbackSource, StageMetadataSource};
pub use types::*;
