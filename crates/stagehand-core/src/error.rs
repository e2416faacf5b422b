//! Error taxonomy shared by every Stagehand crate.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, StagehandError>;

/// Tagged failures surfaced by the engine.
///
/// Boundary layers (gateway, CLI) translate these with [`StagehandError::code`]
/// instead of inspecting messages.
#[derive(Debug, Error)]
pub enum StagehandError {
    /// Referenced rule, schedule or application is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input (rule definitions, webhook payloads).
    #[error("validation error: {0}")]
    Validation(String),

    /// Any failure from the ATS, chat or other remote collaborators.
    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    /// Persistence failures.
    #[error("database error: {0}")]
    Database(String),

    /// A required operational setting is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl StagehandError {
    /// Shorthand for [`StagehandError::ExternalService`].
    pub fn external(service: &str, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Io(_) | Self::Serialization(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(StagehandError::NotFound("rule".into()).code(), "NOT_FOUND");
        assert_eq!(
            StagehandError::external("ats", "boom").code(),
            "EXTERNAL_SERVICE_ERROR"
        );
        assert_eq!(
            StagehandError::Configuration("x".into()).code(),
            "CONFIGURATION_ERROR"
        );
    }

    #[test]
    fn test_external_display() {
        let err = StagehandError::external("ats", "HTTP 503");
        assert_eq!(err.to_string(), "ats error: HTTP 503");
    }
}
