//! Error → HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stagehand_core::error::StagehandError;

/// Wraps engine errors so handlers can use `?`.
#[derive(Debug)]
pub struct ApiError(pub StagehandError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            StagehandError::NotFound(_) => StatusCode::NOT_FOUND,
            StagehandError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StagehandError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StagehandError> for ApiError {
    fn from(e: StagehandError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), "request failed: {}", self.0);
        } else {
            tracing::warn!(code = self.0.code(), "request rejected: {}", self.0);
        }
        let body = serde_json::json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StagehandError::NotFound("rule".into()), StatusCode::NOT_FOUND),
            (StagehandError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (StagehandError::external("ats", "HTTP 503"), StatusCode::BAD_GATEWAY),
            (StagehandError::Database("locked".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (StagehandError::Configuration("unset".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
