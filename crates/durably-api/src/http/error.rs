//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use durably_core::workflow::EngineError;
use durably_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Engine errors (unknown callbacks, missing executions, storage).
    Engine(EngineError),
    /// Validation error.
    Validation(String),
    /// Entity not found.
    NotFound(String),
    /// Generic internal error.
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Engine(EngineError::Repository(e))
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            // Unknown, resolved and timed-out tokens are client errors.
            AppError::Engine(EngineError::UnknownCallback(token)) => (
                StatusCode::BAD_REQUEST,
                "UNKNOWN_CALLBACK",
                format!("Unknown or already resolved callback '{token}'"),
            ),
            AppError::Engine(EngineError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "EXECUTION_NOT_FOUND",
                format!("Execution {id} not found"),
            ),
            AppError::Engine(e @ EngineError::WorkflowMismatch { .. }) => {
                (StatusCode::CONFLICT, "WORKFLOW_MISMATCH", e.to_string())
            }
            AppError::Engine(e) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", e.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
