//! Callback API: external parties report callback outcomes here.
//!
//! `GET|POST /api/v1/callbacks?callbackId=..[&fail=..][&command=..]`
//!
//! - non-empty `fail`: the callback failed (any value but `true` is the reason).
//! - otherwise success, with `{"success": true}` when `command` is non-empty
//!   and `{"approved": true}` for approvals.
//!
//! An empty flag (`fail=`) counts as absent.
//!
//! A missing `callbackId`, or a token that is unknown, already resolved or
//! timed out, is a 400.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use durably_core::workflow::CallbackReport;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Query parameters of the callback endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "callbackId")]
    pub callback_id: Option<String>,
    pub fail: Option<String>,
    pub command: Option<String>,
}

impl CallbackQuery {
    /// The report these parameters describe.
    pub fn report(&self) -> CallbackReport {
        match flag(&self.fail) {
            Some(reason) => {
                CallbackReport::Failure(Some(reason).filter(|r| *r != "true").map(str::to_string))
            }
            None if flag(&self.command).is_some() => {
                CallbackReport::Success(json!({ "success": true }))
            }
            None => CallbackReport::Success(json!({ "approved": true })),
        }
    }
}

/// A query flag is set when present and non-empty.
fn flag(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// GET|POST /api/v1/callbacks - Deliver a callback report.
pub async fn deliver_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let token = query
        .callback_id
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("Missing callbackId".to_string()))?;

    let (execution_id, outcome) = state
        .engine
        .deliver(state.workflow.as_ref(), token, query.report())
        .await?;

    Ok(ApiResponse::success(
        json!({ "executionId": execution_id, "outcome": outcome.label() }),
        start,
    )
    .with_link("execution", &format!("/api/v1/executions/{execution_id}")))
}

/// Body for callback reports sent as JSON instead of query parameters.
#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "callbackId")]
    pub callback_id: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// POST /api/v1/callbacks/report - Deliver a report with an explicit payload.
pub async fn deliver_callback_body(
    State(state): State<AppState>,
    Json(body): Json<CallbackBody>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let report = if body.success {
        CallbackReport::Success(body.result.unwrap_or(Value::Null))
    } else {
        CallbackReport::Failure(body.error)
    };

    let (execution_id, outcome) = state
        .engine
        .deliver(state.workflow.as_ref(), &body.callback_id, report)
        .await?;

    Ok(ApiResponse::success(
        json!({ "executionId": execution_id, "outcome": outcome.label() }),
        start,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(fail: Option<&str>, command: Option<&str>) -> CallbackQuery {
        CallbackQuery {
            callback_id: Some("tok".to_string()),
            fail: fail.map(str::to_string),
            command: command.map(str::to_string),
        }
    }

    #[test]
    fn report_follows_query_flags() {
        assert_eq!(
            query(None, None).report(),
            CallbackReport::Success(json!({"approved": true}))
        );
        assert_eq!(
            query(None, Some("true")).report(),
            CallbackReport::Success(json!({"success": true}))
        );
        assert_eq!(query(Some("true"), Some("true")).report(), CallbackReport::Failure(None));
        assert_eq!(
            query(Some("disk full"), None).report(),
            CallbackReport::Failure(Some("disk full".to_string()))
        );
    }

    #[test]
    fn empty_flags_count_as_absent() {
        assert_eq!(
            query(Some(""), None).report(),
            CallbackReport::Success(json!({"approved": true}))
        );
        assert_eq!(
            query(Some(""), Some("true")).report(),
            CallbackReport::Success(json!({"success": true}))
        );
        assert_eq!(
            query(None, Some("")).report(),
            CallbackReport::Success(json!({"approved": true}))
        );
    }
}
