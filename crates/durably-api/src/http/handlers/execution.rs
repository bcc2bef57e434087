//! Execution handlers for the REST API.
//!
//! Start approval-workflow executions, inspect them with their checkpoint
//! logs, and re-invoke them on demand.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use durably_core::workflow::{ExecutionEvent, RunOutcome};
use durably_types::execution::{Execution, ExecutionId, ExecutionStatus};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Query parameters for listing executions.
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub status: Option<String>,
    /// Maximum number of executions to return (default 20).
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// Body for starting an execution. Both the body and `input` are optional.
#[derive(Debug, Default, Deserialize)]
pub struct StartExecutionRequest {
    #[serde(default)]
    pub input: Option<Value>,
}

fn parse_id(raw: &str) -> Result<ExecutionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid execution id '{raw}'")))
}

async fn load(state: &AppState, id: &ExecutionId) -> Result<Execution, AppError> {
    state
        .engine
        .repository()
        .get_execution(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Execution {id} not found")))
}

fn outcome_json(id: ExecutionId, outcome: &RunOutcome) -> Result<Value, AppError> {
    let mut value = serde_json::to_value(outcome).map_err(|e| AppError::Internal(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.insert("executionId".to_string(), json!(id));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/executions - Start a new approval-workflow execution.
pub async fn start_execution(
    State(state): State<AppState>,
    body: Option<Json<StartExecutionRequest>>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let input = body
        .and_then(|Json(b)| b.input)
        .unwrap_or_else(|| json!({}));

    let (id, outcome) = state.engine.start(state.workflow.as_ref(), input).await?;

    Ok(ApiResponse::success(outcome_json(id, &outcome)?, start)
        .with_status(StatusCode::CREATED)
        .with_link("self", &format!("/api/v1/executions/{id}")))
}

/// GET /api/v1/executions - List executions, newest first.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<ApiResponse<Vec<Execution>>, AppError> {
    let start = Instant::now();
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(AppError::Validation)?;

    let executions = state
        .engine
        .repository()
        .list_executions(status, query.limit)
        .await?;

    Ok(ApiResponse::success(executions, start))
}

/// GET /api/v1/executions/{id} - Get one execution.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Execution>, AppError> {
    let start = Instant::now();
    let id = parse_id(&id)?;
    let execution = load(&state, &id).await?;

    Ok(ApiResponse::success(execution, start)
        .with_link("checkpoints", &format!("/api/v1/executions/{id}/checkpoints")))
}

/// GET /api/v1/executions/{id}/checkpoints - Checkpoint log and open waits.
pub async fn get_checkpoints(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let id = parse_id(&id)?;
    load(&state, &id).await?;

    let repo = state.engine.repository();
    let checkpoints = repo.list_checkpoints(&id).await?;
    let waits = repo.list_pending_waits(&id).await?;

    Ok(ApiResponse::success(
        json!({ "checkpoints": checkpoints, "pendingWaits": waits }),
        start,
    ))
}

/// POST /api/v1/executions/{id}/wake - Re-invoke an execution now.
pub async fn wake_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let id = parse_id(&id)?;

    let outcome = state
        .engine
        .run(state.workflow.as_ref(), &id, Some(ExecutionEvent::Wake))
        .await?;

    Ok(ApiResponse::success(outcome_json(id, &outcome)?, start))
}
