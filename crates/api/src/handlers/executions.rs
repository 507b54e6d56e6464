//! Handlers scoped to one workflow execution: enqueueing its jobs, listing
//! them and running a targeted recovery.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use genflow_dispatch::{Dispatched, NodeDispatch};
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Request body for POST /executions/{execution_id}/workflow.
#[derive(Debug, Deserialize)]
pub struct EnqueueWorkflowRequest {
    pub workflow_id: String,
}

/// Request body for POST /executions/{execution_id}/nodes.
#[derive(Debug, Deserialize)]
pub struct EnqueueNodeRequest {
    pub workflow_id: String,
    pub node_id: String,
    pub node_type: String,
    #[serde(default)]
    pub node_data: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// POST /api/v1/executions/{execution_id}/workflow
///
/// Place the root orchestration job. `201` for a fresh run, `200` when a
/// live job already existed.
pub async fn enqueue_workflow(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(input): Json<EnqueueWorkflowRequest>,
) -> AppResult<impl IntoResponse> {
    let dispatched = state
        .dispatcher
        .enqueue_workflow(&execution_id, &input.workflow_id)
        .await?;
    Ok(dispatched_response(dispatched))
}

/// POST /api/v1/executions/{execution_id}/nodes
///
/// Route a node job to the queue for its node type.
pub async fn enqueue_node(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(input): Json<EnqueueNodeRequest>,
) -> AppResult<impl IntoResponse> {
    let dispatched = state
        .dispatcher
        .enqueue_node(NodeDispatch {
            execution_id,
            workflow_id: input.workflow_id,
            node_id: input.node_id,
            node_type: input.node_type,
            node_data: input.node_data,
            depends_on: input.depends_on,
        })
        .await?;
    Ok(dispatched_response(dispatched))
}

fn dispatched_response(dispatched: Dispatched) -> impl IntoResponse {
    let status = if dispatched.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(DataResponse { data: dispatched }))
}

// ---------------------------------------------------------------------------
// Inspection and recovery
// ---------------------------------------------------------------------------

/// GET /api/v1/executions/{execution_id}/jobs
pub async fn list_execution_jobs(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let rows = state.dispatcher.get_execution_jobs(&execution_id).await?;
    Ok(Json(DataResponse { data: rows }))
}

/// POST /api/v1/executions/{execution_id}/recover
///
/// Recover every unfinished job of the execution without waiting for the
/// staleness threshold.
pub async fn recover_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let report = state.sweeper.recover_execution(&execution_id).await?;
    tracing::info!(
        execution_id = %execution_id,
        recovered = report.recovered,
        dead_lettered = report.dead_lettered,
        orphaned = report.orphaned,
        "Execution recovery requested",
    );
    Ok(Json(DataResponse { data: report }))
}
