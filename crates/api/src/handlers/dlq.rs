//! Dead-letter queue inspection and operator retry.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/dlq?limit=&offset=
///
/// Newest first. `limit` defaults to 50 and is capped at 100.
pub async fn list_dlq_jobs(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let rows = state
        .dispatcher
        .get_dlq_jobs(params.limit, params.offset)
        .await?;
    Ok(Json(DataResponse { data: rows }))
}

/// POST /api/v1/dlq/{job_id}/retry
///
/// Reset a dead-lettered job and enqueue a fresh run.
pub async fn retry_dlq_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let dispatched = state.sweeper.retry_from_dlq(&job_id).await?;
    tracing::info!(job_id = %job_id, queue = %dispatched.queue, "Dead-lettered job retried");
    Ok(Json(DataResponse { data: dispatched }))
}
