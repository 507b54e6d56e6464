use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use genflow_core::node::QueueName;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/queues/metrics
pub async fn get_queue_metrics(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let metrics = state.dispatcher.get_queue_metrics().await?;
    Ok(Json(DataResponse { data: metrics }))
}

/// GET /api/v1/queues/{queue}/jobs/{job_id}
///
/// Live queue state when the backend still holds the job, otherwise the
/// ledger's record.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path((queue, job_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let queue: QueueName = queue.parse()?;
    let status = state.dispatcher.get_job_status(queue, &job_id).await?;
    Ok(Json(DataResponse { data: status }))
}
