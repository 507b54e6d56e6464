use axum::routing::{get, post};
use axum::Router;

use crate::handlers::dlq;
use crate::state::AppState;

/// Routes mounted at `/dlq`.
///
/// ```text
/// GET  /                 -> list_dlq_jobs
/// POST /{job_id}/retry   -> retry_dlq_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dlq::list_dlq_jobs))
        .route("/{job_id}/retry", post(dlq::retry_dlq_job))
}
