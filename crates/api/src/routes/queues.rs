use axum::routing::get;
use axum::Router;

use crate::handlers::queues;
use crate::state::AppState;

/// Routes mounted at `/queues`.
///
/// ```text
/// GET /metrics                -> get_queue_metrics
/// GET /{queue}/jobs/{job_id}  -> get_job_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(queues::get_queue_metrics))
        .route("/{queue}/jobs/{job_id}", get(queues::get_job_status))
}
