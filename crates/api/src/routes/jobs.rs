use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET  /stats            -> get_job_stats
/// POST /recover-stalled  -> recover_stalled_jobs
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(jobs::get_job_stats))
        .route("/recover-stalled", post(jobs::recover_stalled_jobs))
}
