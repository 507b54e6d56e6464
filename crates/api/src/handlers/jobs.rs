use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/jobs/stats
pub async fn get_job_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = state.dispatcher.get_job_stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

/// POST /api/v1/jobs/recover-stalled
///
/// Run one recovery sweep now instead of waiting for the scheduled one.
pub async fn recover_stalled_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = state.sweeper.recover_stalled_jobs().await?;
    tracing::info!(
        scanned = report.scanned,
        recovered = report.recovered,
        dead_lettered = report.dead_lettered,
        "Manual recovery sweep finished",
    );
    Ok(Json(DataResponse { data: report }))
}
