pub mod dlq;
pub mod executions;
pub mod health;
pub mod jobs;
pub mod queues;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /executions/{execution_id}/workflow     POST  enqueue the root job
/// /executions/{execution_id}/nodes        POST  enqueue a node job
/// /executions/{execution_id}/jobs         GET   ledger rows of an execution
/// /executions/{execution_id}/recover      POST  targeted recovery
/// /queues/metrics                         GET   per-queue counts
/// /queues/{queue}/jobs/{job_id}           GET   job status
/// /jobs/stats                             GET   ledger aggregates
/// /jobs/recover-stalled                   POST  run a recovery sweep
/// /dlq                                    GET   dead-lettered jobs
/// /dlq/{job_id}/retry                     POST  retry from the DLQ
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/executions", executions::router())
        .nest("/queues", queues::router())
        .nest("/jobs", jobs::router())
        .nest("/dlq", dlq::router())
}
