use axum::routing::{get, post};
use axum::Router;

use crate::handlers::executions;
use crate::state::AppState;

/// Routes mounted at `/executions`.
///
/// ```text
/// POST /{execution_id}/workflow  -> enqueue_workflow
/// POST /{execution_id}/nodes     -> enqueue_node
/// GET  /{execution_id}/jobs      -> list_execution_jobs
/// POST /{execution_id}/recover   -> recover_execution
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{execution_id}/workflow", post(executions::enqueue_workflow))
        .route("/{execution_id}/nodes", post(executions::enqueue_node))
        .route("/{execution_id}/jobs", get(executions::list_execution_jobs))
        .route("/{execution_id}/recover", post(executions::recover_execution))
}
