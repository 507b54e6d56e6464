//! Repository for `workflow_executions` and `execution_node_results`.

use sqlx::PgPool;

use crate::models::execution::ExecutionRow;

/// Provides reads of execution status and writes of node outcomes.
pub struct ExecutionRepo;

impl ExecutionRepo {
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<ExecutionRow>, sqlx::Error> {
        sqlx::query_as::<_, ExecutionRow>(
            "SELECT id, workflow_id, status FROM workflow_executions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_many(pool: &PgPool, ids: &[String]) -> Result<Vec<ExecutionRow>, sqlx::Error> {
        sqlx::query_as::<_, ExecutionRow>(
            "SELECT id, workflow_id, status FROM workflow_executions WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(pool)
        .await
    }

    /// Upsert a node outcome. Returns `false` when the execution is unknown.
    pub async fn upsert_node_result(
        pool: &PgPool,
        execution_id: &str,
        node_id: &str,
        status: &str,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO execution_node_results (execution_id, node_id, status, output, error) \
             SELECT id, $2, $3, $4, $5 FROM workflow_executions WHERE id = $1 \
             ON CONFLICT (execution_id, node_id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 output = EXCLUDED.output, \
                 error = EXCLUDED.error, \
                 updated_at = NOW()",
        )
        .bind(execution_id)
        .bind(node_id)
        .bind(status)
        .bind(output)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
