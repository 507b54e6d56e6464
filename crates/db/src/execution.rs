//! PostgreSQL [`ExecutionStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::execution::{ExecutionRecord, ExecutionStore, NodeRunStatus};

use crate::repositories::ExecutionRepo;
use crate::{store_err, DbPool};

pub struct PgExecutionStore {
    pool: DbPool,
}

impl PgExecutionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn find_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, CoreError> {
        ExecutionRepo::find_by_id(&self.pool, execution_id)
            .await
            .map_err(store_err)?
            .map(ExecutionRecord::try_from)
            .transpose()
    }

    async fn find_executions(
        &self,
        execution_ids: &[String],
    ) -> Result<HashMap<String, ExecutionRecord>, CoreError> {
        let rows = ExecutionRepo::find_many(&self.pool, execution_ids)
            .await
            .map_err(store_err)?;
        rows.into_iter()
            .map(|row| {
                let record = ExecutionRecord::try_from(row)?;
                Ok((record.id.clone(), record))
            })
            .collect()
    }

    async fn update_node_result(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeRunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let written = ExecutionRepo::upsert_node_result(
            &self.pool,
            execution_id,
            node_id,
            status.as_str(),
            output,
            error,
        )
        .await
        .map_err(store_err)?;
        if written {
            Ok(())
        } else {
            Err(CoreError::NotFound {
                entity: "Execution",
                id: execution_id.to_string(),
            })
        }
    }
}
