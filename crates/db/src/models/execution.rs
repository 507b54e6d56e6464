//! Workflow execution rows.

use genflow_core::error::CoreError;
use genflow_core::execution::{ExecutionRecord, ExecutionStatus};
use sqlx::FromRow;

/// The columns of `workflow_executions` the job engine reads.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: String,
    pub workflow_id: String,
    pub status: String,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = CoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(ExecutionRecord {
            status: ExecutionStatus::parse(&row.status)?,
            id: row.id,
            workflow_id: row.workflow_id,
        })
    }
}
