//! Execution record port.
//!
//! Execution records belong to the workflow engine. The job engine only
//! reads an execution's overall status (to skip work whose outcome no
//! longer matters) and writes per-node outcomes back.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" | "canceled" => Ok(ExecutionStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "Unknown execution status: {other}"
            ))),
        }
    }
}

/// Per-node status written into the execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl NodeRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRunStatus::Pending => "pending",
            NodeRunStatus::Processing => "processing",
            NodeRunStatus::Completed => "completed",
            NodeRunStatus::Failed => "failed",
        }
    }
}

/// The slice of an execution record the job engine reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
}

/// Access to the workflow engine's execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn find_execution(&self, execution_id: &str)
        -> Result<Option<ExecutionRecord>, CoreError>;

    /// Resolve many executions at once. Missing ids are absent from the map.
    async fn find_executions(
        &self,
        execution_ids: &[String],
    ) -> Result<HashMap<String, ExecutionRecord>, CoreError> {
        let mut found = HashMap::with_capacity(execution_ids.len());
        for id in execution_ids {
            if let Some(record) = self.find_execution(id).await? {
                found.insert(id.clone(), record);
            }
        }
        Ok(found)
    }

    async fn update_node_result(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeRunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), CoreError>;
}
