use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::error::CoreError;
use crate::execution::{ExecutionRecord, ExecutionStatus, ExecutionStore, NodeRunStatus};

/// A node outcome written back by a processor.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
    pub status: NodeRunStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// An [`ExecutionStore`] held in a process-local map.
#[derive(Default)]
pub struct MemoryExecutionStore {
    executions: Mutex<HashMap<String, ExecutionRecord>>,
    node_results: Mutex<HashMap<(String, String), NodeResult>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution with the given status.
    pub fn insert(&self, execution_id: &str, workflow_id: &str, status: ExecutionStatus) {
        lock(&self.executions).insert(
            execution_id.to_string(),
            ExecutionRecord {
                id: execution_id.to_string(),
                workflow_id: workflow_id.to_string(),
                status,
            },
        );
    }

    pub fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> bool {
        match lock(&self.executions).get_mut(execution_id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, execution_id: &str) -> bool {
        lock(&self.executions).remove(execution_id).is_some()
    }

    pub fn node_result(&self, execution_id: &str, node_id: &str) -> Option<NodeResult> {
        lock(&self.node_results)
            .get(&(execution_id.to_string(), node_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn find_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, CoreError> {
        Ok(lock(&self.executions).get(execution_id).cloned())
    }

    async fn update_node_result(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeRunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        if !lock(&self.executions).contains_key(execution_id) {
            return Err(CoreError::NotFound {
                entity: "Execution",
                id: execution_id.to_string(),
            });
        }
        lock(&self.node_results).insert(
            (execution_id.to_string(), node_id.to_string()),
            NodeResult {
                status,
                output: output.cloned(),
                error: error.map(str::to_string),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn batch_lookup_omits_missing_executions() {
        let store = MemoryExecutionStore::new();
        store.insert("e1", "w", ExecutionStatus::Running);

        let found = store
            .find_executions(&["e1".to_string(), "gone".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("e1"));
    }

    #[tokio::test]
    async fn node_result_requires_known_execution() {
        let store = MemoryExecutionStore::new();
        let err = store
            .update_node_result("gone", "n", NodeRunStatus::Failed, None, Some("x"))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "Execution", .. });
    }
}
