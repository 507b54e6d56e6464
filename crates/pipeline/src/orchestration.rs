//! Processor for the workflow-orchestrator queue.
//!
//! Orchestration nodes (`start`, `end`, `merge`, `condition`, `delay`) and
//! root workflow jobs involve no provider call. The processor records the
//! node as completed with its node data as output; scheduling downstream
//! nodes stays with the workflow engine, which enqueues them through the
//! dispatcher.

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::queue::QueueJob;

use crate::handler::{HandlerDeps, JobHandler};
use crate::lifecycle::NodeLifecycle;

pub struct OrchestrationProcessor {
    lifecycle: NodeLifecycle,
}

impl OrchestrationProcessor {
    pub fn new(deps: &HandlerDeps) -> Self {
        Self {
            lifecycle: NodeLifecycle::new(deps.dispatcher.clone(), deps.executions.clone()),
        }
    }
}

#[async_trait]
impl JobHandler for OrchestrationProcessor {
    async fn handle(&self, job: &QueueJob) -> Result<serde_json::Value, CoreError> {
        let envelope = job.envelope()?;
        let Some(generation) = self.lifecycle.activate(job).await? else {
            return Ok(serde_json::Value::Null);
        };

        let result = async {
            if let Some(reason) = self.lifecycle.orphan_reason(&envelope.execution_id).await? {
                self.lifecycle.resolve_orphan(job, &reason).await?;
                return Ok(serde_json::json!({ "skipped": true, "reason": reason }));
            }
            self.lifecycle.mark_processing(&envelope).await?;

            let output = serde_json::json!({
                "nodeType": envelope.payload.node_type,
                "data": envelope.payload.node_data,
            });
            self.lifecycle
                .complete(job, &envelope, generation, &output)
                .await?;
            tracing::debug!(
                job_id = %job.id,
                execution_id = %envelope.execution_id,
                node_id = %envelope.node_id,
                "Orchestration node completed",
            );
            Ok::<_, CoreError>(output)
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(job_id = %job.id, error = %e, "Orchestration job failed");
            self.lifecycle
                .fail(job, Some(&envelope), Some(generation), &e.to_string())
                .await;
        }
        result
    }
}
