//! Queue dispatcher.
//!
//! Every enqueue goes to the queue backend first (which deduplicates by
//! job key) and is then mirrored into the job ledger: a fresh run resets
//! the ledger row to `pending`, a deduplicated enqueue only refreshes it.
//! A node whose row is already completed or failed is never run again by
//! an enqueue; recovery and DLQ retry go through [`QueueDispatcher::requeue`].
//! The job key is derived from `(execution_id, node_id)`, so one ledger row
//! and at most one live queue job exist per node.

use std::sync::Arc;

use genflow_core::error::CoreError;
use genflow_core::ledger::{
    JobLedger, JobPayload, LedgerMutation, LedgerRow, LedgerStats, LogLevel, MutationOutcome,
    NewLedgerRow, NewLogEntry,
};
use genflow_core::node::{
    node_job_key, route_node_type, workflow_job_key, JobPriority, QueueName, ROOT_NODE_ID,
    WORKFLOW_JOB_TYPE,
};
use genflow_core::queue::{EnqueueOptions, JobEnvelope, QueueBackend, QueueCounts};
use genflow_core::status::JobStatus;
use genflow_core::types::JobId;
use serde::Serialize;

use crate::config::DispatchConfig;

/// Default page size for dead-letter listings.
pub const DEFAULT_DLQ_LIMIT: i64 = 50;

/// Maximum page size for dead-letter listings.
pub const MAX_DLQ_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input for [`QueueDispatcher::enqueue_node`].
#[derive(Debug, Clone)]
pub struct NodeDispatch {
    pub execution_id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub node_type: String,
    pub node_data: serde_json::Value,
    pub depends_on: Vec<String>,
}

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatched {
    pub job_id: JobId,
    pub queue: QueueName,
    pub priority: JobPriority,
    /// `true` when a live or settled job with the same key already existed.
    pub deduplicated: bool,
}

/// Optional fields merged by [`QueueDispatcher::update_job_status`].
#[derive(Debug, Clone, Default)]
pub struct JobStatusUpdate {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts_made: Option<i32>,
    /// The `recovery_count` observed when the writer claimed the job.
    pub generation: Option<i32>,
}

/// Where a [`JobStatusView`] was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    Queue,
    Ledger,
}

/// Unified job status, live from the queue backend when possible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub queue: QueueName,
    pub state: String,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub source: StatusSource,
}

/// Job counts of one queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub queue: QueueName,
    #[serde(flatten)]
    pub counts: QueueCounts,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct QueueDispatcher {
    ledger: Arc<dyn JobLedger>,
    queue: Arc<dyn QueueBackend>,
    config: DispatchConfig,
}

impl QueueDispatcher {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        queue: Arc<dyn QueueBackend>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            ledger,
            queue,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn JobLedger> {
        &self.ledger
    }

    pub fn queue_backend(&self) -> &Arc<dyn QueueBackend> {
        &self.queue
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Place the root orchestration job of an execution.
    ///
    /// Enqueuing the same execution twice yields the same logical job.
    pub async fn enqueue_workflow(
        &self,
        execution_id: &str,
        workflow_id: &str,
    ) -> Result<Dispatched, CoreError> {
        require_non_empty("execution_id", execution_id)?;
        require_non_empty("workflow_id", workflow_id)?;

        let queue = QueueName::WorkflowOrchestrator;
        self.ensure_enabled(queue, WORKFLOW_JOB_TYPE)?;
        if let Some(existing) = self.settled_dispatch(execution_id, ROOT_NODE_ID).await? {
            return Ok(existing);
        }

        let row = NewLedgerRow {
            job_id: workflow_job_key(execution_id),
            queue_name: queue,
            execution_id: execution_id.to_string(),
            node_id: ROOT_NODE_ID.to_string(),
            payload: JobPayload {
                workflow_id: workflow_id.to_string(),
                node_type: WORKFLOW_JOB_TYPE.to_string(),
                node_data: serde_json::Value::Null,
                depends_on: Vec::new(),
            },
            priority: JobPriority::High,
        };
        self.dispatch(row, "Workflow job queued").await
    }

    /// Place one node job on the queue its type routes to.
    pub async fn enqueue_node(&self, node: NodeDispatch) -> Result<Dispatched, CoreError> {
        require_non_empty("execution_id", &node.execution_id)?;
        require_non_empty("workflow_id", &node.workflow_id)?;
        require_non_empty("node_id", &node.node_id)?;

        let route = route_node_type(&node.node_type)?;
        self.ensure_enabled(route.queue, &node.node_type)?;
        if let Some(existing) = self
            .settled_dispatch(&node.execution_id, &node.node_id)
            .await?
        {
            return Ok(existing);
        }

        let row = NewLedgerRow {
            job_id: node_job_key(&node.execution_id, &node.node_id),
            queue_name: route.queue,
            execution_id: node.execution_id,
            node_id: node.node_id,
            payload: JobPayload {
                workflow_id: node.workflow_id,
                node_type: node.node_type,
                node_data: node.node_data,
                depends_on: node.depends_on,
            },
            priority: route.priority,
        };
        self.dispatch(row, "Node job queued").await
    }

    /// Re-enqueue an existing ledger row under its original key and payload.
    pub async fn requeue(&self, row: &LedgerRow, reason: &str) -> Result<Dispatched, CoreError> {
        let new_row = NewLedgerRow {
            job_id: row.job_id.clone(),
            queue_name: row.queue_name,
            execution_id: row.execution_id.clone(),
            node_id: row.node_id.clone(),
            payload: row.payload.clone(),
            priority: row.priority,
        };
        self.dispatch(new_row, reason).await
    }

    async fn dispatch(&self, row: NewLedgerRow, reason: &str) -> Result<Dispatched, CoreError> {
        let envelope = JobEnvelope {
            execution_id: row.execution_id.clone(),
            node_id: row.node_id.clone(),
            payload: row.payload.clone(),
        };
        let options = EnqueueOptions {
            job_key: row.job_id.clone(),
            priority: row.priority,
            max_attempts: self.config.max_attempts,
        };

        let outcome = self
            .queue
            .enqueue(
                row.queue_name,
                &row.payload.node_type,
                &serde_json::to_value(&envelope)?,
                &options,
            )
            .await?;

        let queue = row.queue_name;
        let priority = row.priority;
        let log = if outcome.deduplicated {
            NewLogEntry::info(format!(
                "{reason}: job already live on {queue}, enqueue deduplicated"
            ))
        } else {
            NewLogEntry::info(format!(
                "{reason} on {queue} (priority {})",
                priority.value()
            ))
        };
        let ledger_row = self
            .ledger
            .upsert_dispatched(row, !outcome.deduplicated, Some(log))
            .await?;

        tracing::info!(
            job_id = %outcome.job_id,
            queue = %queue,
            execution_id = %ledger_row.execution_id,
            node_id = %ledger_row.node_id,
            deduplicated = outcome.deduplicated,
            "{reason}",
        );

        Ok(Dispatched {
            job_id: outcome.job_id,
            queue,
            priority,
            deduplicated: outcome.deduplicated,
        })
    }

    /// Merge a status transition into the ledger row.
    ///
    /// Returns the guarded outcome; a `Rejected` outcome means the row is
    /// dead-lettered, already completed, or was superseded by a recovery.
    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: JobStatusUpdate,
    ) -> Result<MutationOutcome, CoreError> {
        let message = match &update.error {
            Some(error) => format!("Status changed to {status}: {error}"),
            None => format!("Status changed to {status}"),
        };
        let log = if status == JobStatus::Failed {
            NewLogEntry::error(message)
        } else {
            NewLogEntry::info(message)
        };

        let mutation = LedgerMutation::Transition {
            status,
            result: update.result,
            error: update.error,
            attempts_made: update.attempts_made,
            generation: update.generation,
        };
        let outcome = self.ledger.apply(job_id, mutation, Some(log)).await?;
        match &outcome {
            MutationOutcome::NotFound => return Err(CoreError::JobNotFound(job_id.to_string())),
            MutationOutcome::Rejected(row) => {
                tracing::warn!(
                    job_id,
                    target = %status,
                    current = %row.status,
                    moved_to_dlq = row.moved_to_dlq,
                    "Status transition rejected",
                );
            }
            MutationOutcome::Applied(_) => {
                tracing::debug!(job_id, status = %status, "Job status updated");
            }
        }
        Ok(outcome)
    }

    /// Append one entry to a job's log.
    pub async fn add_job_log(
        &self,
        job_id: &str,
        message: impl Into<String>,
        level: LogLevel,
    ) -> Result<(), CoreError> {
        let log = NewLogEntry {
            message: message.into(),
            level,
        };
        match self
            .ledger
            .apply(job_id, LedgerMutation::AppendLog, Some(log))
            .await?
        {
            MutationOutcome::NotFound => Err(CoreError::JobNotFound(job_id.to_string())),
            _ => Ok(()),
        }
    }

    /// Permanently fail a job.
    pub async fn move_to_dead_letter_queue(
        &self,
        job_id: &str,
        queue: QueueName,
        reason: &str,
    ) -> Result<MutationOutcome, CoreError> {
        let log = NewLogEntry::error(format!(
            "Moved to dead-letter queue from {queue}: {reason}"
        ));
        let outcome = self
            .ledger
            .apply(
                job_id,
                LedgerMutation::DeadLetter {
                    reason: reason.to_string(),
                },
                Some(log),
            )
            .await?;
        match &outcome {
            MutationOutcome::NotFound => return Err(CoreError::JobNotFound(job_id.to_string())),
            MutationOutcome::Applied(_) => {
                tracing::warn!(job_id, queue = %queue, reason, "Job moved to dead-letter queue");
            }
            MutationOutcome::Rejected(row) => {
                tracing::debug!(
                    job_id,
                    status = %row.status,
                    moved_to_dlq = row.moved_to_dlq,
                    "Dead-letter skipped",
                );
            }
        }
        Ok(outcome)
    }

    /// Status of a job, preferring the live queue backend over the ledger.
    pub async fn get_job_status(
        &self,
        queue: QueueName,
        job_id: &str,
    ) -> Result<JobStatusView, CoreError> {
        if !self.config.is_enabled(queue) {
            return Err(CoreError::QueueNotFound(queue.to_string()));
        }

        if let Some(job) = self.queue.get_job(queue, job_id).await? {
            return Ok(JobStatusView {
                job_id: job.id,
                queue,
                state: job.state.as_str().to_string(),
                progress: job.progress,
                result: job.result,
                error: job.error,
                source: StatusSource::Queue,
            });
        }

        let row = self
            .ledger
            .find(job_id)
            .await?
            .filter(|row| row.queue_name == queue)
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        Ok(JobStatusView {
            job_id: row.job_id,
            queue,
            state: row.status.as_str().to_string(),
            progress: if row.status == JobStatus::Completed { 100 } else { 0 },
            result: row.result,
            error: row.error,
            source: StatusSource::Ledger,
        })
    }

    /// Whether the queue backend still holds the job as waiting, active or
    /// delayed.
    pub async fn is_job_active_in_queue(
        &self,
        queue: QueueName,
        job_id: &str,
    ) -> Result<bool, CoreError> {
        Ok(self
            .queue
            .get_job(queue, job_id)
            .await?
            .is_some_and(|job| job.state.is_live()))
    }

    /// Counts for every enabled queue.
    pub async fn get_queue_metrics(&self) -> Result<Vec<QueueMetrics>, CoreError> {
        let mut metrics = Vec::with_capacity(self.config.enabled_queues.len());
        for &queue in &self.config.enabled_queues {
            let counts = self.queue.counts(queue).await?;
            metrics.push(QueueMetrics { queue, counts });
        }
        Ok(metrics)
    }

    pub async fn get_execution_jobs(&self, execution_id: &str) -> Result<Vec<LedgerRow>, CoreError> {
        self.ledger.list_for_execution(execution_id).await
    }

    pub async fn get_job_stats(&self) -> Result<LedgerStats, CoreError> {
        self.ledger.stats().await
    }

    /// Dead-lettered jobs, newest first. `limit` defaults to 50, capped at 100.
    pub async fn get_dlq_jobs(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<LedgerRow>, CoreError> {
        let limit = limit.unwrap_or(DEFAULT_DLQ_LIMIT).clamp(1, MAX_DLQ_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        self.ledger.list_dead_lettered(limit, offset).await
    }

    // ---- private helpers ----

    fn ensure_enabled(&self, queue: QueueName, node_type: &str) -> Result<(), CoreError> {
        if self.config.is_enabled(queue) {
            Ok(())
        } else {
            Err(CoreError::NoQueueForType(node_type.to_string()))
        }
    }

    /// Resolve an enqueue against a node whose row already settled.
    ///
    /// A completed or failed row is terminal: the enqueue is deduplicated
    /// against it and neither the queue nor the ledger changes. Only an
    /// explicit DLQ retry may bring a dead-lettered node back.
    async fn settled_dispatch(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<Dispatched>, CoreError> {
        let Some(row) = self.ledger.find_by_node(execution_id, node_id).await? else {
            return Ok(None);
        };
        if row.moved_to_dlq {
            return Err(CoreError::Conflict(format!(
                "Job {} is in the dead-letter queue; retry it from the DLQ",
                row.job_id
            )));
        }
        if !row.status.is_terminal() {
            return Ok(None);
        }

        tracing::info!(
            job_id = %row.job_id,
            queue = %row.queue_name,
            status = %row.status,
            "Enqueue deduplicated against settled job",
        );
        Ok(Some(Dispatched {
            job_id: row.job_id,
            queue: row.queue_name,
            priority: row.priority,
            deduplicated: true,
        }))
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        Err(CoreError::Validation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}
