//! Ledger and execution-record writes shared by every processor.

use std::sync::Arc;

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::execution::{ExecutionStore, NodeRunStatus};
use genflow_core::ledger::{LedgerMutation, MutationOutcome, NewLogEntry};
use genflow_core::node::{QueueName, ROOT_NODE_ID};
use genflow_core::prediction::PredictionStatus;
use genflow_core::progress::to_percent;
use genflow_core::queue::{JobEnvelope, QueueBackend, QueueJob};
use genflow_core::status::JobStatus;
use genflow_dispatch::{JobStatusUpdate, QueueDispatcher};
use genflow_predictions::ProgressReporter;

/// Writes a node's progress through the ledger and the execution record.
pub struct NodeLifecycle {
    dispatcher: Arc<QueueDispatcher>,
    executions: Arc<dyn ExecutionStore>,
}

impl NodeLifecycle {
    pub fn new(dispatcher: Arc<QueueDispatcher>, executions: Arc<dyn ExecutionStore>) -> Self {
        Self {
            dispatcher,
            executions,
        }
    }

    pub fn dispatcher(&self) -> &Arc<QueueDispatcher> {
        &self.dispatcher
    }

    /// Mark the ledger row active.
    ///
    /// Returns the row's recovery count, which the processor carries as its
    /// generation, or `None` when the row no longer accepts work
    /// (dead-lettered or already completed).
    pub async fn activate(&self, job: &QueueJob) -> Result<Option<i32>, CoreError> {
        let outcome = self
            .dispatcher
            .update_job_status(&job.id, JobStatus::Active, JobStatusUpdate::default())
            .await?;
        match outcome {
            MutationOutcome::Applied(row) => Ok(Some(row.recovery_count)),
            MutationOutcome::Rejected(row) => {
                tracing::info!(
                    job_id = %job.id,
                    queue = %job.queue,
                    status = %row.status,
                    moved_to_dlq = row.moved_to_dlq,
                    "Ledger row no longer accepts work; skipping job",
                );
                Ok(None)
            }
            MutationOutcome::NotFound => Err(CoreError::JobNotFound(job.id.clone())),
        }
    }

    /// Why the parent execution no longer needs this node, if it doesn't.
    pub async fn orphan_reason(&self, execution_id: &str) -> Result<Option<String>, CoreError> {
        Ok(match self.executions.find_execution(execution_id).await? {
            None => Some("parent execution not found".to_string()),
            Some(execution) if execution.status.is_terminal() => Some(format!(
                "parent execution already {}",
                execution.status.as_str()
            )),
            Some(_) => None,
        })
    }

    /// Close the row as completed without doing any work.
    pub async fn resolve_orphan(&self, job: &QueueJob, reason: &str) -> Result<(), CoreError> {
        self.dispatcher
            .ledger()
            .apply(
                &job.id,
                LedgerMutation::ResolveOrphan,
                Some(NewLogEntry::info(format!(
                    "Skipped before submission: {reason}"
                ))),
            )
            .await?;
        tracing::info!(job_id = %job.id, reason, "Job skipped; parent execution no longer needs it");
        Ok(())
    }

    pub async fn mark_processing(&self, envelope: &JobEnvelope) -> Result<(), CoreError> {
        if envelope.node_id == ROOT_NODE_ID {
            return Ok(());
        }
        self.executions
            .update_node_result(
                &envelope.execution_id,
                &envelope.node_id,
                NodeRunStatus::Processing,
                None,
                None,
            )
            .await
    }

    /// Record success in the ledger and, once the ledger accepted it, in
    /// the execution record.
    ///
    /// A run superseded by a recovery re-enqueue writes nothing.
    pub async fn complete(
        &self,
        job: &QueueJob,
        envelope: &JobEnvelope,
        generation: i32,
        output: &serde_json::Value,
    ) -> Result<(), CoreError> {
        let outcome = self
            .dispatcher
            .update_job_status(
                &job.id,
                JobStatus::Completed,
                JobStatusUpdate {
                    result: Some(output.clone()),
                    generation: Some(generation),
                    ..JobStatusUpdate::default()
                },
            )
            .await?;
        if !outcome.is_applied() {
            tracing::warn!(
                job_id = %job.id,
                generation,
                "Completion not recorded; job was superseded or closed meanwhile",
            );
            return Ok(());
        }

        if envelope.node_id != ROOT_NODE_ID {
            self.executions
                .update_node_result(
                    &envelope.execution_id,
                    &envelope.node_id,
                    NodeRunStatus::Completed,
                    Some(output),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    /// Record a failed attempt. Never fails itself: the caller is already on
    /// an error path and the queue retry must still happen.
    ///
    /// The execution record and the dead-letter queue are only touched when
    /// the ledger accepted the failure for this run.
    pub async fn fail(
        &self,
        job: &QueueJob,
        envelope: Option<&JobEnvelope>,
        generation: Option<i32>,
        error: &str,
    ) {
        let attempts_made = job.attempts_made + 1;
        let recorded = match self
            .dispatcher
            .update_job_status(
                &job.id,
                JobStatus::Failed,
                JobStatusUpdate {
                    error: Some(error.to_string()),
                    attempts_made: Some(attempts_made),
                    generation,
                    ..JobStatusUpdate::default()
                },
            )
            .await
        {
            Ok(outcome) => outcome.is_applied(),
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job failure");
                false
            }
        };
        if !recorded {
            return;
        }

        if let Some(envelope) = envelope.filter(|e| e.node_id != ROOT_NODE_ID) {
            if let Err(e) = self
                .executions
                .update_node_result(
                    &envelope.execution_id,
                    &envelope.node_id,
                    NodeRunStatus::Failed,
                    None,
                    Some(error),
                )
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to write node failure");
            }
        }

        if job.is_final_attempt() {
            let reason = format!("Failed after {attempts_made} attempts: {error}");
            if let Err(e) = self
                .dispatcher
                .move_to_dead_letter_queue(&job.id, job.queue, &reason)
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to dead-letter job");
            }
        }
    }

    /// Append a line to the job's ledger log, logging instead of failing.
    pub async fn note(&self, job: &QueueJob, entry: NewLogEntry) {
        if let Err(e) = self
            .dispatcher
            .add_job_log(&job.id, entry.message, entry.level)
            .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to append job log");
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Forwards poller progress to the queue backend.
pub struct QueueProgress {
    queue: Arc<dyn QueueBackend>,
    queue_name: QueueName,
    job_id: String,
}

impl QueueProgress {
    pub fn new(queue: Arc<dyn QueueBackend>, queue_name: QueueName, job_id: &str) -> Self {
        Self {
            queue,
            queue_name,
            job_id: job_id.to_string(),
        }
    }

    pub async fn set(&self, progress: f64) {
        if let Err(e) = self
            .queue
            .update_progress(self.queue_name, &self.job_id, to_percent(progress))
            .await
        {
            tracing::debug!(job_id = %self.job_id, error = %e, "Progress update dropped");
        }
    }
}

#[async_trait]
impl ProgressReporter for QueueProgress {
    async fn report(&self, progress: f64, _status: PredictionStatus) {
        self.set(progress).await;
    }
}
