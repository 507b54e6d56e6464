//! Per-queue worker pool.
//!
//! A pool ticks every `poll_interval` and claims jobs while it has free
//! permits. Each claimed job runs in its own task next to a heartbeat task
//! that renews the queue lock and refreshes the ledger heartbeat. The
//! handler itself runs in a nested task so a panic surfaces as a
//! [`tokio::task::JoinError`] at the job boundary instead of killing the
//! pool.
//!
//! A run whose ledger row was re-enqueued by recovery while it ran (its
//! `recovery_count` moved past the claim generation) reports nothing back.

use std::sync::Arc;

use genflow_core::error::CoreError;
use genflow_core::ledger::LedgerMutation;
use genflow_core::node::QueueName;
use genflow_core::queue::{retry_backoff, FailOutcome, QueueJob};
use genflow_core::status::JobStatus;
use genflow_dispatch::{JobStatusUpdate, QueueDispatcher};
use genflow_pipeline::JobHandler;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::WorkerConfig;

pub struct QueuePool {
    queue: QueueName,
    handler: Arc<dyn JobHandler>,
    dispatcher: Arc<QueueDispatcher>,
    config: Arc<WorkerConfig>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl QueuePool {
    pub fn new(
        queue: QueueName,
        handler: Arc<dyn JobHandler>,
        dispatcher: Arc<QueueDispatcher>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        let concurrency = config.concurrency_for(queue).max(1);
        Self {
            queue,
            handler,
            dispatcher,
            config,
            permits: Arc::new(Semaphore::new(concurrency)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    /// Jobs currently running in this pool.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Claim loop. Returns once `cancel` fires; in-flight jobs keep running
    /// until [`QueuePool::drain`].
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::info!(
            queue = %self.queue,
            concurrency = self.config.concurrency_for(self.queue),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Queue pool started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(queue = %self.queue, "Queue pool stopped claiming");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.claim_available().await {
                        tracing::error!(queue = %self.queue, error = %e, "Claim cycle failed");
                    }
                }
            }
        }
    }

    /// One claim cycle: claim and start jobs while permits are free.
    ///
    /// Returns the number of jobs started.
    pub async fn claim_available(self: &Arc<Self>) -> Result<usize, CoreError> {
        let mut started = 0;
        loop {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let Some(job) = self
                .dispatcher
                .queue_backend()
                .claim_next(self.queue, &self.config.worker_id, self.config.lock_ttl)
                .await?
            else {
                break;
            };

            tracing::info!(
                job_id = %job.id,
                queue = %self.queue,
                worker_id = %self.config.worker_id,
                attempt = job.attempts_made + 1,
                "Job claimed",
            );
            let generation = self.claim_generation(&job).await;
            let pool = Arc::clone(self);
            self.tracker.spawn(async move {
                pool.run_job(job, generation).await;
                drop(permit);
            });
            started += 1;
        }
        Ok(started)
    }

    /// Wait for in-flight jobs, giving up at `deadline`.
    ///
    /// Returns `true` when every job finished in time.
    pub async fn drain(&self, deadline: tokio::time::Instant) -> bool {
        self.tracker.close();
        match tokio::time::timeout_at(deadline, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    queue = %self.queue,
                    in_flight = self.tracker.len(),
                    "Shutdown timeout reached with jobs still running",
                );
                false
            }
        }
    }

    // ---- job boundary ----

    async fn run_job(&self, job: QueueJob, generation: Option<i32>) {
        let heartbeat_cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.config),
            self.queue,
            job.id.clone(),
            heartbeat_cancel.clone(),
        ));

        let handler = Arc::clone(&self.handler);
        let task_job = job.clone();
        let outcome = tokio::spawn(async move { handler.handle(&task_job).await }).await;

        heartbeat_cancel.cancel();
        let _ = heartbeat.await;

        if self.is_superseded(&job, generation).await {
            tracing::warn!(
                job_id = %job.id,
                queue = %self.queue,
                generation,
                "Job was re-enqueued by recovery while running; outcome dropped",
            );
            return;
        }

        let backend = self.dispatcher.queue_backend();
        match outcome {
            Ok(Ok(result)) => {
                if let Err(e) = backend.complete(self.queue, &job.id, &result).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark queue job completed");
                } else {
                    tracing::info!(job_id = %job.id, queue = %self.queue, "Job completed");
                }
            }
            Ok(Err(e)) => self.report_failure(&job, &e.to_string()).await,
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("Job handler panicked: {}", panic_message(join_error))
                } else {
                    "Job handler was cancelled".to_string()
                };
                tracing::error!(job_id = %job.id, queue = %self.queue, error = %message, "Job aborted");
                self.record_abort(&job, generation, &message).await;
                self.report_failure(&job, &message).await;
            }
        }
    }

    /// Hand a failed attempt to the queue backend's retry mechanism.
    async fn report_failure(&self, job: &QueueJob, error: &str) {
        let delay = retry_backoff(
            job.attempts_made + 1,
            self.config.backoff_base,
            self.config.backoff_max,
        );
        match self
            .dispatcher
            .queue_backend()
            .fail(self.queue, &job.id, error, delay)
            .await
        {
            Ok(FailOutcome::Retrying {
                attempts_made,
                retry_at,
            }) => {
                tracing::warn!(
                    job_id = %job.id,
                    queue = %self.queue,
                    attempts_made,
                    max_attempts = job.max_attempts,
                    %retry_at,
                    error,
                    "Job attempt failed; retry scheduled",
                );
            }
            Ok(FailOutcome::Exhausted { attempts_made }) => {
                tracing::error!(
                    job_id = %job.id,
                    queue = %self.queue,
                    attempts_made,
                    error,
                    "Job failed permanently",
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to report job failure");
            }
        }
    }

    /// The row's `recovery_count` when the job was claimed. A later
    /// mismatch means a recovery re-enqueue replaced this run.
    async fn claim_generation(&self, job: &QueueJob) -> Option<i32> {
        match self.dispatcher.ledger().find(&job.id).await {
            Ok(row) => row.map(|row| row.recovery_count),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to read claim generation");
                None
            }
        }
    }

    async fn is_superseded(&self, job: &QueueJob, generation: Option<i32>) -> bool {
        let Some(generation) = generation else {
            return false;
        };
        match self.dispatcher.ledger().find(&job.id).await {
            Ok(Some(row)) => row.recovery_count != generation,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to re-read job generation");
                false
            }
        }
    }

    /// A panicking handler never wrote its own failure; write it here,
    /// guarded by the claim generation.
    async fn record_abort(&self, job: &QueueJob, generation: Option<i32>, error: &str) {
        let attempts_made = job.attempts_made + 1;
        let recorded = self
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
            .await;
        match recorded {
            Ok(outcome) if outcome.is_applied() && job.is_final_attempt() => {
                let reason = format!("Failed after {attempts_made} attempts: {error}");
                if let Err(e) = self
                    .dispatcher
                    .move_to_dead_letter_queue(&job.id, self.queue, &reason)
                    .await
                {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to dead-letter job");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to record job abort"),
        }
    }
}

async fn heartbeat_loop(
    dispatcher: Arc<QueueDispatcher>,
    config: Arc<WorkerConfig>,
    queue: QueueName,
    job_id: String,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    // The first tick completes immediately; the claim itself is fresh.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = dispatcher
                    .ledger()
                    .apply(&job_id, LedgerMutation::Heartbeat, None)
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "Ledger heartbeat failed");
                }
                match dispatcher
                    .queue_backend()
                    .extend_lock(queue, &job_id, &config.worker_id, config.lock_ttl)
                    .await
                {
                    Ok(true) => tracing::trace!(job_id = %job_id, "Job lock renewed"),
                    Ok(false) => {
                        tracing::warn!(job_id = %job_id, queue = %queue, "Job lock lost to another owner");
                    }
                    Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Lock renewal failed"),
                }
            }
        }
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
