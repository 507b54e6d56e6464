//! PostgreSQL [`QueueBackend`].

use std::time::Duration;

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::node::QueueName;
use genflow_core::queue::{
    EnqueueOptions, EnqueueOutcome, FailOutcome, QueueBackend, QueueCounts, QueueJob,
};

use crate::repositories::QueueJobRepo;
use crate::{queue_err, DbPool};

pub struct PgQueueBackend {
    pool: DbPool,
}

impl PgQueueBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn not_found(job_id: &str) -> CoreError {
    CoreError::JobNotFound(job_id.to_string())
}

#[async_trait]
impl QueueBackend for PgQueueBackend {
    async fn enqueue(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: &serde_json::Value,
        options: &EnqueueOptions,
    ) -> Result<EnqueueOutcome, CoreError> {
        let started = QueueJobRepo::enqueue(
            &self.pool,
            queue.as_str(),
            &options.job_key,
            job_type,
            payload,
            options.priority.value(),
            options.max_attempts,
        )
        .await
        .map_err(queue_err)?;

        Ok(EnqueueOutcome {
            job_id: options.job_key.clone(),
            deduplicated: !started,
        })
    }

    async fn get_job(&self, queue: QueueName, job_id: &str) -> Result<Option<QueueJob>, CoreError> {
        QueueJobRepo::find(&self.pool, queue.as_str(), job_id)
            .await
            .map_err(queue_err)?
            .map(QueueJob::try_from)
            .transpose()
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, CoreError> {
        let rows = QueueJobRepo::counts(&self.pool, queue.as_str())
            .await
            .map_err(queue_err)?;

        let mut counts = QueueCounts::default();
        for row in rows {
            match row.state.as_str() {
                "waiting" => counts.waiting += row.count,
                "active" | "stalled" => counts.active += row.count,
                "delayed" => counts.delayed += row.count,
                "completed" => counts.completed += row.count,
                "failed" => counts.failed += row.count,
                other => tracing::warn!(queue = %queue, state = other, "Unknown queue state"),
            }
        }
        Ok(counts)
    }

    async fn claim_next(
        &self,
        queue: QueueName,
        worker_id: &str,
        lock_for: Duration,
    ) -> Result<Option<QueueJob>, CoreError> {
        QueueJobRepo::claim_next(&self.pool, queue.as_str(), worker_id, lock_for.as_secs_f64())
            .await
            .map_err(queue_err)?
            .map(QueueJob::try_from)
            .transpose()
    }

    async fn extend_lock(
        &self,
        queue: QueueName,
        job_id: &str,
        worker_id: &str,
        lock_for: Duration,
    ) -> Result<bool, CoreError> {
        QueueJobRepo::extend_lock(
            &self.pool,
            queue.as_str(),
            job_id,
            worker_id,
            lock_for.as_secs_f64(),
        )
        .await
        .map_err(queue_err)
    }

    async fn update_progress(
        &self,
        queue: QueueName,
        job_id: &str,
        progress: u8,
    ) -> Result<(), CoreError> {
        let updated =
            QueueJobRepo::update_progress(&self.pool, queue.as_str(), job_id, progress.min(100) as i16)
                .await
                .map_err(queue_err)?;
        if updated {
            Ok(())
        } else {
            Err(not_found(job_id))
        }
    }

    async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<(), CoreError> {
        let updated = QueueJobRepo::complete(&self.pool, queue.as_str(), job_id, result)
            .await
            .map_err(queue_err)?;
        if updated {
            Ok(())
        } else {
            Err(not_found(job_id))
        }
    }

    async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        error: &str,
        retry_delay: Duration,
    ) -> Result<FailOutcome, CoreError> {
        let attempt = QueueJobRepo::fail(
            &self.pool,
            queue.as_str(),
            job_id,
            error,
            retry_delay.as_secs_f64(),
        )
        .await
        .map_err(queue_err)?
        .ok_or_else(|| not_found(job_id))?;

        if attempt.state == "failed" {
            Ok(FailOutcome::Exhausted {
                attempts_made: attempt.attempts_made,
            })
        } else {
            Ok(FailOutcome::Retrying {
                attempts_made: attempt.attempts_made,
                retry_at: attempt.run_at,
            })
        }
    }
}
