//! Repository for the `queue_jobs` table.
//!
//! A row is *live* while it is `waiting`, `delayed`, or `active` with an
//! unexpired lock. An `active` row whose lock lapsed is reported as
//! `stalled` and may be restarted by a new enqueue of the same key.

use sqlx::PgPool;

use crate::models::queue_job::{FailedAttempt, QueueJobRecord, StateCount};

/// Column list for `queue_jobs` queries, with the effective state.
const COLUMNS: &str = "\
    queue_name, job_id, job_type, payload, \
    CASE WHEN state = 'active' AND lock_expires_at < NOW() THEN 'stalled' ELSE state END AS state, \
    priority, progress, result, error, attempts_made, max_attempts, worker_id, \
    created_at, lock_expires_at";

/// Predicate (over the existing row) that makes an enqueue a no-op.
const LIVE_PREDICATE: &str = "\
    queue_jobs.state IN ('waiting', 'delayed') \
    OR (queue_jobs.state = 'active' AND queue_jobs.lock_expires_at >= NOW())";

/// Provides queue operations backed by PostgreSQL.
pub struct QueueJobRepo;

impl QueueJobRepo {
    /// Insert the job, or restart a finished/stalled job with the same key.
    ///
    /// Returns `false` when a live job with the key already exists.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        pool: &PgPool,
        queue_name: &str,
        job_id: &str,
        job_type: &str,
        payload: &serde_json::Value,
        priority: i32,
        max_attempts: i32,
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            "INSERT INTO queue_jobs \
                 (queue_name, job_id, job_type, payload, state, priority, max_attempts, run_at) \
             VALUES ($1, $2, $3, $4, 'waiting', $5, $6, NOW()) \
             ON CONFLICT (queue_name, job_id) DO UPDATE SET \
                 job_type = EXCLUDED.job_type, \
                 payload = EXCLUDED.payload, \
                 state = 'waiting', \
                 priority = EXCLUDED.priority, \
                 max_attempts = EXCLUDED.max_attempts, \
                 progress = 0, result = NULL, error = NULL, attempts_made = 0, \
                 worker_id = NULL, lock_expires_at = NULL, run_at = NOW(), \
                 seq = nextval(pg_get_serial_sequence('queue_jobs', 'seq')), \
                 updated_at = NOW() \
             WHERE NOT ({LIVE_PREDICATE}) \
             RETURNING job_id"
        );
        let inserted: Option<(String,)> = sqlx::query_as(&query)
            .bind(queue_name)
            .bind(job_id)
            .bind(job_type)
            .bind(payload)
            .bind(priority)
            .bind(max_attempts)
            .fetch_optional(pool)
            .await?;
        Ok(inserted.is_some())
    }

    pub async fn find(
        pool: &PgPool,
        queue_name: &str,
        job_id: &str,
    ) -> Result<Option<QueueJobRecord>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM queue_jobs WHERE queue_name = $1 AND job_id = $2");
        sqlx::query_as::<_, QueueJobRecord>(&query)
            .bind(queue_name)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Totals per effective state.
    pub async fn counts(pool: &PgPool, queue_name: &str) -> Result<Vec<StateCount>, sqlx::Error> {
        sqlx::query_as::<_, StateCount>(
            "SELECT \
                 CASE WHEN state = 'active' AND lock_expires_at < NOW() THEN 'stalled' \
                      ELSE state END AS state, \
                 COUNT(*) AS count \
             FROM queue_jobs WHERE queue_name = $1 \
             GROUP BY 1",
        )
        .bind(queue_name)
        .fetch_all(pool)
        .await
    }

    /// Atomically claim the next runnable job.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// receive the same job.
    pub async fn claim_next(
        pool: &PgPool,
        queue_name: &str,
        worker_id: &str,
        lock_secs: f64,
    ) -> Result<Option<QueueJobRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE queue_jobs \
             SET state = 'active', worker_id = $2, \
                 lock_expires_at = NOW() + make_interval(secs => $3), \
                 updated_at = NOW() \
             WHERE (queue_name, job_id) = ( \
                 SELECT queue_name, job_id FROM queue_jobs \
                 WHERE queue_name = $1 \
                   AND (state = 'waiting' OR (state = 'delayed' AND run_at <= NOW())) \
                 ORDER BY priority ASC, seq ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueJobRecord>(&query)
            .bind(queue_name)
            .bind(worker_id)
            .bind(lock_secs)
            .fetch_optional(pool)
            .await
    }

    /// Renew the lock held by `worker_id`. Returns `false` if it no longer
    /// owns the job.
    pub async fn extend_lock(
        pool: &PgPool,
        queue_name: &str,
        job_id: &str,
        worker_id: &str,
        lock_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE queue_jobs \
             SET lock_expires_at = NOW() + make_interval(secs => $4), updated_at = NOW() \
             WHERE queue_name = $1 AND job_id = $2 AND worker_id = $3 AND state = 'active'",
        )
        .bind(queue_name)
        .bind(job_id)
        .bind(worker_id)
        .bind(lock_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_progress(
        pool: &PgPool,
        queue_name: &str,
        job_id: &str,
        progress: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE queue_jobs SET progress = $3, updated_at = NOW() \
             WHERE queue_name = $1 AND job_id = $2",
        )
        .bind(queue_name)
        .bind(job_id)
        .bind(progress)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn complete(
        pool: &PgPool,
        queue_name: &str,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let done = sqlx::query(
            "UPDATE queue_jobs \
             SET state = 'completed', result = $3, progress = 100, \
                 lock_expires_at = NULL, updated_at = NOW() \
             WHERE queue_name = $1 AND job_id = $2",
        )
        .bind(queue_name)
        .bind(job_id)
        .bind(result)
        .execute(pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Count a failed attempt; schedule the next one after `delay_secs` or
    /// fail the job once `max_attempts` is reached.
    pub async fn fail(
        pool: &PgPool,
        queue_name: &str,
        job_id: &str,
        error: &str,
        delay_secs: f64,
    ) -> Result<Option<FailedAttempt>, sqlx::Error> {
        sqlx::query_as::<_, FailedAttempt>(
            "UPDATE queue_jobs \
             SET attempts_made = attempts_made + 1, \
                 error = $3, \
                 worker_id = NULL, \
                 lock_expires_at = NULL, \
                 state = CASE WHEN attempts_made + 1 >= max_attempts \
                              THEN 'failed' ELSE 'delayed' END, \
                 run_at = NOW() + make_interval(secs => $4), \
                 updated_at = NOW() \
             WHERE queue_name = $1 AND job_id = $2 \
             RETURNING state, attempts_made, run_at",
        )
        .bind(queue_name)
        .bind(job_id)
        .bind(error)
        .bind(delay_secs)
        .fetch_optional(pool)
        .await
    }
}
