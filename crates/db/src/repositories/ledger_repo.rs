//! Repository for the `job_ledger` and `job_ledger_logs` tables.
//!
//! Status ids come from [`JobStatus`]; no numeric literal appears in the
//! queries below.

use genflow_core::ledger::{LedgerRow, NewLogEntry};
use genflow_core::status::JobStatus;
use genflow_core::types::Timestamp;
use sqlx::{PgConnection, PgPool};

use crate::models::ledger::{LedgerLogRecord, LedgerRecord, LedgerStatsRecord};

/// Column list for `job_ledger` queries.
const COLUMNS: &str = "\
    job_id, queue_name, execution_id, node_id, payload, priority, status_id, \
    moved_to_dlq, recovery_count, last_heartbeat, created_at, updated_at, \
    processed_at, finished_at, result, error, failed_reason, attempts_made";

/// Maximum page size for ledger listings.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for ledger listings.
pub const DEFAULT_LIMIT: i64 = 50;

/// Provides queries over the job ledger.
pub struct LedgerRepo;

impl LedgerRepo {
    pub async fn find_by_id(pool: &PgPool, job_id: &str) -> Result<Option<LedgerRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_ledger WHERE job_id = $1");
        sqlx::query_as::<_, LedgerRecord>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_node(
        pool: &PgPool,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<LedgerRecord>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM job_ledger WHERE execution_id = $1 AND node_id = $2");
        sqlx::query_as::<_, LedgerRecord>(&query)
            .bind(execution_id)
            .bind(node_id)
            .fetch_optional(pool)
            .await
    }

    /// Load and row-lock a ledger row inside a transaction.
    pub async fn lock_by_id(
        conn: &mut PgConnection,
        job_id: &str,
    ) -> Result<Option<LedgerRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_ledger WHERE job_id = $1 FOR UPDATE");
        sqlx::query_as::<_, LedgerRecord>(&query)
            .bind(job_id)
            .fetch_optional(conn)
            .await
    }

    /// Load and row-lock the row for `(execution_id, node_id)`.
    pub async fn lock_by_node(
        conn: &mut PgConnection,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<LedgerRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_ledger \
             WHERE execution_id = $1 AND node_id = $2 FOR UPDATE"
        );
        sqlx::query_as::<_, LedgerRecord>(&query)
            .bind(execution_id)
            .bind(node_id)
            .fetch_optional(conn)
            .await
    }

    /// Write every column of `row`, inserting it if the `(execution_id,
    /// node_id)` pair is new.
    pub async fn save(conn: &mut PgConnection, row: &LedgerRow) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_value(&row.payload)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            "INSERT INTO job_ledger ( \
                 job_id, queue_name, execution_id, node_id, payload, priority, status_id, \
                 moved_to_dlq, recovery_count, last_heartbeat, created_at, updated_at, \
                 processed_at, finished_at, result, error, failed_reason, attempts_made) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (execution_id, node_id) DO UPDATE SET \
                 job_id = EXCLUDED.job_id, \
                 queue_name = EXCLUDED.queue_name, \
                 payload = EXCLUDED.payload, \
                 priority = EXCLUDED.priority, \
                 status_id = EXCLUDED.status_id, \
                 moved_to_dlq = EXCLUDED.moved_to_dlq, \
                 recovery_count = EXCLUDED.recovery_count, \
                 last_heartbeat = EXCLUDED.last_heartbeat, \
                 updated_at = EXCLUDED.updated_at, \
                 processed_at = EXCLUDED.processed_at, \
                 finished_at = EXCLUDED.finished_at, \
                 result = EXCLUDED.result, \
                 error = EXCLUDED.error, \
                 failed_reason = EXCLUDED.failed_reason, \
                 attempts_made = EXCLUDED.attempts_made",
        )
        .bind(&row.job_id)
        .bind(row.queue_name.as_str())
        .bind(&row.execution_id)
        .bind(&row.node_id)
        .bind(payload)
        .bind(row.priority.value())
        .bind(row.status.id())
        .bind(row.moved_to_dlq)
        .bind(row.recovery_count)
        .bind(row.last_heartbeat)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.processed_at)
        .bind(row.finished_at)
        .bind(&row.result)
        .bind(&row.error)
        .bind(&row.failed_reason)
        .bind(row.attempts_made)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_log(
        conn: &mut PgConnection,
        job_id: &str,
        log: &NewLogEntry,
        at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_ledger_logs (job_id, level, message, logged_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(job_id)
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Log lines for the given rows, oldest first within each row.
    pub async fn logs_for(
        pool: &PgPool,
        job_ids: &[String],
    ) -> Result<Vec<LedgerLogRecord>, sqlx::Error> {
        sqlx::query_as::<_, LedgerLogRecord>(
            "SELECT job_id, level, message, logged_at FROM job_ledger_logs \
             WHERE job_id = ANY($1) ORDER BY job_id, id",
        )
        .bind(job_ids)
        .fetch_all(pool)
        .await
    }

    /// Pending/active/recovered rows, not dead-lettered, with no update and no
    /// heartbeat since `cutoff`. Oldest first.
    pub async fn find_stalled(
        pool: &PgPool,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<LedgerRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_ledger \
             WHERE status_id IN ($1, $2, $3) \
               AND NOT moved_to_dlq \
               AND updated_at < $4 \
               AND (last_heartbeat IS NULL OR last_heartbeat < $4) \
             ORDER BY updated_at ASC \
             LIMIT $5"
        );
        sqlx::query_as::<_, LedgerRecord>(&query)
            .bind(JobStatus::Pending.id())
            .bind(JobStatus::Active.id())
            .bind(JobStatus::Recovered.id())
            .bind(cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_execution(
        pool: &PgPool,
        execution_id: &str,
    ) -> Result<Vec<LedgerRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_ledger WHERE execution_id = $1 ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, LedgerRecord>(&query)
            .bind(execution_id)
            .fetch_all(pool)
            .await
    }

    /// Dead-lettered rows, most recently failed first.
    pub async fn list_dead_lettered(
        pool: &PgPool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRecord>, sqlx::Error> {
        let limit = limit.clamp(1, MAX_LIMIT);
        let query = format!(
            "SELECT {COLUMNS} FROM job_ledger \
             WHERE moved_to_dlq \
             ORDER BY COALESCE(finished_at, updated_at) DESC \
             LIMIT $1 OFFSET $2"
        );
        sqlx::query_as::<_, LedgerRecord>(&query)
            .bind(limit)
            .bind(offset.max(0))
            .fetch_all(pool)
            .await
    }

    pub async fn stats(pool: &PgPool) -> Result<LedgerStatsRecord, sqlx::Error> {
        sqlx::query_as::<_, LedgerStatsRecord>(
            "SELECT \
                 COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE status_id = $1) AS pending, \
                 COUNT(*) FILTER (WHERE status_id = $2) AS active, \
                 COUNT(*) FILTER (WHERE status_id = $3) AS completed, \
                 COUNT(*) FILTER (WHERE status_id = $4) AS failed, \
                 COUNT(*) FILTER (WHERE status_id = $5) AS recovered, \
                 COUNT(*) FILTER (WHERE moved_to_dlq) AS dead_lettered, \
                 COALESCE(SUM(recovery_count), 0)::BIGINT AS total_recoveries \
             FROM job_ledger",
        )
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::Active.id())
        .bind(JobStatus::Completed.id())
        .bind(JobStatus::Failed.id())
        .bind(JobStatus::Recovered.id())
        .fetch_one(pool)
        .await
    }
}
