//! PostgreSQL [`JobLedger`].
//!
//! Every write runs in a transaction that row-locks the target, evaluates
//! the guard with [`apply_mutation`] / [`merge_dispatch`], writes the row
//! back and appends the log line. Concurrent writers to the same row are
//! serialized by the lock, so compare-and-set mutations hold.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use genflow_core::clock::{Clock, SystemClock};
use genflow_core::error::CoreError;
use genflow_core::ledger::{
    apply_mutation, merge_dispatch, JobLedger, LedgerMutation, LedgerRow, LedgerStats, LogEntry,
    MutationOutcome, NewLedgerRow, NewLogEntry,
};
use genflow_core::types::Timestamp;

use crate::models::ledger::LedgerRecord;
use crate::repositories::LedgerRepo;
use crate::{store_err, DbPool};

pub struct PgJobLedger {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl PgJobLedger {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Attach log lines to a batch of records with a single query.
    async fn hydrate(&self, records: Vec<LedgerRecord>) -> Result<Vec<LedgerRow>, CoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = records.iter().map(|r| r.job_id.clone()).collect();
        let mut logs: HashMap<String, Vec<LogEntry>> = HashMap::new();
        for log in LedgerRepo::logs_for(&self.pool, &ids).await.map_err(store_err)? {
            logs.entry(log.job_id.clone()).or_default().push(log.into());
        }

        records
            .into_iter()
            .map(|record| {
                let entries = logs.remove(&record.job_id).unwrap_or_default();
                record.into_row(entries)
            })
            .collect()
    }

    async fn hydrate_one(&self, record: Option<LedgerRecord>) -> Result<Option<LedgerRow>, CoreError> {
        match record {
            Some(record) => Ok(self.hydrate(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

#[async_trait]
impl JobLedger for PgJobLedger {
    async fn upsert_dispatched(
        &self,
        row: NewLedgerRow,
        fresh: bool,
        log: Option<NewLogEntry>,
    ) -> Result<LedgerRow, CoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let existing = LedgerRepo::lock_by_node(&mut *tx, &row.execution_id, &row.node_id)
            .await
            .map_err(store_err)?
            .map(|record| record.into_row(Vec::new()))
            .transpose()?;

        let merged = merge_dispatch(existing, row, fresh, now);
        LedgerRepo::save(&mut *tx, &merged).await.map_err(store_err)?;
        if let Some(log) = &log {
            LedgerRepo::insert_log(&mut *tx, &merged.job_id, log, now)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;

        self.find(&merged.job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(merged.job_id))
    }

    async fn find(&self, job_id: &str) -> Result<Option<LedgerRow>, CoreError> {
        let record = LedgerRepo::find_by_id(&self.pool, job_id)
            .await
            .map_err(store_err)?;
        self.hydrate_one(record).await
    }

    async fn find_by_node(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<LedgerRow>, CoreError> {
        let record = LedgerRepo::find_by_node(&self.pool, execution_id, node_id)
            .await
            .map_err(store_err)?;
        self.hydrate_one(record).await
    }

    async fn apply(
        &self,
        job_id: &str,
        mutation: LedgerMutation,
        log: Option<NewLogEntry>,
    ) -> Result<MutationOutcome, CoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let Some(record) = LedgerRepo::lock_by_id(&mut *tx, job_id)
            .await
            .map_err(store_err)?
        else {
            return Ok(MutationOutcome::NotFound);
        };
        let mut row = record.into_row(Vec::new())?;

        if !apply_mutation(&mut row, &mutation, now) {
            // Dropping the transaction releases the lock.
            drop(tx);
            let current = self.find(job_id).await?;
            return Ok(current.map_or(MutationOutcome::NotFound, MutationOutcome::Rejected));
        }

        LedgerRepo::save(&mut *tx, &row).await.map_err(store_err)?;
        if let Some(log) = &log {
            LedgerRepo::insert_log(&mut *tx, job_id, log, now)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;

        let updated = self.find(job_id).await?;
        Ok(updated.map_or(MutationOutcome::NotFound, MutationOutcome::Applied))
    }

    async fn find_stalled(
        &self,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<LedgerRow>, CoreError> {
        let records = LedgerRepo::find_stalled(&self.pool, cutoff, limit)
            .await
            .map_err(store_err)?;
        self.hydrate(records).await
    }

    async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<LedgerRow>, CoreError> {
        let records = LedgerRepo::list_for_execution(&self.pool, execution_id)
            .await
            .map_err(store_err)?;
        self.hydrate(records).await
    }

    async fn list_dead_lettered(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRow>, CoreError> {
        let records = LedgerRepo::list_dead_lettered(&self.pool, limit, offset)
            .await
            .map_err(store_err)?;
        self.hydrate(records).await
    }

    async fn stats(&self) -> Result<LedgerStats, CoreError> {
        LedgerRepo::stats(&self.pool)
            .await
            .map(Into::into)
            .map_err(store_err)
    }
}
