//! Stall detection policy for the recovery sweep.
//!
//! A ledger row is *stalled* when it sits in `pending`/`active`/`recovered`,
//! is not dead-lettered, and neither its `updated_at` nor its
//! `last_heartbeat` has moved within the staleness threshold. A stalled row
//! is a recovery *candidate* while it still has recovery budget; a stalled
//! row without budget is *exhausted* and gets dead-lettered instead. A
//! `recovered` row already holds its budget increment and is always
//! re-enqueued.

use std::time::Duration;

use serde::Serialize;

use crate::ledger::LedgerRow;
use crate::status::JobStatus;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default staleness threshold: 5 minutes.
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(300);

/// Default number of automatic re-enqueues before a job is dead-lettered.
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: i32 = 3;

/// Default upper bound on rows inspected per sweep.
pub const DEFAULT_SWEEP_BATCH_LIMIT: i64 = 500;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Tunable recovery parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub stall_threshold: Duration,
    pub max_recovery_attempts: i32,
    pub sweep_batch_limit: i64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            sweep_batch_limit: DEFAULT_SWEEP_BATCH_LIMIT,
        }
    }
}

/// How a stalled row should be handled once it survives both filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAction {
    Recover,
    DeadLetter,
}

impl RecoveryPolicy {
    /// Rows last touched before this instant are stale.
    pub fn stall_cutoff(&self, now: Timestamp) -> Timestamp {
        let threshold = chrono::Duration::from_std(self.stall_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_STALL_THRESHOLD.as_secs() as i64));
        now - threshold
    }

    /// Conditions (a)-(c): sweepable status, not dead-lettered, no recent
    /// update and no recent heartbeat.
    pub fn is_stalled(&self, row: &LedgerRow, now: Timestamp) -> bool {
        let cutoff = self.stall_cutoff(now);
        row.status.is_sweepable()
            && !row.moved_to_dlq
            && row.updated_at < cutoff
            && row.last_heartbeat.map_or(true, |hb| hb < cutoff)
    }

    /// Condition (d): recovery budget left.
    pub fn has_recovery_budget(&self, row: &LedgerRow) -> bool {
        row.recovery_count < self.max_recovery_attempts
    }

    /// A stalled row that may still be re-enqueued automatically.
    pub fn is_stall_candidate(&self, row: &LedgerRow, now: Timestamp) -> bool {
        self.is_stalled(row, now) && self.action_for(row) == StallAction::Recover
    }

    /// What to do with a row confirmed dead (parent execution still running
    /// and the queue backend no longer holds it).
    ///
    /// A row already in `recovered` spent its increment when it was marked;
    /// only its re-enqueue is outstanding, so it is never dead-lettered here.
    pub fn action_for(&self, row: &LedgerRow) -> StallAction {
        if row.status == JobStatus::Recovered || self.has_recovery_budget(row) {
            StallAction::Recover
        } else {
            StallAction::DeadLetter
        }
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Per-job result of a recovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Re-enqueued with an incremented recovery count.
    Recovered,
    /// Recovery budget exhausted; moved to the dead-letter queue.
    DeadLettered,
    /// Parent execution already terminal or missing; closed as completed.
    Orphaned,
    /// Still live in the queue backend; heartbeat refreshed only.
    StillAlive,
    /// Row changed underneath the sweep, or a collaborator failed.
    Skipped,
}

/// Summary of one sweep or one manual execution recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub recovered: usize,
    pub dead_lettered: usize,
    pub orphaned: usize,
    pub still_alive: usize,
    pub skipped: usize,
}

impl RecoveryReport {
    pub fn record(&mut self, outcome: RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::Recovered => self.recovered += 1,
            RecoveryOutcome::DeadLettered => self.dead_lettered += 1,
            RecoveryOutcome::Orphaned => self.orphaned += 1,
            RecoveryOutcome::StillAlive => self.still_alive += 1,
            RecoveryOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Whether the pass changed anything.
    pub fn is_noop(&self) -> bool {
        self.recovered == 0 && self.dead_lettered == 0 && self.orphaned == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
