//! In-memory implementations of every port.
//!
//! They follow the same guard semantics as the PostgreSQL adapters (the
//! ledger literally calls [`crate::ledger::apply_mutation`]) and are used by
//! the test suites of every crate and by single-process development runs.

mod execution;
mod ledger;
mod prediction;
mod queue;

use std::sync::{Mutex, MutexGuard};

pub use execution::{MemoryExecutionStore, NodeResult};
pub use ledger::MemoryLedger;
pub use prediction::{Script, ScriptStep, ScriptedPredictions};
pub use queue::MemoryQueue;

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
