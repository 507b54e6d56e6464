//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` (or a transaction's `&mut PgConnection`) as the
//! first argument.

pub mod execution_repo;
pub mod ledger_repo;
pub mod queue_job_repo;

pub use execution_repo::ExecutionRepo;
pub use ledger_repo::LedgerRepo;
pub use queue_job_repo::QueueJobRepo;
