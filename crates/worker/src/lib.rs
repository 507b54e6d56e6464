//! Worker runtime: per-queue pools with bounded concurrency, lock renewal
//! and native retries with exponential backoff.

pub mod config;
pub mod pool;
pub mod runtime;

pub use config::WorkerConfig;
pub use pool::QueuePool;
pub use runtime::Worker;
