//! Queue dispatch and stall recovery.
//!
//! [`QueueDispatcher`] places jobs on their queues and keeps the job
//! ledger in step with the queue backend. [`RecoverySweeper`] finds ledger
//! rows that stopped advancing and repairs them with bounded re-enqueues.

pub mod config;
pub mod dispatcher;
pub mod sweeper;

pub use config::{DispatchConfig, RecoveryConfig};
pub use dispatcher::{
    Dispatched, JobStatusUpdate, JobStatusView, NodeDispatch, QueueDispatcher, QueueMetrics,
    StatusSource,
};
pub use sweeper::RecoverySweeper;
