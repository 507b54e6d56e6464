#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use genflow_core::clock::{Clock, ManualClock};
use genflow_core::execution::ExecutionStatus;
use genflow_core::memory::{MemoryExecutionStore, MemoryLedger, MemoryQueue};
use genflow_core::recovery::RecoveryPolicy;
use genflow_core::types::Timestamp;
use genflow_dispatch::{DispatchConfig, NodeDispatch, QueueDispatcher, RecoverySweeper};

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub queue: Arc<MemoryQueue>,
    pub executions: Arc<MemoryExecutionStore>,
    pub dispatcher: Arc<QueueDispatcher>,
    pub sweeper: RecoverySweeper,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(MemoryLedger::with_clock(clock.clone()));
        let queue = Arc::new(MemoryQueue::with_clock(clock.clone()));
        let executions = Arc::new(MemoryExecutionStore::new());
        let dispatcher = Arc::new(QueueDispatcher::new(
            ledger.clone(),
            queue.clone(),
            config,
        ));
        let sweeper = RecoverySweeper::with_clock(
            dispatcher.clone(),
            executions.clone(),
            RecoveryPolicy::default(),
            clock.clone(),
        );
        Self {
            clock,
            ledger,
            queue,
            executions,
            dispatcher,
            sweeper,
        }
    }

    pub fn running_execution(&self, execution_id: &str) {
        self.executions
            .insert(execution_id, "wf-1", ExecutionStatus::Running);
    }

    pub fn clock_now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Move the clock past the default stall threshold.
    pub fn let_stall(&self) {
        self.clock.advance(chrono::Duration::minutes(10));
    }
}

pub fn node(execution_id: &str, node_id: &str, node_type: &str) -> NodeDispatch {
    NodeDispatch {
        execution_id: execution_id.to_string(),
        workflow_id: "wf-1".to_string(),
        node_id: node_id.to_string(),
        node_type: node_type.to_string(),
        node_data: serde_json::json!({"prompt": "a lighthouse at dusk"}),
        depends_on: Vec::new(),
    }
}
