use std::time::Duration;

use genflow_core::node::QueueName;
use genflow_core::queue::DEFAULT_MAX_ATTEMPTS;
use genflow_core::recovery::{RecoveryPolicy, DEFAULT_SWEEP_BATCH_LIMIT};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Native attempt limit given to every enqueued job.
    pub max_attempts: i32,
    /// Queues this deployment runs. Node types routed elsewhere are rejected.
    pub enabled_queues: Vec<QueueName>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enabled_queues: QueueName::ALL.to_vec(),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var            | Default        |
    /// |--------------------|----------------|
    /// | `JOB_MAX_ATTEMPTS` | `3`            |
    /// | `ENABLED_QUEUES`   | all queues     |
    ///
    /// `ENABLED_QUEUES` is a comma-separated list of queue names, e.g.
    /// `workflow-orchestrator,image-generation`.
    pub fn from_env() -> Self {
        let max_attempts: i32 = std::env::var("JOB_MAX_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_MAX_ATTEMPTS.to_string())
            .parse()
            .expect("JOB_MAX_ATTEMPTS must be a valid i32");

        let enabled_queues = match std::env::var("ENABLED_QUEUES") {
            Ok(list) => parse_queue_list(&list).expect("ENABLED_QUEUES must list known queue names"),
            Err(_) => QueueName::ALL.to_vec(),
        };

        Self {
            max_attempts: max_attempts.max(1),
            enabled_queues,
        }
    }

    pub fn is_enabled(&self, queue: QueueName) -> bool {
        self.enabled_queues.contains(&queue)
    }
}

/// Parse a comma-separated queue list, ignoring blanks and duplicates.
pub fn parse_queue_list(list: &str) -> Result<Vec<QueueName>, genflow_core::error::CoreError> {
    let mut queues = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let queue: QueueName = name.parse()?;
        if !queues.contains(&queue) {
            queues.push(queue);
        }
    }
    Ok(queues)
}

/// Recovery sweep configuration.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub policy: RecoveryPolicy,
    /// Time between scheduled sweeps.
    pub sweep_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            policy: RecoveryPolicy::default(),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl RecoveryConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default |
    /// |--------------------------------|---------|
    /// | `STALL_THRESHOLD_SECS`         | `300`   |
    /// | `MAX_RECOVERY_ATTEMPTS`        | `3`     |
    /// | `RECOVERY_SWEEP_INTERVAL_SECS` | `300`   |
    /// | `RECOVERY_BATCH_LIMIT`         | `500`   |
    pub fn from_env() -> Self {
        let stall_threshold_secs: u64 = std::env::var("STALL_THRESHOLD_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("STALL_THRESHOLD_SECS must be a valid u64");

        let max_recovery_attempts: i32 = std::env::var("MAX_RECOVERY_ATTEMPTS")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("MAX_RECOVERY_ATTEMPTS must be a valid i32");

        let sweep_interval_secs: u64 = std::env::var("RECOVERY_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("RECOVERY_SWEEP_INTERVAL_SECS must be a valid u64");

        let sweep_batch_limit: i64 = std::env::var("RECOVERY_BATCH_LIMIT")
            .unwrap_or_else(|_| DEFAULT_SWEEP_BATCH_LIMIT.to_string())
            .parse()
            .expect("RECOVERY_BATCH_LIMIT must be a valid i64");

        Self {
            policy: RecoveryPolicy {
                stall_threshold: Duration::from_secs(stall_threshold_secs),
                max_recovery_attempts: max_recovery_attempts.max(0),
                sweep_batch_limit: sweep_batch_limit.max(1),
            },
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
        }
    }
}
