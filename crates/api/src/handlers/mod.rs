pub mod dlq;
pub mod executions;
pub mod jobs;
pub mod queues;
