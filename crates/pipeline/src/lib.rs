//! Node processors.
//!
//! One [`JobHandler`] per queue turns a claimed queue job into provider
//! work: it marks the ledger row active, checks that the parent execution
//! still wants the result, builds and submits requests down the model
//! fallback chain, polls each prediction, and writes the outcome to both
//! the execution record and the ledger.

pub mod builder;
pub mod config;
pub mod handler;
pub mod lifecycle;
pub mod models;
pub mod orchestration;
pub mod processor;
pub mod timing;

pub use builder::{JsonInputBuilder, RequestBuilder};
pub use config::{CategorySettings, PipelineConfig};
pub use handler::{build_handlers, HandlerDeps, JobHandler};
pub use orchestration::OrchestrationProcessor;
pub use processor::PredictionProcessor;
pub use timing::CategoryTiming;
