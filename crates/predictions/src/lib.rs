//! External prediction service integration.
//!
//! [`api::PredictionApi`] is the HTTP client for a hosted prediction
//! provider; [`poller::poll_for_completion`] is the single polling loop
//! every node processor uses to wait for an operation to finish.

pub mod api;
pub mod config;
pub mod poller;

pub use api::{PredictionApi, PredictionApiError};
pub use config::PredictionConfig;
pub use poller::{poll_for_completion, PollOptions, PollOutcome, ProgressReporter};
