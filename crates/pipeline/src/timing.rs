//! Per-category polling cadence and progress bands.
//!
//! Video generation is slow, so video nodes poll less often and for much
//! longer than image or text nodes.

use std::time::Duration;

use genflow_core::node::NodeCategory;
use genflow_predictions::PollOptions;

/// Progress reported once the first request has been submitted.
pub const PROGRESS_SUBMITTED: f64 = 5.0;

/// Progress band covered while polling.
pub const PROGRESS_POLL_START: f64 = 10.0;
pub const PROGRESS_POLL_END: f64 = 95.0;

/// How often and how long a category's predictions are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryTiming {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl CategoryTiming {
    /// Built-in timing: image 2s x 90, video 5s x 360, text 1s x 120,
    /// audio 2s x 150.
    pub fn for_category(category: NodeCategory) -> Self {
        let (interval_secs, max_attempts) = match category {
            NodeCategory::Image => (2, 90),
            NodeCategory::Video => (5, 360),
            NodeCategory::Text => (1, 120),
            NodeCategory::Audio => (2, 150),
            // Orchestration nodes never poll a provider.
            NodeCategory::Orchestration => (1, 1),
        };
        Self {
            poll_interval: Duration::from_secs(interval_secs),
            max_attempts,
        }
    }

    /// Upper bound on the time spent polling one prediction.
    pub fn budget(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            max_attempts: self.max_attempts,
            poll_interval: self.poll_interval,
            progress_start: PROGRESS_POLL_START,
            progress_end: PROGRESS_POLL_END,
        }
    }
}
