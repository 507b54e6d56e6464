use std::time::Duration;

/// Prediction provider configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    /// Base URL of the provider API, without a trailing slash.
    pub api_url: String,
    /// Bearer token sent with every request, if set.
    pub api_token: Option<String>,
    /// Timeout applied to each individual HTTP request.
    pub request_timeout: Duration,
}

impl PredictionConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                        |
    /// |-----------------------------------|--------------------------------|
    /// | `PREDICTION_API_URL`              | `https://api.replicate.com/v1` |
    /// | `PREDICTION_API_TOKEN`            | unset                          |
    /// | `PREDICTION_REQUEST_TIMEOUT_SECS` | `30`                           |
    pub fn from_env() -> Self {
        let api_url = std::env::var("PREDICTION_API_URL")
            .unwrap_or_else(|_| "https://api.replicate.com/v1".into())
            .trim_end_matches('/')
            .to_string();

        let api_token = std::env::var("PREDICTION_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let request_timeout_secs: u64 = std::env::var("PREDICTION_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("PREDICTION_REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            api_url,
            api_token,
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }
}
