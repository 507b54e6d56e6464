//! REST client for the hosted prediction provider.
//!
//! Models are addressed as `owner/name` (latest version) or
//! `owner/name:version` (pinned version). Submission returns the provider's
//! prediction id; status is fetched with `GET /predictions/{id}`.

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::prediction::{Prediction, PredictionRequest, PredictionService};
use serde::Deserialize;

use crate::config::PredictionConfig;

/// HTTP client for one prediction provider.
pub struct PredictionApi {
    client: reqwest::Client,
    api_url: String,
    api_token: Option<String>,
}

/// Minimal body of a submission response.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
}

/// Errors from the prediction REST layer.
#[derive(Debug, thiserror::Error)]
pub enum PredictionApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Prediction API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl From<PredictionApiError> for CoreError {
    fn from(err: PredictionApiError) -> Self {
        CoreError::Provider(err.to_string())
    }
}

impl PredictionApi {
    pub fn new(api_url: String, api_token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_token)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: String, api_token: Option<String>) -> Self {
        Self {
            client,
            api_url,
            api_token,
        }
    }

    /// Build a client with the configured per-request timeout.
    pub fn from_config(config: &PredictionConfig) -> Result<Self, PredictionApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.api_token.clone(),
        ))
    }

    /// Create a prediction and return its id.
    ///
    /// Pinned versions go to `POST /predictions` with a `version` field;
    /// bare model names go to `POST /models/{owner}/{name}/predictions`.
    pub async fn create_prediction(
        &self,
        request: &PredictionRequest,
    ) -> Result<SubmitResponse, PredictionApiError> {
        let (url, body) = match request.model.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.api_url),
                serde_json::json!({ "version": version, "input": request.input }),
            ),
            None => (
                format!("{}/models/{}/predictions", self.api_url, request.model),
                serde_json::json!({ "input": request.input }),
            ),
        };

        let response = self.authorize(self.client.post(url)).json(&body).send().await?;
        Self::parse_response(response).await
    }

    /// Fetch the current state of a prediction.
    pub async fn get_prediction(&self, prediction_id: &str) -> Result<Prediction, PredictionApiError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/predictions/{}", self.api_url, prediction_id)),
            )
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Ensure the response has a success status code, or turn it into a
    /// [`PredictionApiError::ApiError`] carrying the body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, PredictionApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PredictionApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PredictionApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PredictionService for PredictionApi {
    async fn submit(&self, request: &PredictionRequest) -> Result<String, CoreError> {
        let created = self.create_prediction(request).await?;
        tracing::debug!(model = %request.model, prediction_id = %created.id, "Prediction submitted");
        Ok(created.id)
    }

    async fn get_status(&self, prediction_id: &str) -> Result<Prediction, CoreError> {
        Ok(self.get_prediction(prediction_id).await?)
    }
}
