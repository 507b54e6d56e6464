#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::{TimeZone, Utc};
use genflow_api::config::ServerConfig;
use genflow_api::router::build_app_router;
use genflow_api::state::AppState;
use genflow_core::clock::ManualClock;
use genflow_core::execution::ExecutionStatus;
use genflow_core::memory::{MemoryExecutionStore, MemoryLedger, MemoryQueue};
use genflow_core::recovery::RecoveryPolicy;
use genflow_dispatch::{DispatchConfig, QueueDispatcher, RecoverySweeper};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// The full application router over in-memory backends, plus handles to
/// those backends for arranging and inspecting state.
pub struct TestApp {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub queue: Arc<MemoryQueue>,
    pub executions: Arc<MemoryExecutionStore>,
    pub dispatcher: Arc<QueueDispatcher>,
    pub sweeper: Arc<RecoverySweeper>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(MemoryLedger::with_clock(clock.clone()));
        let queue = Arc::new(MemoryQueue::with_clock(clock.clone()));
        let executions = Arc::new(MemoryExecutionStore::new());
        let dispatcher = Arc::new(QueueDispatcher::new(
            ledger.clone(),
            queue.clone(),
            DispatchConfig::default(),
        ));
        let sweeper = Arc::new(RecoverySweeper::with_clock(
            dispatcher.clone(),
            executions.clone(),
            RecoveryPolicy::default(),
            clock.clone(),
        ));
        let state = AppState {
            dispatcher: dispatcher.clone(),
            sweeper: sweeper.clone(),
            config: Arc::new(test_config()),
        };
        Self {
            clock,
            ledger,
            queue,
            executions,
            dispatcher,
            sweeper,
            router: build_app_router(state),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn running_execution(&self, execution_id: &str) {
        self.executions
            .insert(execution_id, "wf-1", ExecutionStatus::Running);
    }

    /// Move the clock past the default stall threshold.
    pub fn let_stall(&self) {
        self.clock.advance(chrono::Duration::minutes(10));
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        get(self.router(), uri).await
    }

    pub async fn post(&self, uri: &str) -> Response<Body> {
        send(self.router(), Method::POST, uri, None).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        send(self.router(), Method::POST, uri, Some(body)).await
    }

    /// Enqueue a node through the HTTP surface.
    pub async fn enqueue_node(&self, execution_id: &str, node_id: &str, node_type: &str) -> Value {
        let response = self
            .post_json(
                &format!("/api/v1/executions/{execution_id}/nodes"),
                serde_json::json!({
                    "workflow_id": "wf-1",
                    "node_id": node_id,
                    "node_type": node_type,
                    "node_data": {"prompt": "a lighthouse at dusk"},
                }),
            )
            .await;
        body_json(response).await
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
