use std::sync::Arc;

use genflow_dispatch::{QueueDispatcher, RecoverySweeper};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Queue dispatcher over the configured ledger and queue backends.
    pub dispatcher: Arc<QueueDispatcher>,
    /// Recovery sweeper sharing the dispatcher above.
    pub sweeper: Arc<RecoverySweeper>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
