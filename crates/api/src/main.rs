use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use genflow_api::background;
use genflow_api::config::ServerConfig;
use genflow_api::router::build_app_router;
use genflow_api::state::AppState;
use genflow_db::{PgExecutionStore, PgJobLedger, PgQueueBackend};
use genflow_dispatch::{DispatchConfig, QueueDispatcher, RecoveryConfig, RecoverySweeper};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Connections reserved for the API process.
const API_POOL_SIZE: u32 = 10;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let dispatch_config = DispatchConfig::from_env();
    let recovery_config = RecoveryConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = genflow_db::create_pool(&database_url, API_POOL_SIZE)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    genflow_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    genflow_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Dispatcher and sweeper ---
    let dispatcher = Arc::new(QueueDispatcher::new(
        Arc::new(PgJobLedger::new(pool.clone())),
        Arc::new(PgQueueBackend::new(pool.clone())),
        dispatch_config,
    ));
    let sweeper = Arc::new(RecoverySweeper::new(
        Arc::clone(&dispatcher),
        Arc::new(PgExecutionStore::new(pool.clone())),
        recovery_config.policy,
    ));

    // --- Background recovery sweep ---
    let sweep_cancel = CancellationToken::new();
    let sweep_handle = tokio::spawn(background::recovery_sweep::run(
        Arc::clone(&sweeper),
        recovery_config.sweep_interval,
        sweep_cancel.clone(),
    ));

    let state = AppState {
        dispatcher,
        sweeper,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped accepting connections, cleaning up");

    sweep_cancel.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(grace, sweep_handle).await.is_err() {
        tracing::warn!("Recovery sweep did not stop within the shutdown timeout");
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
