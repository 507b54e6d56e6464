use std::sync::Arc;

use anyhow::Context;
use genflow_db::{PgExecutionStore, PgJobLedger, PgQueueBackend};
use genflow_dispatch::{DispatchConfig, QueueDispatcher};
use genflow_pipeline::{build_handlers, HandlerDeps, PipelineConfig};
use genflow_predictions::{PredictionApi, PredictionConfig};
use genflow_worker::{Worker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genflow_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let worker_config = WorkerConfig::from_env();
    let dispatch_config = DispatchConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();
    let prediction_config = PredictionConfig::from_env();
    tracing::info!(
        worker_id = %worker_config.worker_id,
        api_url = %prediction_config.api_url,
        "Loaded worker configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections = worker_config
        .concurrency
        .values()
        .sum::<usize>()
        .saturating_add(5) as u32;
    let pool = genflow_db::create_pool(&database_url, max_connections)
        .await
        .context("Failed to connect to database")?;
    genflow_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    genflow_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Engine ---
    let enabled_queues = dispatch_config.enabled_queues.clone();
    let dispatcher = Arc::new(QueueDispatcher::new(
        Arc::new(PgJobLedger::new(pool.clone())),
        Arc::new(PgQueueBackend::new(pool.clone())),
        dispatch_config,
    ));
    let predictions =
        PredictionApi::from_config(&prediction_config).context("Failed to build prediction client")?;
    let deps = HandlerDeps::new(
        Arc::clone(&dispatcher),
        Arc::new(PgExecutionStore::new(pool.clone())),
        Arc::new(predictions),
    );
    let handlers = build_handlers(&deps, &pipeline_config, &enabled_queues);
    let worker = Worker::new(worker_config, dispatcher, handlers);

    // --- Run until signalled ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    worker.run(cancel).await;
    pool.close().await;
    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
