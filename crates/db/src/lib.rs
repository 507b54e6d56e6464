//! PostgreSQL persistence for the genflow job engine.
//!
//! [`repositories`] hold the raw SQL as zero-sized structs taking
//! `&PgPool`; [`PgJobLedger`], [`PgQueueBackend`] and [`PgExecutionStore`]
//! adapt them to the port traits defined in `genflow-core`.

use sqlx::postgres::PgPoolOptions;

pub mod execution;
pub mod ledger;
pub mod models;
pub mod queue;
pub mod repositories;

pub use execution::PgExecutionStore;
pub use ledger::PgJobLedger;
pub use queue::PgQueueBackend;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply every pending migration bundled with this crate.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Flatten a driver error into the engine's store error.
pub(crate) fn store_err(err: sqlx::Error) -> genflow_core::error::CoreError {
    genflow_core::error::CoreError::Store(err.to_string())
}

/// Flatten a driver error raised by the queue tables.
pub(crate) fn queue_err(err: sqlx::Error) -> genflow_core::error::CoreError {
    genflow_core::error::CoreError::Queue(err.to_string())
}
