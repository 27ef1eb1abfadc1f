//! Database connection pool management

use anyhow::{Context, Result};
use robomonkey_config::DatabaseConfig;
use sqlx::PgPool;

use crate::migrations::run_migrations;

/// Create database connection pool
///
/// # Errors
///
/// Returns an error if:
/// - Database connection parameters are invalid
/// - Database server is unreachable or refuses connections
/// - Connection timeout is exceeded
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    config
        .create_pool()
        .await
        .context("Failed to create database pool")
}

/// Initialize database (create pool and run control-schema migrations)
///
/// # Errors
///
/// Returns an error if:
/// - Pool creation fails (see `create_pool` errors)
/// - Control-schema migrations fail to run
/// - Migration advisory lock cannot be acquired
pub async fn initialize_database(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = create_pool(config).await?;

    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}
