//! Database migration runner with advisory lock support
//!
//! The control schema is migrated once per database; per-repo schemas are
//! instantiated from an embedded DDL template at registration time.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

/// Advisory lock ID for migrations (arbitrary but stable)
const MIGRATION_LOCK_ID: i64 = 4177;

/// Embedded per-repo DDL template; see `apply_repo_schema`.
const REPO_SCHEMA_TEMPLATE: &str = include_str!("../migrations/repo_schema.sql");

/// Run all pending control-schema migrations with advisory locking
///
/// # Errors
///
/// Returns an error if the advisory lock cannot be acquired or a migration
/// statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .context("Failed to acquire migration lock")?;

    // Ensure lock is released even on error
    let result = run_migrations_inner(pool).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .context("Failed to release migration lock")?;

    result
}

async fn run_migrations_inner(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS robomonkey_control")
        .execute(pool)
        .await
        .context("Failed to create control schema")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS robomonkey_control.schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create migrations table")?;

    let applied: Vec<i32> =
        sqlx::query("SELECT version FROM robomonkey_control.schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await
            .context("Failed to fetch applied migrations")?
            .iter()
            .map(|row| row.get(0))
            .collect();

    let migrations = vec![(
        1,
        "control_schema",
        include_str!("../migrations/001_control_schema.sql"),
    )];

    for (version, name, sql) in migrations {
        if applied.contains(&version) {
            tracing::debug!("Migration {} ({}) already applied", version, name);
            continue;
        }

        tracing::info!("Applying migration {} ({})", version, name);

        let mut tx = pool.begin().await.context("Failed to start transaction")?;

        // Migration files hold multiple statements
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute migration {version} ({name})"))?;

        sqlx::query(
            "INSERT INTO robomonkey_control.schema_migrations (version, name) VALUES ($1, $2)",
        )
        .bind(version)
        .bind(name)
        .execute(&mut *tx)
        .await
        .context("Failed to record migration")?;

        tx.commit().await.context("Failed to commit migration")?;

        tracing::info!("Migration {} ({}) completed", version, name);
    }

    Ok(())
}

/// Instantiate the per-repo DDL template for `schema_name` with the
/// configured embedding `dimension` and execute it.
///
/// The caller is responsible for having validated `schema_name` against
/// the identifier pattern; the substitution here is textual.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub async fn apply_repo_schema(pool: &PgPool, schema_name: &str, dimension: usize) -> Result<()> {
    let ddl = REPO_SCHEMA_TEMPLATE
        .replace("{schema}", schema_name)
        .replace("{dimension}", &dimension.to_string());

    sqlx::raw_sql(&ddl)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to apply repo DDL for schema {schema_name}"))?;

    Ok(())
}

/// Drop a per-repo schema and everything in it.
///
/// # Errors
///
/// Returns an error if the DROP statement fails.
pub async fn drop_repo_schema(pool: &PgPool, schema_name: &str) -> Result<()> {
    sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS \"{schema_name}\" CASCADE"))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to drop schema {schema_name}"))?;

    Ok(())
}
