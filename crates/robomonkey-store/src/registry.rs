//! Repository registry read/update operations (control schema)
//!
//! Registration itself lives on [`crate::schema::SchemaManager`] because it
//! also creates the per-repo schema; everything else about registry rows
//! lives here.

use sqlx::PgPool;

use crate::error::{StoreErrorExt, StoreOperation, StoreResult};
use crate::models::RepoRegistration;
use crate::schema::registration_from_row;

/// Read and update registry rows
#[derive(Clone)]
pub struct RepoRegistry {
    pool: PgPool,
}

impl RepoRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All registered repositories, enabled first, then by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self) -> StoreResult<Vec<RepoRegistration>> {
        let operation = StoreOperation::Query {
            description: "list_repos".into(),
        };

        let rows = sqlx::query(
            r"
            SELECT name, repo_id, schema_name, root_path, enabled, auto_index, auto_embed,
                   auto_watch, config, created_at, updated_at, last_seen
            FROM robomonkey_control.repo_registry
            ORDER BY enabled DESC, name ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(rows.iter().map(registration_from_row).collect())
    }

    /// One registration by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, name: &str) -> StoreResult<Option<RepoRegistration>> {
        let operation = StoreOperation::ResolveRepo {
            name_or_id: name.to_string(),
        };

        let row = sqlx::query(
            r"
            SELECT name, repo_id, schema_name, root_path, enabled, auto_index, auto_embed,
                   auto_watch, config, created_at, updated_at, last_seen
            FROM robomonkey_control.repo_registry
            WHERE name = $1
            ",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(row.as_ref().map(registration_from_row))
    }

    /// Flip the enabled flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> StoreResult<()> {
        let operation = StoreOperation::Query {
            description: format!("set_enabled({name})"),
        };

        sqlx::query(
            r"
            UPDATE robomonkey_control.repo_registry
            SET enabled = $2, updated_at = NOW()
            WHERE name = $1
            ",
        )
        .bind(name)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(())
    }

    /// Stamp `last_seen` after a successful operation touched this repo.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn touch_last_seen(&self, name: &str) -> StoreResult<()> {
        let operation = StoreOperation::Query {
            description: format!("touch_last_seen({name})"),
        };

        sqlx::query(
            "UPDATE robomonkey_control.repo_registry SET last_seen = NOW() WHERE name = $1",
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_store_err(operation)?;

        Ok(())
    }
}
