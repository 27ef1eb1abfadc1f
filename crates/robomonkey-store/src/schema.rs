//! Schema manager: multi-tenant isolation
//!
//! The physical database holds a reserved control schema
//! (`robomonkey_control`) and one schema per repository named
//! `<prefix><sanitized_repo_name>`. Per-repo access always goes through
//! [`SchemaManager::scoped`], which pins the session search path to the
//! repository's schema; control-schema SQL is always schema-qualified and
//! therefore unaffected by whatever search path a pooled connection
//! carries.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{StoreError, StoreErrorExt, StoreOperation, StoreResult};
use crate::migrations::{apply_repo_schema, drop_repo_schema};
use crate::models::RepoRegistration;

/// Sanitize a repository name into a valid schema identifier suffix:
/// lowercase, non-alphanumerics become underscores, runs collapse, and a
/// leading non-letter gets an `r_` prefix.
pub fn sanitize_schema_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;

    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore && !out.is_empty() {
            out.push('_');
            last_underscore = true;
        }
    }

    // Trim a trailing separator left by non-alphanumeric suffixes
    while out.ends_with('_') {
        out.pop();
    }

    if out.is_empty() {
        out.push_str("repo");
    }
    if !out.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        out.insert_str(0, "r_");
    }

    out
}

/// Validate a full schema name against `[a-z][a-z0-9_]*`
pub fn is_valid_schema_name(schema_name: &str) -> bool {
    let mut chars = schema_name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A database session whose search path is pinned to one per-repo schema.
///
/// Every unqualified table name in queries issued on this session resolves
/// inside the repository's schema, so per-repo code cannot accidentally
/// read another repository's rows.
pub struct ScopedSession {
    conn: PoolConnection<Postgres>,
    schema_name: String,
}

impl ScopedSession {
    /// The schema this session is scoped to
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Borrow the underlying connection for queries
    pub fn conn(&mut self) -> &mut sqlx::PgConnection {
        &mut self.conn
    }

    /// Begin a transaction on this scoped connection.
    ///
    /// The search path set at acquisition carries into the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the BEGIN statement fails.
    pub async fn begin(&mut self) -> StoreResult<Transaction<'_, Postgres>> {
        use sqlx::Connection;

        self.conn
            .begin()
            .await
            .map_store_err(StoreOperation::ScopeSession {
                schema_name: self.schema_name.clone(),
            })
    }
}

/// Resolves repositories and hands out schema-scoped sessions
#[derive(Clone)]
pub struct SchemaManager {
    pool: PgPool,
    prefix: String,
    embedding_dimension: usize,
}

impl SchemaManager {
    pub fn new(pool: PgPool, prefix: impl Into<String>, embedding_dimension: usize) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            embedding_dimension,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Full schema name for a repository name
    pub fn schema_name_for(&self, repo_name: &str) -> String {
        format!("{}{}", self.prefix, sanitize_schema_name(repo_name))
    }

    /// Create a per-repo schema and apply the per-repo DDL.
    ///
    /// # Errors
    ///
    /// Fails with `SchemaExists` if the schema is already present and
    /// `force` is not set; with `force` the schema is dropped and
    /// recreated.
    pub async fn create_schema(&self, repo_name: &str, force: bool) -> StoreResult<String> {
        let schema_name = self.schema_name_for(repo_name);

        if !is_valid_schema_name(&schema_name) {
            return Err(StoreError::Invalid {
                what: "schema name".into(),
                value: schema_name,
                reason: "must match [a-z][a-z0-9_]*".into(),
            });
        }

        let exists = self.schema_exists(&schema_name).await?;
        if exists {
            if !force {
                return Err(StoreError::SchemaExists { schema_name });
            }
            tracing::warn!(schema = %schema_name, "Dropping existing schema (force)");
            drop_repo_schema(&self.pool, &schema_name)
                .await
                .map_err(|e| StoreError::Database {
                    operation: Box::new(StoreOperation::DropSchema {
                        schema_name: schema_name.clone(),
                    }),
                    source: sqlx::Error::Protocol(e.to_string()),
                })?;
        }

        apply_repo_schema(&self.pool, &schema_name, self.embedding_dimension)
            .await
            .map_err(|e| StoreError::Database {
                operation: Box::new(StoreOperation::CreateSchema {
                    schema_name: schema_name.clone(),
                }),
                source: sqlx::Error::Protocol(e.to_string()),
            })?;

        tracing::info!(schema = %schema_name, "Created per-repo schema");
        Ok(schema_name)
    }

    async fn schema_exists(&self, schema_name: &str) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1) AS present",
        )
        .bind(schema_name)
        .fetch_one(&self.pool)
        .await
        .map_store_err(StoreOperation::CreateSchema {
            schema_name: schema_name.to_string(),
        })?;

        Ok(row.get("present"))
    }

    /// Register a repository: create its schema, insert the registry row,
    /// and seed the per-repo `repo` and `repo_index_state` rows.
    ///
    /// # Errors
    ///
    /// Rejects with `SchemaNameConflict` if the schema is already
    /// registered for a different root path (unless `force`).
    pub async fn register(
        &self,
        repo_name: &str,
        root_path: &str,
        force: bool,
    ) -> StoreResult<RepoRegistration> {
        let schema_name = self.schema_name_for(repo_name);
        let operation = StoreOperation::RegisterRepo {
            repo_name: repo_name.to_string(),
        };

        let existing = sqlx::query(
            "SELECT root_path FROM robomonkey_control.repo_registry WHERE schema_name = $1",
        )
        .bind(&schema_name)
        .fetch_optional(&self.pool)
        .await
        .map_store_err(operation.clone())?;

        if let Some(row) = existing {
            let existing_root: String = row.get("root_path");
            if existing_root != root_path && !force {
                return Err(StoreError::SchemaNameConflict {
                    schema_name,
                    existing_root,
                    requested_root: root_path.to_string(),
                });
            }
        }

        self.create_schema(repo_name, force).await.or_else(|e| {
            // Re-registering an existing repo without force is fine as long
            // as the root path matched above.
            if matches!(e, StoreError::SchemaExists { .. }) {
                Ok(schema_name.clone())
            } else {
                Err(e)
            }
        })?;

        let repo_id: Uuid = sqlx::query_scalar(
            r"
            INSERT INTO robomonkey_control.repo_registry (name, schema_name, root_path)
            VALUES ($1, $2, $3)
            ON CONFLICT (name)
            DO UPDATE SET root_path = EXCLUDED.root_path, updated_at = NOW()
            RETURNING repo_id
            ",
        )
        .bind(repo_name)
        .bind(&schema_name)
        .bind(root_path)
        .fetch_one(&self.pool)
        .await
        .map_store_err(operation.clone())?;

        // Seed the per-repo identity row inside the new schema
        let mut session = self.scoped(&schema_name).await?;
        sqlx::query(
            r"
            INSERT INTO repo (id, name, root_path)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET root_path = EXCLUDED.root_path
            ",
        )
        .bind(repo_id)
        .bind(repo_name)
        .bind(root_path)
        .execute(session.conn())
        .await
        .map_store_err(operation.clone())?;

        sqlx::query(
            r"
            INSERT INTO repo_index_state (repo_id)
            VALUES ($1)
            ON CONFLICT (repo_id) DO NOTHING
            ",
        )
        .bind(repo_id)
        .execute(session.conn())
        .await
        .map_store_err(operation.clone())?;

        self.fetch_registration(repo_name).await
    }

    async fn fetch_registration(&self, repo_name: &str) -> StoreResult<RepoRegistration> {
        let row = sqlx::query(
            r"
            SELECT name, repo_id, schema_name, root_path, enabled, auto_index, auto_embed,
                   auto_watch, config, created_at, updated_at, last_seen
            FROM robomonkey_control.repo_registry
            WHERE name = $1
            ",
        )
        .bind(repo_name)
        .fetch_optional(&self.pool)
        .await
        .map_store_err(StoreOperation::ResolveRepo {
            name_or_id: repo_name.to_string(),
        })?
        .ok_or_else(|| StoreError::RepoNotFound {
            name_or_id: repo_name.to_string(),
        })?;

        Ok(registration_from_row(&row))
    }

    /// Resolve a repository by name or UUID to `(repo_id, schema_name)`.
    ///
    /// # Errors
    ///
    /// Returns `RepoNotFound` if no registry row matches.
    pub async fn resolve_repo(&self, name_or_id: &str) -> StoreResult<(Uuid, String)> {
        let operation = StoreOperation::ResolveRepo {
            name_or_id: name_or_id.to_string(),
        };

        let row = if let Ok(id) = Uuid::try_parse(name_or_id) {
            sqlx::query(
                "SELECT repo_id, schema_name FROM robomonkey_control.repo_registry WHERE repo_id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_store_err(operation)?
        } else {
            sqlx::query(
                "SELECT repo_id, schema_name FROM robomonkey_control.repo_registry WHERE name = $1",
            )
            .bind(name_or_id)
            .fetch_optional(&self.pool)
            .await
            .map_store_err(operation)?
        };

        let row = row.ok_or_else(|| StoreError::RepoNotFound {
            name_or_id: name_or_id.to_string(),
        })?;

        Ok((row.get("repo_id"), row.get("schema_name")))
    }

    /// Acquire a session scoped to `schema_name`.
    ///
    /// The search path is set on the connection every time it is handed
    /// out, so stale state left on a pooled connection never leaks into a
    /// new scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted or the SET fails.
    pub async fn scoped(&self, schema_name: &str) -> StoreResult<ScopedSession> {
        let operation = StoreOperation::ScopeSession {
            schema_name: schema_name.to_string(),
        };

        if !is_valid_schema_name(schema_name) {
            return Err(StoreError::Invalid {
                what: "schema name".into(),
                value: schema_name.to_string(),
                reason: "must match [a-z][a-z0-9_]*".into(),
            });
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_store_err(operation.clone())?;

        // schema_name is validated against the identifier pattern above;
        // SET does not take bind parameters.
        sqlx::query(&format!("SET search_path TO \"{schema_name}\", public"))
            .execute(&mut *conn)
            .await
            .map_store_err(operation)?;

        Ok(ScopedSession {
            conn,
            schema_name: schema_name.to_string(),
        })
    }
}

pub(crate) fn registration_from_row(row: &sqlx::postgres::PgRow) -> RepoRegistration {
    RepoRegistration {
        name: row.get("name"),
        repo_id: row.get("repo_id"),
        schema_name: row.get("schema_name"),
        root_path: row.get("root_path"),
        enabled: row.get("enabled"),
        auto_index: row.get("auto_index"),
        auto_embed: row.get("auto_embed"),
        auto_watch: row.get("auto_watch"),
        config: row.get("config"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_seen: row.get("last_seen"),
    }
}
