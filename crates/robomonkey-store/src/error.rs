//! Operation-tagged error types for the storage layer
//!
//! Every database call is tagged with the [`StoreOperation`] it was
//! performing so failures carry enough context to be actionable without
//! stringly-typed breadcrumbs at every call site.

use thiserror::Error;

/// What the storage layer was doing when an error occurred
#[derive(Debug, Clone)]
pub enum StoreOperation {
    RunMigrations,
    CreateSchema {
        schema_name: String,
    },
    DropSchema {
        schema_name: String,
    },
    ResolveRepo {
        name_or_id: String,
    },
    RegisterRepo {
        repo_name: String,
    },
    ScopeSession {
        schema_name: String,
    },
    EnqueueJob {
        repo_name: String,
        job_type: String,
    },
    ClaimJobs {
        claimed_by: String,
    },
    CompleteJob {
        job_id: uuid::Uuid,
    },
    FailJob {
        job_id: uuid::Uuid,
    },
    ReapDeadJobs,
    CleanupJobs,
    Heartbeat {
        instance_id: String,
    },
    IndexFile {
        relative_path: String,
    },
    DeleteMissingFiles,
    UpdateIndexState,
    FetchUnembedded {
        entity: String,
    },
    InsertEmbeddings {
        entity: String,
        count: usize,
    },
    UpsertDocument {
        relative_path: String,
    },
    LookupSymbol {
        key: String,
    },
    FetchEdges {
        symbol_id: uuid::Uuid,
    },
    FetchChunks {
        key: String,
    },
    TagWrite {
        tag: String,
    },
    Query {
        description: String,
    },
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunMigrations => write!(f, "run_migrations"),
            Self::CreateSchema { schema_name } => write!(f, "create_schema({schema_name})"),
            Self::DropSchema { schema_name } => write!(f, "drop_schema({schema_name})"),
            Self::ResolveRepo { name_or_id } => write!(f, "resolve_repo({name_or_id})"),
            Self::RegisterRepo { repo_name } => write!(f, "register_repo({repo_name})"),
            Self::ScopeSession { schema_name } => write!(f, "scope_session({schema_name})"),
            Self::EnqueueJob {
                repo_name,
                job_type,
            } => write!(f, "enqueue_job({repo_name}, {job_type})"),
            Self::ClaimJobs { claimed_by } => write!(f, "claim_jobs({claimed_by})"),
            Self::CompleteJob { job_id } => write!(f, "complete_job({job_id})"),
            Self::FailJob { job_id } => write!(f, "fail_job({job_id})"),
            Self::ReapDeadJobs => write!(f, "reap_dead_jobs"),
            Self::CleanupJobs => write!(f, "cleanup_jobs"),
            Self::Heartbeat { instance_id } => write!(f, "heartbeat({instance_id})"),
            Self::IndexFile { relative_path } => write!(f, "index_file({relative_path})"),
            Self::DeleteMissingFiles => write!(f, "delete_missing_files"),
            Self::UpdateIndexState => write!(f, "update_index_state"),
            Self::FetchUnembedded { entity } => write!(f, "fetch_unembedded({entity})"),
            Self::InsertEmbeddings { entity, count } => {
                write!(f, "insert_embeddings({entity}, {count})")
            }
            Self::UpsertDocument { relative_path } => {
                write!(f, "upsert_document({relative_path})")
            }
            Self::LookupSymbol { key } => write!(f, "lookup_symbol({key})"),
            Self::FetchEdges { symbol_id } => write!(f, "fetch_edges({symbol_id})"),
            Self::FetchChunks { key } => write!(f, "fetch_chunks({key})"),
            Self::TagWrite { tag } => write!(f, "tag_write({tag})"),
            Self::Query { description } => write!(f, "query({description})"),
        }
    }
}

/// Errors raised by the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Repository not found: {name_or_id}")]
    RepoNotFound { name_or_id: String },

    #[error("Schema already exists: {schema_name}")]
    SchemaExists { schema_name: String },

    #[error(
        "Schema name conflict: {schema_name} is registered for {existing_root}, not {requested_root}"
    )]
    SchemaNameConflict {
        schema_name: String,
        existing_root: String,
        requested_root: String,
    },

    #[error("Entity not found: {entity} {key}")]
    NotFound { entity: String, key: String },

    #[error("Invalid {what}: {value} ({reason})")]
    Invalid {
        what: String,
        value: String,
        reason: String,
    },

    #[error("Database error during {operation}: {source}")]
    Database {
        operation: Box<StoreOperation>,
        #[source]
        source: sqlx::Error,
    },
}

/// Specialized Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Whether retrying the operation could succeed (connection-level
    /// failures) as opposed to data-level failures that will repeat.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database { source, .. } => matches!(
                source,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// Extension trait tagging sqlx errors with the operation that hit them
pub trait StoreErrorExt<T> {
    fn map_store_err(self, operation: StoreOperation) -> StoreResult<T>;
}

impl<T> StoreErrorExt<T> for std::result::Result<T, sqlx::Error> {
    fn map_store_err(self, operation: StoreOperation) -> StoreResult<T> {
        self.map_err(|source| StoreError::Database {
            operation: Box::new(operation),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_display() {
        let op = StoreOperation::EnqueueJob {
            repo_name: "demo".into(),
            job_type: "FULL_INDEX".into(),
        };
        assert_eq!(op.to_string(), "enqueue_job(demo, FULL_INDEX)");
    }

    #[test]
    fn test_map_store_err_tags_operation() {
        let result: Result<(), sqlx::Error> = Err(sqlx::Error::PoolClosed);
        let err = result
            .map_store_err(StoreOperation::ReapDeadJobs)
            .unwrap_err();
        assert!(err.to_string().contains("reap_dead_jobs"));
        assert!(err.is_transient());
    }
}
