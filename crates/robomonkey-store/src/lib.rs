//! Robomonkey storage layer for `PostgreSQL` state management
//!
//! Holds the control schema (registry, job queue, daemon liveness) and the
//! per-repository schemas (files, symbols, chunks, edges, documents, tags,
//! embeddings), plus the schema manager that keeps them isolated.

// Module declarations
pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod repo_data;
pub mod schema;
pub mod traits;

pub mod mock;
pub use mock::{MockJobQueue, MockRepoStore};

// Public exports
pub use error::{StoreError, StoreErrorExt, StoreOperation, StoreResult};
pub use migrations::{apply_repo_schema, drop_repo_schema, run_migrations};
pub use models::*;
pub use pool::{create_pool, initialize_database};
pub use queue::{DaemonRegistry, PgJobQueue, retry_delay_secs};
pub use registry::RepoRegistry;
pub use repo_data::PgRepoStore;
pub use schema::{SchemaManager, ScopedSession, is_valid_schema_name, sanitize_schema_name};
pub use traits::{JobQueue, RepoStore};
