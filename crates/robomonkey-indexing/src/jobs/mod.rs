//! Control plane: job handlers and the worker pool

pub mod handlers;
pub mod worker;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{IndexError, IndexResult};
use robomonkey_config::ApplicationConfig;
use robomonkey_embeddings::EmbeddingService;
use robomonkey_parsing::SourceParser;
use robomonkey_store::{JobQueue, PgRepoStore, RepoRegistry, RepoStore, SchemaManager};

pub use handlers::handle_job;
pub use worker::WorkerPool;

/// A repository opened for job execution
pub struct OpenedRepo {
    pub store: Arc<dyn RepoStore>,
    pub root_path: PathBuf,
    pub auto_embed: bool,
}

/// Resolves a repository name to its store and filesystem root
#[async_trait]
pub trait RepoResolver: Send + Sync {
    async fn open(&self, repo_name: &str) -> IndexResult<OpenedRepo>;
}

/// Production resolver over the registry and schema manager
pub struct PgRepoResolver {
    schemas: SchemaManager,
    registry: RepoRegistry,
}

impl PgRepoResolver {
    pub fn new(schemas: SchemaManager, registry: RepoRegistry) -> Self {
        Self { schemas, registry }
    }
}

#[async_trait]
impl RepoResolver for PgRepoResolver {
    async fn open(&self, repo_name: &str) -> IndexResult<OpenedRepo> {
        let registration = self
            .registry
            .get(repo_name)
            .await?
            .ok_or_else(|| robomonkey_store::StoreError::RepoNotFound {
                name_or_id: repo_name.to_string(),
            })?;

        let store = PgRepoStore::open(&self.schemas, repo_name).await?;

        Ok(OpenedRepo {
            store: Arc::new(store),
            root_path: PathBuf::from(registration.root_path),
            auto_embed: registration.auto_embed,
        })
    }
}

/// Everything a job handler needs
pub struct JobContext {
    pub config: ApplicationConfig,
    pub resolver: Arc<dyn RepoResolver>,
    pub queue: Arc<dyn JobQueue>,
    pub embeddings: Arc<EmbeddingService>,
    pub parser: Arc<dyn SourceParser>,
}

impl JobContext {
    pub(crate) fn chunker(&self) -> crate::chunker::Chunker {
        crate::chunker::Chunker::new(
            self.config.indexing.max_chunk_chars,
            self.config.indexing.chunk_overlap_chars,
        )
    }
}

/// Short message + structured detail for the queue's error columns
pub(crate) fn error_detail(e: &IndexError) -> serde_json::Value {
    serde_json::json!({
        "error": e.to_string(),
        "transient": e.is_transient(),
    })
}
