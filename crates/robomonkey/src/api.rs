//! Control API
//!
//! The typed operations the RPC server exposes. Every repo-scoped
//! response carries `schema_name` for debuggability, and every error
//! surfaces as a structured `{kind, why}` pair.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use robomonkey_config::ApplicationConfig;
use robomonkey_embeddings::EmbeddingService;
use robomonkey_search::{
    Direction, GraphExpander, HybridRetriever, PgCandidateSource, SearchError, SearchFilters,
};
use robomonkey_store::{
    DaemonRegistry, EnqueueOutcome, EntityType, JobQueue, JobType, NewJob, PgRepoStore,
    RepoRegistry, RepoStore, SchemaManager, StoreError, TagSource,
};

/// API error kinds, mirroring the failure taxonomy callers see
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    SchemaConflict(String),

    #[error("{0}")]
    TransientIo(String),

    #[error("{0}")]
    PermanentIo(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::SchemaConflict(_) => "SchemaConflict",
            Self::TransientIo(_) => "TransientIO",
            Self::PermanentIo(_) => "PermanentIO",
            Self::BadRequest(_) => "BadRequest",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::RepoNotFound { .. } | StoreError::NotFound { .. } => {
                Self::NotFound(e.to_string())
            }
            StoreError::SchemaExists { .. } | StoreError::SchemaNameConflict { .. } => {
                Self::SchemaConflict(e.to_string())
            }
            _ if e.is_transient() => Self::TransientIo(e.to_string()),
            _ => Self::PermanentIo(e.to_string()),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::SymbolNotFound { .. } => Self::NotFound(e.to_string()),
            SearchError::Store(inner) => inner.into(),
            SearchError::Invalid(message) => Self::BadRequest(message),
            SearchError::Embedding(inner) => {
                if inner.is_retryable() {
                    Self::TransientIo(inner.to_string())
                } else {
                    Self::PermanentIo(inner.to_string())
                }
            }
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Typed operation inputs, validated at the boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RepoParams {
    pub repo: String,
}

#[derive(Debug, Deserialize)]
pub struct HybridSearchParams {
    pub repo: String,
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolParams {
    pub repo: String,
    /// FQN or symbol UUID
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct SymbolContextParams {
    pub repo: String,
    pub symbol: String,
    #[serde(default)]
    pub depth: Option<usize>,
    #[serde(default)]
    pub budget: Option<usize>,
    #[serde(default = "default_true")]
    pub callers: bool,
    #[serde(default = "default_true")]
    pub callees: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct DocSearchParams {
    pub repo: String,
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TagEntityParams {
    pub repo: String,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub tag: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ReindexFileParams {
    pub repo: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ReindexManyParams {
    pub repo: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterParams {
    pub name: String,
    pub root_path: String,
    #[serde(default)]
    pub force: bool,
}

/// Shape of a queue write acknowledgement
#[derive(Debug, Serialize)]
struct EnqueueAck {
    schema_name: String,
    enqueued: bool,
    deduplicated: bool,
    job_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// The API itself
// ---------------------------------------------------------------------------

/// Read/write operations consumed by the RPC server and CLI
pub struct ControlApi {
    pub config: ApplicationConfig,
    pub schemas: SchemaManager,
    pub registry: RepoRegistry,
    pub queue: Arc<dyn JobQueue>,
    pub embeddings: Arc<EmbeddingService>,
    pub daemons: DaemonRegistry,
}

impl ControlApi {
    async fn open_store(&self, repo: &str) -> ApiResult<PgRepoStore> {
        Ok(PgRepoStore::open(&self.schemas, repo).await?)
    }

    async fn resolve_symbol(
        &self,
        store: &PgRepoStore,
        key: &str,
    ) -> ApiResult<robomonkey_store::SymbolRecord> {
        let symbol = if let Ok(id) = Uuid::try_parse(key) {
            store.symbol_by_id(id).await?
        } else {
            store.symbol_by_fqn(key).await?
        };
        symbol.ok_or_else(|| ApiError::NotFound(format!("Symbol not found: {key}")))
    }

    fn expander(&self, store: PgRepoStore, budget: Option<usize>) -> GraphExpander {
        GraphExpander::new(
            Arc::new(store),
            budget.unwrap_or(self.config.search.context_budget_tokens),
        )
    }

    pub async fn ping(&self) -> ApiResult<Value> {
        Ok(json!({ "ok": true, "service": "robomonkey" }))
    }

    pub async fn list_repos(&self) -> ApiResult<Value> {
        let repos = self.registry.list().await?;
        Ok(json!({ "repos": repos }))
    }

    pub async fn register_repo(&self, params: RegisterParams) -> ApiResult<Value> {
        let registration = self
            .schemas
            .register(&params.name, &params.root_path, params.force)
            .await?;
        Ok(json!({
            "schema_name": registration.schema_name,
            "repo_id": registration.repo_id,
            "name": registration.name,
        }))
    }

    pub async fn index_status(&self, params: RepoParams) -> ApiResult<Value> {
        let store = self.open_store(&params.repo).await?;
        let state = store.index_state().await?;
        let (chunk_embeddings, document_embeddings) = store.embedding_counts().await?;

        // A recorded dimension differing from the configured one blocks
        // embedding but not search; surface it as a warning
        let mut warnings = Vec::new();
        if let Some(stored) = state.embedding_dimension
            && stored != self.config.embeddings.dimension as i32
        {
            warnings.push(format!(
                "embedding dimension mismatch: store has {stored}, config has {}",
                self.config.embeddings.dimension
            ));
        }

        let jobs = self.queue.list_jobs(&params.repo, 20).await?;

        Ok(json!({
            "schema_name": store.schema_name(),
            "state": state,
            "chunk_embeddings": chunk_embeddings,
            "document_embeddings": document_embeddings,
            "recent_jobs": jobs,
            "warnings": warnings,
        }))
    }

    pub async fn hybrid_search(&self, params: HybridSearchParams) -> ApiResult<Value> {
        if params.query.trim().is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".into()));
        }

        let (_, schema_name) = self.schemas.resolve_repo(&params.repo).await?;
        let source = PgCandidateSource::new(self.schemas.clone(), schema_name.clone());
        let retriever = HybridRetriever::new(
            Arc::new(source),
            self.embeddings.clone(),
            self.config.search.clone(),
        );

        let hits = retriever
            .search(&params.query, &params.filters, params.top_k)
            .await?;

        Ok(json!({ "schema_name": schema_name, "results": hits }))
    }

    pub async fn doc_search(&self, params: DocSearchParams) -> ApiResult<Value> {
        let filters = SearchFilters {
            entity_types: vec![EntityType::Document],
            ..SearchFilters::default()
        };
        self.hybrid_search(HybridSearchParams {
            repo: params.repo,
            query: params.query,
            filters,
            top_k: params.top_k,
        })
        .await
    }

    pub async fn symbol_lookup(&self, params: SymbolParams) -> ApiResult<Value> {
        let store = self.open_store(&params.repo).await?;
        let symbol = self.resolve_symbol(&store, &params.symbol).await?;
        let chunks = store.chunks_for_symbol(symbol.id).await?;
        let file = store.file_by_id(symbol.file_id).await?;

        Ok(json!({
            "schema_name": store.schema_name(),
            "symbol": symbol,
            "file_path": file.map(|f| f.relative_path),
            "chunks": chunks.len(),
        }))
    }

    pub async fn symbol_context(&self, params: SymbolContextParams) -> ApiResult<Value> {
        let store = self.open_store(&params.repo).await?;
        let schema_name = store.schema_name().to_string();
        let symbol = self.resolve_symbol(&store, &params.symbol).await?;

        let expander = self.expander(store, params.budget);
        let pack = expander
            .expand(
                symbol.id,
                params.depth.unwrap_or(self.config.search.graph_depth),
                Direction {
                    callers: params.callers,
                    callees: params.callees,
                },
            )
            .await?;

        Ok(json!({ "schema_name": schema_name, "context": pack }))
    }

    pub async fn callers(&self, params: SymbolParams) -> ApiResult<Value> {
        let store = self.open_store(&params.repo).await?;
        let schema_name = store.schema_name().to_string();
        let symbol = self.resolve_symbol(&store, &params.symbol).await?;

        let expander = self.expander(store, None);
        let callers = expander.callers(symbol.id).await?;
        Ok(json!({ "schema_name": schema_name, "symbols": callers }))
    }

    pub async fn callees(&self, params: SymbolParams) -> ApiResult<Value> {
        let store = self.open_store(&params.repo).await?;
        let schema_name = store.schema_name().to_string();
        let symbol = self.resolve_symbol(&store, &params.symbol).await?;

        let expander = self.expander(store, None);
        let callees = expander.callees(symbol.id).await?;
        Ok(json!({ "schema_name": schema_name, "symbols": callees }))
    }

    pub async fn list_tags(&self, params: RepoParams) -> ApiResult<Value> {
        let store = self.open_store(&params.repo).await?;
        let tags = store.list_tags().await?;
        Ok(json!({ "schema_name": store.schema_name(), "tags": tags }))
    }

    pub async fn tag_entity(&self, params: TagEntityParams) -> ApiResult<Value> {
        let store = self.open_store(&params.repo).await?;

        let source = match params.source.as_deref() {
            None => TagSource::Manual,
            Some(s) => s
                .parse()
                .map_err(|e: String| ApiError::BadRequest(e))?,
        };
        let confidence = params.confidence.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ApiError::BadRequest(
                "confidence must be within [0, 1]".into(),
            ));
        }

        store
            .tag_entity(
                params.entity_type,
                params.entity_id,
                &params.tag,
                source,
                confidence,
            )
            .await?;

        Ok(json!({ "schema_name": store.schema_name(), "tagged": true }))
    }

    pub async fn enqueue_full_index(&self, params: RepoParams) -> ApiResult<Value> {
        let (_, schema_name) = self.schemas.resolve_repo(&params.repo).await?;
        let job = NewJob::new(&params.repo, &schema_name, JobType::FullIndex)
            .with_dedup_key("full-index");
        self.ack(schema_name, self.queue.enqueue(job).await?)
    }

    pub async fn enqueue_reindex_file(&self, params: ReindexFileParams) -> ApiResult<Value> {
        let (_, schema_name) = self.schemas.resolve_repo(&params.repo).await?;
        // dedup_key = path keeps a watcher's repeats collapsed to one job
        let job = NewJob::new(&params.repo, &schema_name, JobType::ReindexFile)
            .with_payload(json!({ "path": params.path }))
            .with_dedup_key(&params.path);
        self.ack(schema_name, self.queue.enqueue(job).await?)
    }

    pub async fn enqueue_reindex_many(&self, params: ReindexManyParams) -> ApiResult<Value> {
        if params.paths.is_empty() {
            return Err(ApiError::BadRequest("paths must not be empty".into()));
        }
        let (_, schema_name) = self.schemas.resolve_repo(&params.repo).await?;

        let mut dedup_paths = params.paths.clone();
        dedup_paths.sort();
        let job = NewJob::new(&params.repo, &schema_name, JobType::ReindexMany)
            .with_payload(json!({ "paths": params.paths }))
            .with_dedup_key(dedup_paths.join("\n"));
        self.ack(schema_name, self.queue.enqueue(job).await?)
    }

    pub async fn daemon_status(&self) -> ApiResult<Value> {
        let instances = self.daemons.list().await?;
        let claimed = self.queue.claimed_counts_by_repo().await?;
        Ok(json!({ "instances": instances, "claimed_by_repo": claimed }))
    }

    fn ack(&self, schema_name: String, outcome: EnqueueOutcome) -> ApiResult<Value> {
        // Dedup is an acknowledgement, not an error: the caller's work is
        // already queued
        let ack = match outcome {
            EnqueueOutcome::Enqueued { job_id } => EnqueueAck {
                schema_name,
                enqueued: true,
                deduplicated: false,
                job_id: Some(job_id),
            },
            EnqueueOutcome::Deduplicated => EnqueueAck {
                schema_name,
                enqueued: false,
                deduplicated: true,
                job_id: None,
            },
        };
        Ok(serde_json::to_value(ack).unwrap_or_default())
    }
}
