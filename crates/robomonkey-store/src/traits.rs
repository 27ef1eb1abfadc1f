//! Storage traits
//!
//! The worker pool and indexing pipeline depend on these traits rather
//! than on concrete Postgres types, so tests run against the in-memory
//! mocks in [`crate::mock`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{
    ChunkRecord, DocumentRecord, DocumentUpsert, EdgeIntent, EdgeRecord, EdgeType, EnqueueOutcome,
    EntityType, FileIndexSummary, FileRecord, FileState, IndexState, JobRecord, JobType, NewChunk,
    NewDocument, NewFile, NewJob, NewSymbol, SymbolRecord, TagRecord, TagRule, TagSource,
};

/// Durable job queue contract (control schema)
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job unless an equivalent one is already pending/claimed.
    async fn enqueue(&self, job: NewJob) -> StoreResult<EnqueueOutcome>;

    /// Atomically claim up to `limit` dispatchable jobs for `claimed_by`,
    /// restricted to `job_types` and skipping `excluded_repos` (repos at
    /// their concurrency cap). Increments `attempts` on each claimed row.
    async fn claim(
        &self,
        claimed_by: &str,
        job_types: &[JobType],
        excluded_repos: &[String],
        limit: i64,
    ) -> StoreResult<Vec<JobRecord>>;

    /// Mark a claimed job DONE. Fails if the job is not claimed by
    /// `claimed_by`.
    async fn complete(&self, job_id: Uuid, claimed_by: &str) -> StoreResult<()>;

    /// Mark a claimed job failed. Reschedules with exponential backoff
    /// while attempts remain, otherwise transitions to FAILED.
    async fn fail(
        &self,
        job_id: Uuid,
        claimed_by: &str,
        error: &str,
        error_detail: Option<serde_json::Value>,
    ) -> StoreResult<()>;

    /// Return CLAIMED jobs whose daemon heartbeat is older than
    /// `dead_threshold_sec` to PENDING. Attempts are preserved.
    async fn reap_dead(&self, dead_threshold_sec: u64) -> StoreResult<u64>;

    /// Delete DONE/FAILED jobs older than `retention_days`.
    async fn cleanup(&self, retention_days: u32) -> StoreResult<u64>;

    /// Jobs for one repository, newest first.
    async fn list_jobs(&self, repo_name: &str, limit: i64) -> StoreResult<Vec<JobRecord>>;

    /// (pending, claimed) counts per repository, for dispatch headroom.
    async fn claimed_counts_by_repo(&self) -> StoreResult<Vec<(String, i64)>>;
}

/// Per-repository data access, always scoped to one schema.
///
/// Implementations guarantee that every operation touches only the schema
/// the store was opened for.
#[async_trait]
pub trait RepoStore: Send + Sync {
    fn repo_id(&self) -> Uuid;
    fn schema_name(&self) -> &str;

    // -- files and the per-file index transaction ---------------------------

    /// Compare `content_sha` against the stored row for `relative_path`.
    async fn file_state(&self, relative_path: &str, content_sha: &str) -> StoreResult<FileState>;

    /// The per-file transactional upsert: replaces the file row and all of
    /// its symbols, chunks and edges in one transaction. Edge intents are
    /// resolved against the repository's symbols inside the transaction;
    /// unresolved or ambiguous intents are dropped.
    async fn apply_file_index(
        &self,
        file: NewFile,
        symbols: Vec<NewSymbol>,
        chunks: Vec<NewChunk>,
        edges: Vec<EdgeIntent>,
    ) -> StoreResult<FileIndexSummary>;

    /// Remove a file row (children cascade). Returns whether a row existed.
    async fn delete_file(&self, relative_path: &str) -> StoreResult<bool>;

    /// All indexed relative paths.
    async fn list_file_paths(&self) -> StoreResult<Vec<String>>;

    /// Delete files that are no longer present in the scan. Returns the
    /// number of rows removed.
    async fn delete_missing_files(&self, keep: &[String]) -> StoreResult<u64>;

    async fn file_by_path(&self, relative_path: &str) -> StoreResult<Option<FileRecord>>;
    async fn file_by_id(&self, id: Uuid) -> StoreResult<Option<FileRecord>>;

    /// All file rows, ordered by path (tag rules walk these).
    async fn list_files(&self) -> StoreResult<Vec<FileRecord>>;

    /// A page of chunks ordered by (file_id, start_line).
    async fn list_chunks(&self, limit: i64, offset: i64) -> StoreResult<Vec<ChunkRecord>>;

    /// A page of symbols ordered by fqn.
    async fn list_symbols(&self, limit: i64, offset: i64) -> StoreResult<Vec<SymbolRecord>>;

    async fn chunk_by_id(&self, id: Uuid) -> StoreResult<Option<ChunkRecord>>;

    // -- aggregate state ----------------------------------------------------

    async fn index_state(&self) -> StoreResult<IndexState>;

    /// Recompute aggregate counts from the tables and stamp
    /// `last_indexed_at`; records `last_error` (or clears it with None).
    async fn finish_index_pass(&self, last_error: Option<&str>) -> StoreResult<IndexState>;

    // -- embeddings ---------------------------------------------------------

    /// Chunks without an embedding row, oldest first.
    async fn unembedded_chunks(&self, limit: i64) -> StoreResult<Vec<ChunkRecord>>;

    async fn insert_chunk_embeddings(&self, rows: Vec<(Uuid, Vec<f32>)>) -> StoreResult<u64>;

    /// Documents without an embedding row.
    async fn unembedded_documents(&self, limit: i64) -> StoreResult<Vec<DocumentRecord>>;

    async fn insert_document_embeddings(&self, rows: Vec<(Uuid, Vec<f32>)>) -> StoreResult<u64>;

    /// Record the dimension vectors are written with. Returns the
    /// previously recorded dimension, if any; callers treat a mismatch as
    /// a fatal configuration error.
    async fn record_embedding_dimension(&self, dimension: i32) -> StoreResult<Option<i32>>;

    /// (chunk embeddings, document embeddings)
    async fn embedding_counts(&self) -> StoreResult<(i64, i64)>;

    // -- documents ----------------------------------------------------------

    /// Insert or replace a document; unchanged content hash short-circuits
    /// so the existing embedding survives.
    async fn upsert_document(&self, doc: NewDocument) -> StoreResult<DocumentUpsert>;

    // -- symbols and the call graph -----------------------------------------

    async fn symbol_by_fqn(&self, fqn: &str) -> StoreResult<Option<SymbolRecord>>;
    async fn symbol_by_id(&self, id: Uuid) -> StoreResult<Option<SymbolRecord>>;
    async fn symbols_by_name(&self, name: &str) -> StoreResult<Vec<SymbolRecord>>;

    /// Edges with `symbol_id` as source, of one type.
    async fn edges_from(&self, symbol_id: Uuid, edge_type: EdgeType) -> StoreResult<Vec<EdgeRecord>>;

    /// Edges with `symbol_id` as destination, of one type.
    async fn edges_to(&self, symbol_id: Uuid, edge_type: EdgeType) -> StoreResult<Vec<EdgeRecord>>;

    async fn chunks_for_symbol(&self, symbol_id: Uuid) -> StoreResult<Vec<ChunkRecord>>;

    /// The file-header chunk (symbol_id IS NULL) for a file.
    async fn header_chunk(&self, file_id: Uuid) -> StoreResult<Option<ChunkRecord>>;

    // -- tags ---------------------------------------------------------------

    async fn list_tags(&self) -> StoreResult<Vec<TagRecord>>;

    /// Case-normalizing upsert of a tag definition.
    async fn ensure_tag(&self, name: &str, description: Option<&str>) -> StoreResult<TagRecord>;

    async fn tag_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        tag_name: &str,
        source: TagSource,
        confidence: f64,
    ) -> StoreResult<()>;

    async fn tag_rules(&self) -> StoreResult<Vec<TagRule>>;

    async fn tags_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> StoreResult<Vec<String>>;
}
