//! Domain models for database entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered repository as stored in the control schema
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RepoRegistration {
    pub name: String,
    pub repo_id: Uuid,
    pub schema_name: String,
    pub root_path: String,
    pub enabled: bool,
    pub auto_index: bool,
    pub auto_embed: bool,
    pub auto_watch: bool,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Aggregate indexing state, one row per repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexState {
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub last_scan_marker: Option<String>,
    pub file_count: i64,
    pub symbol_count: i64,
    pub chunk_count: i64,
    pub edge_count: i64,
    pub embedding_dimension: Option<i32>,
    pub last_error: Option<String>,
}

/// An indexed file row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub relative_path: String,
    pub language: String,
    pub content_sha: String,
    pub mtime: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
}

/// Symbol kind as extracted by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
        };
        write!(f, "{kind}")
    }
}

impl std::str::FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "interface" => Ok(Self::Interface),
            _ => Err(format!("Invalid symbol kind: {s}")),
        }
    }
}

/// A stored symbol definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub file_id: Uuid,
    pub fqn: String,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub start_line: i32,
    pub end_line: i32,
    pub content_hash: String,
}

/// Directed relation type between symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    Calls,
    Imports,
    Inherits,
    Implements,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Calls => "CALLS",
            Self::Imports => "IMPORTS",
            Self::Inherits => "INHERITS",
            Self::Implements => "IMPLEMENTS",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CALLS" => Ok(Self::Calls),
            "IMPORTS" => Ok(Self::Imports),
            "INHERITS" => Ok(Self::Inherits),
            "IMPLEMENTS" => Ok(Self::Implements),
            _ => Err(format!("Invalid edge type: {s}")),
        }
    }
}

/// A stored edge with evidence location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: Uuid,
    pub src_symbol_id: Uuid,
    pub dst_symbol_id: Uuid,
    pub edge_type: EdgeType,
    pub evidence_file_id: Option<Uuid>,
    pub evidence_start_line: Option<i32>,
    pub evidence_end_line: Option<i32>,
    pub confidence: f64,
}

/// A stored chunk of source text, the unit of embedding and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub file_id: Uuid,
    pub symbol_id: Option<Uuid>,
    pub start_line: i32,
    pub end_line: i32,
    pub content: String,
    pub content_hash: String,
}

/// Document category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    DocFile,
    GeneratedSummary,
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DocFile => "DOC_FILE",
            Self::GeneratedSummary => "GENERATED_SUMMARY",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOC_FILE" => Ok(Self::DocFile),
            "GENERATED_SUMMARY" => Ok(Self::GeneratedSummary),
            _ => Err(format!("Invalid document type: {s}")),
        }
    }
}

/// Where a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocSource {
    Human,
    Generated,
}

impl std::fmt::Display for DocSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Human => "HUMAN",
            Self::Generated => "GENERATED",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for DocSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HUMAN" => Ok(Self::Human),
            "GENERATED" => Ok(Self::Generated),
            _ => Err(format!("Invalid document source: {s}")),
        }
    }
}

/// A stored documentation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub doc_type: DocType,
    pub source: DocSource,
    pub relative_path: Option<String>,
    pub title: String,
    pub content: String,
    pub content_hash: String,
}

/// Which kind of entity a tag or search result refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Chunk,
    Document,
    Symbol,
    File,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Chunk => "chunk",
            Self::Document => "document",
            Self::Symbol => "symbol",
            Self::File => "file",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chunk" => Ok(Self::Chunk),
            "document" => Ok(Self::Document),
            "symbol" => Ok(Self::Symbol),
            "file" => Ok(Self::File),
            _ => Err(format!("Invalid entity type: {s}")),
        }
    }
}

/// How an entity tag was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagSource {
    RuleBased,
    SemanticMatch,
    LlmSuggestion,
    Manual,
}

impl std::fmt::Display for TagSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RuleBased => "RULE_BASED",
            Self::SemanticMatch => "SEMANTIC_MATCH",
            Self::LlmSuggestion => "LLM_SUGGESTION",
            Self::Manual => "MANUAL",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TagSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RULE_BASED" => Ok(Self::RuleBased),
            "SEMANTIC_MATCH" => Ok(Self::SemanticMatch),
            "LLM_SUGGESTION" => Ok(Self::LlmSuggestion),
            "MANUAL" => Ok(Self::Manual),
            _ => Err(format!("Invalid tag source: {s}")),
        }
    }
}

/// A tag definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// What a tag rule matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagMatchType {
    Path,
    Import,
    Regex,
    Symbol,
}

impl std::fmt::Display for TagMatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Path => "PATH",
            Self::Import => "IMPORT",
            Self::Regex => "REGEX",
            Self::Symbol => "SYMBOL",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TagMatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PATH" => Ok(Self::Path),
            "IMPORT" => Ok(Self::Import),
            "REGEX" => Ok(Self::Regex),
            "SYMBOL" => Ok(Self::Symbol),
            _ => Err(format!("Invalid tag match type: {s}")),
        }
    }
}

/// A rule that assigns a tag automatically
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRule {
    pub id: Uuid,
    pub tag_id: Uuid,
    pub tag_name: String,
    pub match_type: TagMatchType,
    pub pattern: String,
    pub weight: f64,
}

/// Durable job categories drained by the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    FullIndex,
    ReindexFile,
    ReindexMany,
    EmbedMissing,
    EmbedChunk,
    DocsScan,
    SummarizeMissing,
    TagRulesSync,
}

impl JobType {
    /// All job types, in dispatch-registry order
    pub const ALL: [Self; 8] = [
        Self::FullIndex,
        Self::ReindexFile,
        Self::ReindexMany,
        Self::EmbedMissing,
        Self::EmbedChunk,
        Self::DocsScan,
        Self::SummarizeMissing,
        Self::TagRulesSync,
    ];
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FullIndex => "FULL_INDEX",
            Self::ReindexFile => "REINDEX_FILE",
            Self::ReindexMany => "REINDEX_MANY",
            Self::EmbedMissing => "EMBED_MISSING",
            Self::EmbedChunk => "EMBED_CHUNK",
            Self::DocsScan => "DOCS_SCAN",
            Self::SummarizeMissing => "SUMMARIZE_MISSING",
            Self::TagRulesSync => "TAG_RULES_SYNC",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULL_INDEX" => Ok(Self::FullIndex),
            "REINDEX_FILE" => Ok(Self::ReindexFile),
            "REINDEX_MANY" => Ok(Self::ReindexMany),
            "EMBED_MISSING" => Ok(Self::EmbedMissing),
            "EMBED_CHUNK" => Ok(Self::EmbedChunk),
            "DOCS_SCAN" => Ok(Self::DocsScan),
            "SUMMARIZE_MISSING" => Ok(Self::SummarizeMissing),
            "TAG_RULES_SYNC" => Ok(Self::TagRulesSync),
            _ => Err(format!("Invalid job type: {s}")),
        }
    }
}

/// Lifecycle state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Claimed,
    Done,
    Failed,
    Retry,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Retry => "RETRY",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CLAIMED" => Ok(Self::Claimed),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            "RETRY" => Ok(Self::Retry),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// A row in the durable job queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub repo_name: String,
    pub schema_name: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_detail: Option<serde_json::Value>,
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an enqueue attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnqueueOutcome {
    /// A new job row was created
    Enqueued { job_id: Uuid },
    /// An equivalent job is already pending or claimed; nothing was inserted
    Deduplicated,
}

/// State of a file when checking whether re-indexing is needed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    /// File content hasn't changed, skip indexing
    Unchanged { file_id: Uuid },
    /// File is being indexed for the first time
    New,
    /// File content has changed and needs re-indexing
    Updated { file_id: Uuid },
}

/// Write-side input for a file row
#[derive(Debug, Clone)]
pub struct NewFile {
    pub relative_path: String,
    pub language: String,
    pub content_sha: String,
    pub mtime: Option<DateTime<Utc>>,
}

/// Write-side input for a symbol row; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewSymbol {
    pub fqn: String,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub start_line: i32,
    pub end_line: i32,
    pub content_hash: String,
}

/// Write-side input for a chunk row.
///
/// `symbol_fqn` is resolved to the owning symbol inside the per-file
/// transaction; `None` marks the file-header chunk.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub symbol_fqn: Option<String>,
    pub start_line: i32,
    pub end_line: i32,
    pub content: String,
    pub content_hash: String,
}

/// A name-based edge intent awaiting local resolution.
///
/// The destination is a simple name; the store resolves it against the
/// repository's symbols inside the per-file transaction and drops the
/// intent unless exactly one candidate matches.
#[derive(Debug, Clone)]
pub struct EdgeIntent {
    pub src_fqn: String,
    pub dst_name: String,
    pub edge_type: EdgeType,
    pub evidence_start_line: i32,
    pub evidence_end_line: i32,
}

/// Summary returned after a per-file index transaction commits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexSummary {
    pub symbols: usize,
    pub chunks: usize,
    pub edges: usize,
    pub edges_dropped: usize,
}

/// Write-side input for a document row
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub doc_type: DocType,
    pub source: DocSource,
    pub relative_path: Option<String>,
    pub title: String,
    pub content: String,
    pub content_hash: String,
}

/// Outcome of a document upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentUpsert {
    /// Content hash matched the stored row; nothing written
    Unchanged,
    /// Row inserted or replaced; any prior embedding is gone
    Written { document_id: Uuid },
}

/// Write-side input for a job row
#[derive(Debug, Clone)]
pub struct NewJob {
    pub repo_name: String,
    pub schema_name: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_attempts: i32,
    pub dedup_key: Option<String>,
    pub run_after: Option<DateTime<Utc>>,
}

impl NewJob {
    /// A job with default priority and retry budget
    pub fn new(repo_name: &str, schema_name: &str, job_type: JobType) -> Self {
        Self {
            repo_name: repo_name.to_string(),
            schema_name: schema_name.to_string(),
            job_type,
            payload: serde_json::json!({}),
            priority: 0,
            max_attempts: 5,
            dedup_key: None,
            run_after: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Daemon liveness row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonInstance {
    pub instance_id: String,
    pub hostname: String,
    pub pid: i32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_roundtrip() {
        for job_type in JobType::ALL {
            let parsed: JobType = job_type.to_string().parse().unwrap();
            assert_eq!(parsed, job_type);
        }
    }

    #[test]
    fn test_job_status_rejects_unknown() {
        assert!("RUNNING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_entity_type_order_is_total() {
        // The cross-type tiebreak in search relies on this ordering
        assert!(EntityType::Chunk < EntityType::Document);
        assert!(EntityType::Document < EntityType::Symbol);
        assert!(EntityType::Symbol < EntityType::File);
    }

    #[test]
    fn test_edge_type_roundtrip() {
        for edge in [
            EdgeType::Calls,
            EdgeType::Imports,
            EdgeType::Inherits,
            EdgeType::Implements,
        ] {
            let parsed: EdgeType = edge.to_string().parse().unwrap();
            assert_eq!(parsed, edge);
        }
    }
}
