//! Robomonkey indexing pipeline
//!
//! Scanner -> parser -> per-file transactional indexer -> chunk storage,
//! with the embedding backfill, rule-based tagger, docs scan, and the
//! worker pool that drains the durable job queue.

pub mod chunker;
pub mod docs;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod jobs;
pub mod scanner;
pub mod tagger;

pub use chunker::{ChunkWindow, Chunker};
pub use docs::{DocsIndexer, DocsScanStats};
pub use embedder::{EmbedBackfill, EmbedStats};
pub use error::{IndexError, IndexResult};
pub use indexer::{FileOutcome, Indexer, RepoIndexStats};
pub use jobs::{JobContext, OpenedRepo, PgRepoResolver, RepoResolver, WorkerPool, handle_job};
pub use scanner::{ScannedDoc, ScannedFile, Scanner};
pub use tagger::{TagSyncStats, Tagger, glob_to_regex};
