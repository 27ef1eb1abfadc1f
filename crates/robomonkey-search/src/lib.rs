//! Robomonkey search: hybrid retrieval and graph expansion
//!
//! Vector similarity, lexical full-text ranking and tag filtering fuse
//! into one explainable score; the graph expander packs callers/callees
//! context under a token budget.

pub mod candidates;
pub mod error;
pub mod fuse;
pub mod graph;
pub mod retriever;
pub mod types;

pub use candidates::{CandidateSource, PgCandidateSource};
pub use error::{SearchError, SearchResult};
pub use fuse::{FTS_WEIGHT, TAG_WEIGHT, VEC_WEIGHT};
pub use graph::{ContextChunk, ContextPack, Direction, GraphExpander};
pub use retriever::HybridRetriever;
pub use types::{Candidate, RawCandidate, SearchFilters, SearchHit};
