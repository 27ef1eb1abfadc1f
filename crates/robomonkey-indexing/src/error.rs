//! Indexing error types

use thiserror::Error;

/// Errors raised by the indexing pipeline and job handlers
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Store error: {0}")]
    Store(#[from] robomonkey_store::StoreError),

    #[error("Parse error: {0}")]
    Parse(#[from] robomonkey_parsing::ParseError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] robomonkey_embeddings::EmbeddingError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Embedding dimension changed: store has {stored}, config has {configured}")]
    DimensionMismatch { stored: i32, configured: i32 },

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Specialized Result type for indexing operations
pub type IndexResult<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Whether the worker should retry this job with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Embedding(e) => e.is_retryable(),
            Self::Io { .. } => true,
            Self::Parse(_) | Self::DimensionMismatch { .. } | Self::Payload(_) => false,
            // A cancelled job is re-claimable after the dead threshold
            Self::Cancelled => false,
        }
    }
}
