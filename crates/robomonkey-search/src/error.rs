//! Search error types

use thiserror::Error;

/// Errors raised by retrieval and graph expansion
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Store error: {0}")]
    Store(#[from] robomonkey_store::StoreError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] robomonkey_embeddings::EmbeddingError),

    #[error("Symbol not found: {key}")]
    SymbolNotFound { key: String },

    #[error("Invalid search input: {0}")]
    Invalid(String),
}

/// Specialized Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;
