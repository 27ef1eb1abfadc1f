//! Embedding error types

use thiserror::Error;

/// Errors raised by embedding providers and the service layer
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider returned a non-success status. 5xx is retryable, 4xx is not.
    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// Network-level failure; retryable
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed provider response; not retryable
    #[error("Malformed provider response: {0}")]
    Decode(String),

    /// Vector length does not match the configured dimension. This is a
    /// fatal configuration mismatch and must never be retried.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// Count mismatch between inputs and returned vectors; not retryable
    #[error("Provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

/// Specialized Result type for embedding operations
pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;

impl EmbeddingError {
    /// Whether a retry with backoff could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Decode(_) | Self::Dimension { .. } | Self::CountMismatch { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = EmbeddingError::Provider {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = EmbeddingError::Provider {
            status: 401,
            message: "bad key".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let err = EmbeddingError::Dimension {
            expected: 768,
            actual: 1024,
        };
        assert!(!err.is_retryable());
    }
}
