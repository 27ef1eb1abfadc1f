//! Embedding provider trait

use async_trait::async_trait;

use crate::error::EmbeddingResult;

/// A remote embedding provider: maps a batch of strings to fixed-dimension
/// dense vectors. Implementations return vectors in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs (e.g. "ollama")
    fn name(&self) -> &str;

    /// Model identifier passed to the provider
    fn model_id(&self) -> &str;

    /// Expected vector length
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts. One vector per input, in order.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;
}
