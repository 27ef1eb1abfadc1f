//! Embedding service: batching, truncation, retries, dimension safety
//!
//! The service is what the rest of the system talks to. It never hands a
//! caller a vector of the wrong length: providers verify per response, and
//! the service re-checks before returning.

use std::sync::Arc;

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::retry::with_backoff;
use crate::traits::EmbeddingProvider;
use robomonkey_config::EmbeddingsConfig;

/// Truncate to a character budget on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// High-level embedding service over a provider
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_embedding_chars: usize,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingsConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            max_embedding_chars: config.max_embedding_chars,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Embed a single query string.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider fails after retries or returns a
    /// vector of the wrong dimension.
    pub async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
        let mut vectors = self.embed_texts(&[query]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Embed a list of texts, truncating each input and splitting into
    /// provider-sized batches. Vectors come back in input order.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider fails after retries, the count
    /// does not match, or any vector has the wrong dimension.
    pub async fn embed_texts(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<&str> = texts
            .iter()
            .map(|t| truncate_chars(t, self.max_embedding_chars))
            .collect();

        let mut all = Vec::with_capacity(truncated.len());
        for batch in truncated.chunks(self.batch_size) {
            let vectors = with_backoff("embed_batch", || async {
                self.provider.embed_batch(batch).await
            })
            .await?;

            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            for vector in &vectors {
                if vector.len() != self.provider.dimensions() {
                    return Err(EmbeddingError::Dimension {
                        expected: self.provider.dimensions(),
                        actual: vector.len(),
                    });
                }
            }
            all.extend(vectors);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use robomonkey_config::ApplicationConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        dimensions: usize,
        calls: AtomicUsize,
        max_batch_seen: AtomicUsize,
    }

    impl FixedProvider {
        fn new(dimensions: usize) -> Self {
            Self {
                dimensions,
                calls: AtomicUsize::new(0),
                max_batch_seen: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn model_id(&self) -> &str {
            "fixed-model"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.max_batch_seen.fetch_max(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dimensions];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }
    }

    fn service_with(provider: Arc<FixedProvider>, batch_size: usize) -> EmbeddingService {
        let mut config = ApplicationConfig::default().embeddings;
        config.batch_size = batch_size;
        config.dimension = provider.dimensions();
        EmbeddingService::new(provider, &config)
    }

    #[tokio::test]
    async fn test_batches_are_split_and_ordered() {
        let provider = Arc::new(FixedProvider::new(4));
        let service = service_with(Arc::clone(&provider), 2);

        let texts = vec!["a", "bb", "ccc", "dddd", "eeeee"];
        let vectors = service.embed_texts(&texts).await.unwrap();

        assert_eq!(vectors.len(), 5);
        // First component encodes input length: order preserved
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(provider.max_batch_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_inputs_truncated_before_embedding() {
        struct LenCheck(AtomicUsize);

        #[async_trait]
        impl EmbeddingProvider for LenCheck {
            fn name(&self) -> &str {
                "len-check"
            }
            fn model_id(&self) -> &str {
                "len"
            }
            fn dimensions(&self) -> usize {
                1
            }
            async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
                for t in texts {
                    self.0.fetch_max(t.chars().count(), Ordering::SeqCst);
                }
                Ok(texts.iter().map(|_| vec![0.0]).collect())
            }
        }

        let provider = Arc::new(LenCheck(AtomicUsize::new(0)));
        let mut config = ApplicationConfig::default().embeddings;
        config.max_embedding_chars = 10;
        config.dimension = 1;
        let service = EmbeddingService::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, &config);

        let long = "x".repeat(500);
        service.embed_texts(&[long.as_str()]).await.unwrap();
        assert_eq!(provider.0.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_fatal() {
        struct WrongDim;

        #[async_trait]
        impl EmbeddingProvider for WrongDim {
            fn name(&self) -> &str {
                "wrong"
            }
            fn model_id(&self) -> &str {
                "wrong"
            }
            fn dimensions(&self) -> usize {
                768
            }
            async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
            }
        }

        let mut config = ApplicationConfig::default().embeddings;
        config.dimension = 768;
        let service = EmbeddingService::new(Arc::new(WrongDim), &config);

        let result = service.embed_texts(&["hello"]).await;
        assert!(matches!(
            result,
            Err(EmbeddingError::Dimension {
                expected: 768,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let truncated = truncate_chars(text, 4);
        assert_eq!(truncated, "héll");
    }
}
