//! Remote embedding provider implementations
//!
//! Both providers speak plain JSON over HTTP via reqwest. Response shape
//! and dimension are verified at the boundary; anything malformed is a
//! permanent (non-retryable) error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::traits::EmbeddingProvider;
use robomonkey_config::{EmbeddingsConfig, EmbeddingsProvider as ProviderKind};

/// Build the configured provider
pub fn provider_for(config: &EmbeddingsConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)),
        // vLLM serves the OpenAI-compatible embeddings endpoint
        ProviderKind::Vllm | ProviderKind::Openai => Arc::new(OpenAiProvider::new(config)),
    }
}

fn http_client(timeout_seconds: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .unwrap_or_default()
}

async fn check_status(response: reqwest::Response) -> EmbeddingResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "Embedding provider request failed");
    Err(EmbeddingError::Provider {
        status: status.as_u16(),
        message: body,
    })
}

// ---------------------------------------------------------------------------
// OpenAI-compatible batch endpoint: {model, input} -> {data: [{embedding}]}
// ---------------------------------------------------------------------------

/// Request for the OpenAI-style batch endpoint
#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiItem {
    embedding: Vec<f32>,
}

/// OpenAI-compatible provider (OpenAI itself, or vLLM serving the same API)
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingsConfig) -> Self {
        Self {
            client: http_client(config.timeout_seconds),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimension,
            api_key: config.api_key.clone(),
        }
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiRequest {
            model: &self.model,
            input: texts.to_vec(),
        };

        debug!("Embedding batch of {} texts via {}", texts.len(), self.embeddings_url());

        let mut builder = self.client.post(self.embeddings_url()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = check_status(builder.send().await?).await?;
        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: parsed.data.len(),
            });
        }

        let mut embeddings = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            if item.embedding.len() != self.dimensions {
                return Err(EmbeddingError::Dimension {
                    expected: self.dimensions,
                    actual: item.embedding.len(),
                });
            }
            embeddings.push(item.embedding);
        }
        Ok(embeddings)
    }
}

// ---------------------------------------------------------------------------
// Ollama single-prompt endpoint: {model, prompt} -> {embedding}
// ---------------------------------------------------------------------------

/// Request for the Ollama per-item endpoint
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

/// Ollama provider: one request per input item
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingsConfig) -> Self {
        Self {
            client: http_client(config.timeout_seconds),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimension,
        }
    }

    fn embeddings_url(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }

    async fn embed_one(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let request = OllamaRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self.client.post(self.embeddings_url()).json(&request).send().await?;
        let response = check_status(response).await?;
        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        if parsed.embedding.len() != self.dimensions {
            return Err(EmbeddingError::Dimension {
                expected: self.dimensions,
                actual: parsed.embedding.len(),
            });
        }
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts with Ollama, one request each", texts.len());

        // One item per call keeps ordering trivially correct
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_one(text).await?);
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robomonkey_config::ApplicationConfig;

    fn test_config() -> EmbeddingsConfig {
        ApplicationConfig::default().embeddings
    }

    #[test]
    fn test_openai_url_shape() {
        let mut config = test_config();
        config.base_url = "http://localhost:8000/".into();
        let provider = OpenAiProvider::new(&config);
        assert_eq!(provider.embeddings_url(), "http://localhost:8000/v1/embeddings");
    }

    #[test]
    fn test_ollama_url_shape() {
        let provider = OllamaProvider::new(&test_config());
        assert_eq!(
            provider.embeddings_url(),
            "http://localhost:11434/api/embeddings"
        );
    }

    #[test]
    fn test_openai_response_decodes() {
        let body = r#"{"data":[{"embedding":[0.1,0.2]},{"embedding":[0.3,0.4]}]}"#;
        let parsed: OpenAiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_ollama_response_decodes() {
        let body = r#"{"embedding":[1.0,2.0,3.0]}"#;
        let parsed: OllamaResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.embedding.len(), 3);
    }

    #[test]
    fn test_factory_picks_openai_for_vllm() {
        let mut config = test_config();
        config.provider = robomonkey_config::EmbeddingsProvider::Vllm;
        let provider = provider_for(&config);
        assert_eq!(provider.name(), "openai");
    }

    #[tokio::test]
    async fn test_empty_batch_is_free() {
        let provider = OllamaProvider::new(&test_config());
        let result = provider.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
