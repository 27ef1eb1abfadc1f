//! Robomonkey embeddings: remote providers behind one trait
//!
//! Two wire variants are supported: an OpenAI-compatible batch endpoint
//! (`{model, input}` -> `{data: [{embedding}]}`, also served by vLLM) and
//! the Ollama single-prompt endpoint (`{model, prompt}` -> `{embedding}`).
//! The service layer adds input truncation, batch splitting, retry with
//! exponential backoff, and strict dimension verification.

pub mod error;
pub mod providers;
pub mod retry;
pub mod service;
pub mod traits;

pub use error::{EmbeddingError, EmbeddingResult};
pub use providers::{OllamaProvider, OpenAiProvider, provider_for};
pub use service::EmbeddingService;
pub use traits::EmbeddingProvider;
