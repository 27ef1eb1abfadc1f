//! Embedding backfill
//!
//! Drains `chunk LEFT JOIN chunk_embedding WHERE embedding IS NULL` (and
//! the document analogue) in batches. Within a batch, texts are deduped by
//! content hash: each unique hash is embedded once and the vector fans out
//! to every row sharing it. Safe to run concurrently with indexing - it
//! only ever inserts rows for chunks that still exist.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, IndexResult};
use robomonkey_embeddings::EmbeddingService;
use robomonkey_store::RepoStore;

/// Aggregate result of one backfill pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EmbedStats {
    pub chunks_embedded: u64,
    pub documents_embedded: u64,
    pub unique_texts: usize,
    pub batches: usize,
    pub error: Option<String>,
}

/// Backfills missing embeddings for one repository
pub struct EmbedBackfill {
    store: Arc<dyn RepoStore>,
    service: Arc<EmbeddingService>,
    batch_size: i64,
}

impl EmbedBackfill {
    pub fn new(store: Arc<dyn RepoStore>, service: Arc<EmbeddingService>, batch_size: usize) -> Self {
        Self {
            store,
            service,
            batch_size: batch_size.max(1) as i64,
        }
    }

    /// Run until no unembedded rows remain or an error stops the pass.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` when the store has vectors of a
    /// different dimension than the configured model produces; transient
    /// provider errors end the pass with the error recorded in the stats
    /// (the job layer retries the whole pass with backoff).
    pub async fn run(&self, cancel: &CancellationToken) -> IndexResult<EmbedStats> {
        let configured = self.service.dimensions() as i32;
        if let Some(stored) = self.store.record_embedding_dimension(configured).await?
            && stored != configured
        {
            return Err(IndexError::DimensionMismatch {
                stored,
                configured,
            });
        }

        let mut stats = EmbedStats::default();

        loop {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let chunks = self.store.unembedded_chunks(self.batch_size).await?;
            if chunks.is_empty() {
                break;
            }
            stats.batches += 1;

            // Dedupe by content hash: one provider input per unique text
            let mut by_hash: HashMap<&str, Vec<uuid::Uuid>> = HashMap::new();
            let mut unique: Vec<(&str, &str)> = Vec::new();
            for chunk in &chunks {
                let ids = by_hash.entry(chunk.content_hash.as_str()).or_default();
                if ids.is_empty() {
                    unique.push((chunk.content_hash.as_str(), chunk.content.as_str()));
                }
                ids.push(chunk.id);
            }
            stats.unique_texts += unique.len();

            let texts: Vec<&str> = unique.iter().map(|(_, text)| *text).collect();
            let vectors = match self.service.embed_texts(&texts).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    // Affected chunks stay unembedded; the next pass picks
                    // them up after the job-layer backoff
                    tracing::warn!(error = %e, "Embedding batch failed, ending pass");
                    stats.error = Some(e.to_string());
                    return Ok(stats);
                }
            };

            let mut rows = Vec::with_capacity(chunks.len());
            for ((hash, _), vector) in unique.iter().zip(vectors) {
                for chunk_id in &by_hash[hash] {
                    rows.push((*chunk_id, vector.clone()));
                }
            }
            stats.chunks_embedded += self.store.insert_chunk_embeddings(rows).await?;
        }

        loop {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let documents = self.store.unembedded_documents(self.batch_size).await?;
            if documents.is_empty() {
                break;
            }
            stats.batches += 1;

            let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
            let vectors = match self.service.embed_texts(&texts).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    tracing::warn!(error = %e, "Document embedding batch failed, ending pass");
                    stats.error = Some(e.to_string());
                    return Ok(stats);
                }
            };

            let rows: Vec<_> = documents
                .iter()
                .zip(vectors)
                .map(|(doc, vector)| (doc.id, vector))
                .collect();
            stats.documents_embedded += self.store.insert_document_embeddings(rows).await?;
        }

        Ok(stats)
    }
}
