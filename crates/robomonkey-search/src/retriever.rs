//! Hybrid retriever
//!
//! Orchestrates one search: embed the query once, gather vector and FTS
//! candidates per entity type, attach tags, then hand everything to the
//! pure fusion pipeline. If the embedding provider is down, search
//! degrades to FTS-only instead of failing.

use std::sync::Arc;

use crate::candidates::CandidateSource;
use crate::error::SearchResult;
use crate::fuse::{apply_filters, fuse, merge_candidates};
use crate::types::{Candidate, SearchFilters, SearchHit};
use robomonkey_config::SearchConfig;
use robomonkey_embeddings::EmbeddingService;
use robomonkey_store::EntityType;

/// Hybrid vector + FTS + tag retriever over one repository
pub struct HybridRetriever {
    source: Arc<dyn CandidateSource>,
    embeddings: Arc<EmbeddingService>,
    params: SearchConfig,
}

impl HybridRetriever {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        embeddings: Arc<EmbeddingService>,
        params: SearchConfig,
    ) -> Self {
        Self {
            source,
            embeddings,
            params,
        }
    }

    /// Run one hybrid search.
    ///
    /// # Errors
    ///
    /// Returns an error when candidate retrieval fails; embedding
    /// failures degrade to FTS-only and are logged, not fatal.
    #[tracing::instrument(skip(self, filters), fields(query_len = query.len()))]
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: Option<usize>,
    ) -> SearchResult<Vec<SearchHit>> {
        let entity_types = filters.effective_entity_types();

        // Embed the query once; a down provider blocks embedding, not search
        let query_vector = match self.embeddings.embed_query(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, running FTS-only");
                None
            }
        };

        let mut vector_candidates: Vec<Candidate> = Vec::new();
        if let Some(vector) = &query_vector {
            for entity in &entity_types {
                let raw = self
                    .source
                    .vector_candidates(*entity, vector, self.params.vector_top_k)
                    .await?;
                vector_candidates.extend(
                    raw.into_iter()
                        .enumerate()
                        .map(|(rank, c)| Candidate::from_vector(c, rank)),
                );
            }
        }

        let mut fts_candidates: Vec<Candidate> = Vec::new();
        for entity in &entity_types {
            let raw = self
                .source
                .fts_candidates(*entity, query, self.params.fts_top_k)
                .await?;
            fts_candidates.extend(
                raw.into_iter()
                    .enumerate()
                    .map(|(rank, c)| Candidate::from_fts(c, rank)),
            );
        }

        let mut merged = merge_candidates(vector_candidates, fts_candidates);

        // Tags drive both the tag filters and the boost
        let keys: Vec<(EntityType, uuid::Uuid)> = merged
            .iter()
            .map(|c| (c.entity_type, c.entity_id))
            .collect();
        let tags = self.source.tags_for(&keys).await?;
        for candidate in &mut merged {
            if let Some(names) = tags.get(&(candidate.entity_type, candidate.entity_id)) {
                candidate.tags = names.clone();
            }
        }

        let retained = apply_filters(merged, filters);
        let hits = fuse(
            retained,
            filters,
            top_k.unwrap_or(self.params.final_top_k),
        );

        tracing::debug!(results = hits.len(), "Hybrid search finished");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawCandidate;
    use async_trait::async_trait;
    use robomonkey_config::ApplicationConfig;
    use robomonkey_embeddings::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
    use std::collections::HashMap;
    use uuid::Uuid;

    struct ScriptedSource {
        vector: Vec<RawCandidate>,
        fts: Vec<RawCandidate>,
        tags: HashMap<(EntityType, Uuid), Vec<String>>,
    }

    #[async_trait]
    impl CandidateSource for ScriptedSource {
        async fn vector_candidates(
            &self,
            entity: EntityType,
            _query: &[f32],
            _k: usize,
        ) -> SearchResult<Vec<RawCandidate>> {
            Ok(self
                .vector
                .iter()
                .filter(|c| c.entity_type == entity)
                .cloned()
                .collect())
        }

        async fn fts_candidates(
            &self,
            entity: EntityType,
            _query: &str,
            _k: usize,
        ) -> SearchResult<Vec<RawCandidate>> {
            Ok(self
                .fts
                .iter()
                .filter(|c| c.entity_type == entity)
                .cloned()
                .collect())
        }

        async fn tags_for(
            &self,
            _entities: &[(EntityType, Uuid)],
        ) -> SearchResult<HashMap<(EntityType, Uuid), Vec<String>>> {
            Ok(self.tags.clone())
        }
    }

    struct OkProvider;

    #[async_trait]
    impl EmbeddingProvider for OkProvider {
        fn name(&self) -> &str {
            "ok"
        }
        fn model_id(&self) -> &str {
            "ok"
        }
        fn dimensions(&self) -> usize {
            3
        }
        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    struct DownProvider;

    #[async_trait]
    impl EmbeddingProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }
        fn model_id(&self) -> &str {
            "down"
        }
        fn dimensions(&self) -> usize {
            3
        }
        async fn embed_batch(&self, _texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Err(EmbeddingError::Provider {
                status: 400,
                message: "no".into(),
            })
        }
    }

    fn raw(entity_type: EntityType, score: f32, path: &str) -> RawCandidate {
        RawCandidate {
            entity_type,
            entity_id: Uuid::new_v4(),
            score,
            file_path: Some(path.to_string()),
            language: Some("python".to_string()),
            start_line: Some(1),
            end_line: Some(5),
            content: "body".to_string(),
        }
    }

    fn retriever(
        source: ScriptedSource,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> HybridRetriever {
        let config = ApplicationConfig::default();
        let mut embeddings_config = config.embeddings.clone();
        embeddings_config.dimension = 3;
        HybridRetriever::new(
            Arc::new(source),
            Arc::new(robomonkey_embeddings::EmbeddingService::new(
                provider,
                &embeddings_config,
            )),
            config.search,
        )
    }

    #[tokio::test]
    async fn test_search_fuses_both_sources() {
        let shared = raw(EntityType::Chunk, 0.9, "src/a.py");
        let mut fts_twin = shared.clone();
        fts_twin.score = 2.0;

        let source = ScriptedSource {
            vector: vec![shared, raw(EntityType::Chunk, 0.7, "src/b.py")],
            fts: vec![fts_twin],
            tags: HashMap::new(),
        };
        let retriever = retriever(source, Arc::new(OkProvider));

        let hits = retriever
            .search("connect database", &SearchFilters::default(), None)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        // The dual-source candidate wins
        assert!(hits[0].vec_rank.is_some() && hits[0].fts_rank.is_some());
        assert!(hits[0].final_score > hits[1].final_score);
    }

    #[tokio::test]
    async fn test_embedding_outage_degrades_to_fts_only() {
        let source = ScriptedSource {
            vector: vec![raw(EntityType::Chunk, 0.9, "ignored.py")],
            fts: vec![raw(EntityType::Chunk, 1.5, "src/found.py")],
            tags: HashMap::new(),
        };
        let retriever = retriever(source, Arc::new(DownProvider));

        let hits = retriever
            .search("query", &SearchFilters::default(), None)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path.as_deref(), Some("src/found.py"));
        assert!(hits[0].vec_rank.is_none());
    }

    #[tokio::test]
    async fn test_entity_type_filter_limits_sources() {
        let source = ScriptedSource {
            vector: vec![
                raw(EntityType::Chunk, 0.9, "a.py"),
                raw(EntityType::Document, 0.8, "README.md"),
            ],
            fts: vec![],
            tags: HashMap::new(),
        };
        let retriever = retriever(source, Arc::new(OkProvider));

        let filters = SearchFilters {
            entity_types: vec![EntityType::Document],
            ..SearchFilters::default()
        };
        let hits = retriever.search("readme", &filters, None).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_type, EntityType::Document);
    }

    #[tokio::test]
    async fn test_tag_filter_and_boost_flow_through() {
        let tagged = raw(EntityType::Chunk, 0.9, "a.py");
        let tagged_key = (EntityType::Chunk, tagged.entity_id);
        let untagged = raw(EntityType::Chunk, 0.95, "b.py");

        let mut tags = HashMap::new();
        tags.insert(tagged_key, vec!["database".to_string()]);

        let source = ScriptedSource {
            vector: vec![tagged, untagged],
            fts: vec![],
            tags,
        };
        let retriever = retriever(source, Arc::new(OkProvider));

        let filters = SearchFilters {
            tags_any: vec!["database".to_string()],
            ..SearchFilters::default()
        };
        let hits = retriever.search("query", &filters, None).await.unwrap();

        assert_eq!(hits.len(), 1, "untagged candidate filtered out");
        assert_eq!(hits[0].matched_tags, vec!["database"]);
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let source = || ScriptedSource {
            vector: vec![
                raw(EntityType::Chunk, 0.9, "a.py"),
                raw(EntityType::Chunk, 0.8, "b.py"),
            ],
            fts: vec![raw(EntityType::Symbol, 1.1, "c.py")],
            tags: HashMap::new(),
        };

        // Same candidate ids across both runs
        let fixed: Vec<RawCandidate> = source().vector;
        let fixed_fts: Vec<RawCandidate> = source().fts;
        let make = || ScriptedSource {
            vector: fixed.clone(),
            fts: fixed_fts.clone(),
            tags: HashMap::new(),
        };

        let first = retriever(make(), Arc::new(OkProvider))
            .search("q", &SearchFilters::default(), None)
            .await
            .unwrap();
        let second = retriever(make(), Arc::new(OkProvider))
            .search("q", &SearchFilters::default(), None)
            .await
            .unwrap();

        let ids = |hits: &[SearchHit]| hits.iter().map(|h| h.entity_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }
}
