//! Candidate sources
//!
//! The SQL layer returns per-source candidates with raw scores; union,
//! filtering, normalization and fusion happen in Rust (see
//! [`crate::fuse`]) so every result can explain itself.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{SearchError, SearchResult};
use crate::types::RawCandidate;
use robomonkey_store::{EntityType, SchemaManager, StoreErrorExt, StoreOperation};

/// Per-source candidate retrieval for one repository schema
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Top-k by cosine similarity for an entity type with an embedding
    /// table. Symbols have no embeddings and return empty.
    async fn vector_candidates(
        &self,
        entity: EntityType,
        query: &[f32],
        k: usize,
    ) -> SearchResult<Vec<RawCandidate>>;

    /// Top-k by `ts_rank_cd` against `websearch_to_tsquery('simple', q)`.
    async fn fts_candidates(
        &self,
        entity: EntityType,
        query: &str,
        k: usize,
    ) -> SearchResult<Vec<RawCandidate>>;

    /// Tag names per entity, for filter evaluation and the tag boost.
    async fn tags_for(
        &self,
        entities: &[(EntityType, Uuid)],
    ) -> SearchResult<HashMap<(EntityType, Uuid), Vec<String>>>;
}

/// Postgres candidate source over a schema-scoped session
pub struct PgCandidateSource {
    schemas: SchemaManager,
    schema_name: String,
}

impl PgCandidateSource {
    pub fn new(schemas: SchemaManager, schema_name: String) -> Self {
        Self {
            schemas,
            schema_name,
        }
    }
}

#[async_trait]
impl CandidateSource for PgCandidateSource {
    async fn vector_candidates(
        &self,
        entity: EntityType,
        query: &[f32],
        k: usize,
    ) -> SearchResult<Vec<RawCandidate>> {
        let sql = match entity {
            EntityType::Chunk => {
                r"
                SELECT c.id, (1 - (e.embedding <=> $1))::real AS score,
                       f.relative_path, f.language, c.start_line, c.end_line, c.content
                FROM chunk_embedding e
                JOIN chunk c ON c.id = e.chunk_id
                JOIN file f ON f.id = c.file_id
                ORDER BY e.embedding <=> $1
                LIMIT $2
                "
            }
            EntityType::Document => {
                r"
                SELECT d.id, (1 - (e.embedding <=> $1))::real AS score,
                       d.relative_path, NULL::text AS language,
                       NULL::int AS start_line, NULL::int AS end_line, d.content
                FROM document_embedding e
                JOIN document d ON d.id = e.document_id
                ORDER BY e.embedding <=> $1
                LIMIT $2
                "
            }
            // No embedding table for these
            EntityType::Symbol | EntityType::File => return Ok(Vec::new()),
        };

        let operation = StoreOperation::Query {
            description: format!("vector_candidates({entity})"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(sql)
            .bind(Vector::from(query.to_vec()))
            .bind(k as i64)
            .fetch_all(session.conn())
            .await
            .map_store_err(operation)
            .map_err(SearchError::Store)?;

        Ok(rows
            .into_iter()
            .map(|row| RawCandidate {
                entity_type: entity,
                entity_id: row.get("id"),
                score: row.get("score"),
                file_path: row.get("relative_path"),
                language: row.get("language"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
                content: row.get("content"),
            })
            .collect())
    }

    async fn fts_candidates(
        &self,
        entity: EntityType,
        query: &str,
        k: usize,
    ) -> SearchResult<Vec<RawCandidate>> {
        let sql = match entity {
            EntityType::Chunk => {
                r"
                SELECT c.id,
                       ts_rank_cd(c.fts, websearch_to_tsquery('simple', $1))::real AS score,
                       f.relative_path, f.language, c.start_line, c.end_line, c.content
                FROM chunk c
                JOIN file f ON f.id = c.file_id
                WHERE c.fts @@ websearch_to_tsquery('simple', $1)
                ORDER BY score DESC, c.id ASC
                LIMIT $2
                "
            }
            EntityType::Document => {
                r"
                SELECT d.id,
                       ts_rank_cd(d.fts, websearch_to_tsquery('simple', $1))::real AS score,
                       d.relative_path, NULL::text AS language,
                       NULL::int AS start_line, NULL::int AS end_line, d.content
                FROM document d
                WHERE d.fts @@ websearch_to_tsquery('simple', $1)
                ORDER BY score DESC, d.id ASC
                LIMIT $2
                "
            }
            EntityType::Symbol => {
                r"
                SELECT s.id,
                       ts_rank_cd(s.fts, websearch_to_tsquery('simple', $1))::real AS score,
                       f.relative_path, f.language, s.start_line, s.end_line,
                       concat_ws(E'\n', s.signature, s.docstring) AS content
                FROM symbol s
                JOIN file f ON f.id = s.file_id
                WHERE s.fts @@ websearch_to_tsquery('simple', $1)
                ORDER BY score DESC, s.id ASC
                LIMIT $2
                "
            }
            EntityType::File => return Ok(Vec::new()),
        };

        let operation = StoreOperation::Query {
            description: format!("fts_candidates({entity})"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(sql)
            .bind(query)
            .bind(k as i64)
            .fetch_all(session.conn())
            .await
            .map_store_err(operation)
            .map_err(SearchError::Store)?;

        Ok(rows
            .into_iter()
            .map(|row| RawCandidate {
                entity_type: entity,
                entity_id: row.get("id"),
                score: row.get("score"),
                file_path: row.get("relative_path"),
                language: row.get("language"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
                content: row.get("content"),
            })
            .collect())
    }

    async fn tags_for(
        &self,
        entities: &[(EntityType, Uuid)],
    ) -> SearchResult<HashMap<(EntityType, Uuid), Vec<String>>> {
        let mut result: HashMap<(EntityType, Uuid), Vec<String>> = HashMap::new();
        if entities.is_empty() {
            return Ok(result);
        }

        let operation = StoreOperation::Query {
            description: "tags_for_candidates".into(),
        };

        // One query per entity type present in the batch
        let mut by_type: HashMap<EntityType, Vec<Uuid>> = HashMap::new();
        for (entity_type, id) in entities {
            by_type.entry(*entity_type).or_default().push(*id);
        }

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        for (entity_type, ids) in by_type {
            let rows = sqlx::query(
                r"
                SELECT et.entity_id, t.name
                FROM entity_tag et
                JOIN tag t ON t.id = et.tag_id
                WHERE et.entity_type = $1 AND et.entity_id = ANY($2)
                ",
            )
            .bind(entity_type.to_string())
            .bind(&ids)
            .fetch_all(session.conn())
            .await
            .map_store_err(operation.clone())
            .map_err(SearchError::Store)?;

            for row in rows {
                let id: Uuid = row.get("entity_id");
                let name: String = row.get("name");
                result.entry((entity_type, id)).or_default().push(name);
            }
        }

        for tags in result.values_mut() {
            tags.sort();
        }
        Ok(result)
    }
}
