//! Per-repository data access over a schema-scoped session
//!
//! Every method acquires a session scoped to this repository's schema, so
//! unqualified table names resolve inside it and nothing can cross into
//! another repository. The per-file index is a single transaction: commit
//! publishes the new file state atomically, rollback leaves the prior
//! state untouched.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{StoreError, StoreErrorExt, StoreOperation, StoreResult};
use crate::models::{
    ChunkRecord, DocumentRecord, DocumentUpsert, EdgeIntent, EdgeRecord, EdgeType, EntityType,
    FileIndexSummary, FileRecord, FileState, IndexState, NewChunk, NewDocument, NewFile, NewSymbol,
    SymbolKind, SymbolRecord, TagMatchType, TagRecord, TagRule, TagSource,
};
use crate::schema::SchemaManager;
use crate::traits::RepoStore;

/// Postgres-backed [`RepoStore`] for one repository
pub struct PgRepoStore {
    schemas: SchemaManager,
    repo_id: Uuid,
    schema_name: String,
}

impl PgRepoStore {
    pub fn new(schemas: SchemaManager, repo_id: Uuid, schema_name: String) -> Self {
        Self {
            schemas,
            repo_id,
            schema_name,
        }
    }

    /// Resolve a repository and open a store for it.
    ///
    /// # Errors
    ///
    /// Returns `RepoNotFound` if the name is not registered.
    pub async fn open(schemas: &SchemaManager, name_or_id: &str) -> StoreResult<Self> {
        let (repo_id, schema_name) = schemas.resolve_repo(name_or_id).await?;
        Ok(Self::new(schemas.clone(), repo_id, schema_name))
    }
}

fn file_from_row(row: &PgRow) -> FileRecord {
    FileRecord {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        relative_path: row.get("relative_path"),
        language: row.get("language"),
        content_sha: row.get("content_sha"),
        mtime: row.get("mtime"),
        indexed_at: row.get("indexed_at"),
    }
}

fn chunk_from_row(row: &PgRow) -> ChunkRecord {
    ChunkRecord {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        file_id: row.get("file_id"),
        symbol_id: row.get("symbol_id"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
    }
}

fn symbol_from_row(row: &PgRow) -> StoreResult<SymbolRecord> {
    let kind_str: String = row.get("kind");
    let kind: SymbolKind = kind_str.parse().map_err(|reason| StoreError::Invalid {
        what: "symbol kind".into(),
        value: kind_str,
        reason,
    })?;

    Ok(SymbolRecord {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        file_id: row.get("file_id"),
        fqn: row.get("fqn"),
        name: row.get("name"),
        kind,
        signature: row.get("signature"),
        docstring: row.get("docstring"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        content_hash: row.get("content_hash"),
    })
}

fn edge_from_row(row: &PgRow) -> StoreResult<EdgeRecord> {
    let type_str: String = row.get("edge_type");
    let edge_type: EdgeType = type_str.parse().map_err(|reason| StoreError::Invalid {
        what: "edge type".into(),
        value: type_str,
        reason,
    })?;

    Ok(EdgeRecord {
        id: row.get("id"),
        src_symbol_id: row.get("src_symbol_id"),
        dst_symbol_id: row.get("dst_symbol_id"),
        edge_type,
        evidence_file_id: row.get("evidence_file_id"),
        evidence_start_line: row.get("evidence_start_line"),
        evidence_end_line: row.get("evidence_end_line"),
        confidence: row.get("confidence"),
    })
}

fn document_from_row(row: &PgRow) -> StoreResult<DocumentRecord> {
    let type_str: String = row.get("doc_type");
    let source_str: String = row.get("source");

    Ok(DocumentRecord {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        doc_type: type_str.parse().map_err(|reason| StoreError::Invalid {
            what: "doc type".into(),
            value: type_str.clone(),
            reason,
        })?,
        source: source_str.parse().map_err(|reason| StoreError::Invalid {
            what: "doc source".into(),
            value: source_str.clone(),
            reason,
        })?,
        relative_path: row.get("relative_path"),
        title: row.get("title"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
    })
}

#[async_trait]
impl RepoStore for PgRepoStore {
    fn repo_id(&self) -> Uuid {
        self.repo_id
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    async fn file_state(&self, relative_path: &str, content_sha: &str) -> StoreResult<FileState> {
        let operation = StoreOperation::IndexFile {
            relative_path: relative_path.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query(
            "SELECT id, content_sha FROM file WHERE repo_id = $1 AND relative_path = $2",
        )
        .bind(self.repo_id)
        .bind(relative_path)
        .fetch_optional(session.conn())
        .await
        .map_store_err(operation)?;

        Ok(match row {
            None => FileState::New,
            Some(row) => {
                let existing: String = row.get("content_sha");
                let file_id: Uuid = row.get("id");
                if existing == content_sha {
                    FileState::Unchanged { file_id }
                } else {
                    FileState::Updated { file_id }
                }
            }
        })
    }

    #[tracing::instrument(
        skip(self, file, symbols, chunks, edges),
        fields(path = %file.relative_path, schema = %self.schema_name)
    )]
    async fn apply_file_index(
        &self,
        file: NewFile,
        symbols: Vec<NewSymbol>,
        chunks: Vec<NewChunk>,
        edges: Vec<EdgeIntent>,
    ) -> StoreResult<FileIndexSummary> {
        let operation = StoreOperation::IndexFile {
            relative_path: file.relative_path.clone(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let mut tx = session.begin().await?;

        // Upsert the file row; child rows of a previous generation are
        // removed explicitly so their embeddings cascade away with them.
        let file_id: Uuid = sqlx::query_scalar(
            r"
            INSERT INTO file (repo_id, relative_path, language, content_sha, mtime, indexed_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (repo_id, relative_path)
            DO UPDATE SET language = EXCLUDED.language,
                          content_sha = EXCLUDED.content_sha,
                          mtime = EXCLUDED.mtime,
                          indexed_at = NOW()
            RETURNING id
            ",
        )
        .bind(self.repo_id)
        .bind(&file.relative_path)
        .bind(&file.language)
        .bind(&file.content_sha)
        .bind(file.mtime)
        .fetch_one(&mut *tx)
        .await
        .map_store_err(operation.clone())?;

        sqlx::query("DELETE FROM edge WHERE evidence_file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_store_err(operation.clone())?;
        sqlx::query("DELETE FROM symbol WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_store_err(operation.clone())?;
        sqlx::query("DELETE FROM chunk WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_store_err(operation.clone())?;

        // Symbols, in definition order
        let mut symbol_ids = std::collections::HashMap::with_capacity(symbols.len());
        for symbol in &symbols {
            let id: Uuid = sqlx::query_scalar(
                r"
                INSERT INTO symbol
                    (repo_id, file_id, fqn, name, kind, signature, docstring,
                     start_line, end_line, content_hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (repo_id, file_id, fqn) DO UPDATE SET fqn = EXCLUDED.fqn
                RETURNING id
                ",
            )
            .bind(self.repo_id)
            .bind(file_id)
            .bind(&symbol.fqn)
            .bind(&symbol.name)
            .bind(symbol.kind.to_string())
            .bind(&symbol.signature)
            .bind(&symbol.docstring)
            .bind(symbol.start_line)
            .bind(symbol.end_line)
            .bind(&symbol.content_hash)
            .fetch_one(&mut *tx)
            .await
            .map_store_err(operation.clone())?;
            symbol_ids.insert(symbol.fqn.clone(), id);
        }

        // Chunks; the FTS trigger fills the search vector
        for chunk in &chunks {
            let symbol_id = chunk
                .symbol_fqn
                .as_ref()
                .and_then(|fqn| symbol_ids.get(fqn).copied());

            sqlx::query(
                r"
                INSERT INTO chunk
                    (repo_id, file_id, symbol_id, start_line, end_line, content, content_hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (repo_id, file_id, start_line, end_line, content_hash) DO NOTHING
                ",
            )
            .bind(self.repo_id)
            .bind(file_id)
            .bind(symbol_id)
            .bind(chunk.start_line)
            .bind(chunk.end_line)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .execute(&mut *tx)
            .await
            .map_store_err(operation.clone())?;
        }

        // Best-effort local edge resolution. A destination name resolves
        // only when exactly one symbol in the repo carries it; anything
        // else is dropped rather than stored dangling.
        let mut inserted_edges = 0usize;
        let mut dropped_edges = 0usize;
        for intent in &edges {
            let Some(&src_id) = symbol_ids.get(&intent.src_fqn) else {
                dropped_edges += 1;
                continue;
            };

            let candidates: Vec<Uuid> = sqlx::query_scalar(
                "SELECT id FROM symbol WHERE repo_id = $1 AND name = $2 LIMIT 2",
            )
            .bind(self.repo_id)
            .bind(&intent.dst_name)
            .fetch_all(&mut *tx)
            .await
            .map_store_err(operation.clone())?;

            if candidates.len() != 1 {
                dropped_edges += 1;
                continue;
            }
            let dst_id = candidates[0];
            if dst_id == src_id {
                dropped_edges += 1;
                continue;
            }

            // confidence = 1 / candidate_count; the unique-match rule
            // makes that 1.0 here
            let result = sqlx::query(
                r"
                INSERT INTO edge
                    (repo_id, src_symbol_id, dst_symbol_id, edge_type,
                     evidence_file_id, evidence_start_line, evidence_end_line, confidence)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 1.0)
                ON CONFLICT (src_symbol_id, dst_symbol_id, edge_type,
                             evidence_file_id, evidence_start_line, evidence_end_line)
                DO NOTHING
                ",
            )
            .bind(self.repo_id)
            .bind(src_id)
            .bind(dst_id)
            .bind(intent.edge_type.to_string())
            .bind(file_id)
            .bind(intent.evidence_start_line)
            .bind(intent.evidence_end_line)
            .execute(&mut *tx)
            .await
            .map_store_err(operation.clone())?;

            if result.rows_affected() > 0 {
                inserted_edges += 1;
            }
        }

        tx.commit().await.map_store_err(operation)?;

        Ok(FileIndexSummary {
            symbols: symbols.len(),
            chunks: chunks.len(),
            edges: inserted_edges,
            edges_dropped: dropped_edges,
        })
    }

    async fn delete_file(&self, relative_path: &str) -> StoreResult<bool> {
        let operation = StoreOperation::IndexFile {
            relative_path: relative_path.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let result = sqlx::query("DELETE FROM file WHERE repo_id = $1 AND relative_path = $2")
            .bind(self.repo_id)
            .bind(relative_path)
            .execute(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_file_paths(&self) -> StoreResult<Vec<String>> {
        let operation = StoreOperation::Query {
            description: "list_file_paths".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        sqlx::query_scalar("SELECT relative_path FROM file WHERE repo_id = $1 ORDER BY relative_path")
            .bind(self.repo_id)
            .fetch_all(session.conn())
            .await
            .map_store_err(operation)
    }

    async fn delete_missing_files(&self, keep: &[String]) -> StoreResult<u64> {
        let operation = StoreOperation::DeleteMissingFiles;

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let result = sqlx::query(
            "DELETE FROM file WHERE repo_id = $1 AND NOT (relative_path = ANY($2))",
        )
        .bind(self.repo_id)
        .bind(keep)
        .execute(session.conn())
        .await
        .map_store_err(operation)?;

        Ok(result.rows_affected())
    }

    async fn file_by_path(&self, relative_path: &str) -> StoreResult<Option<FileRecord>> {
        let operation = StoreOperation::Query {
            description: format!("file_by_path({relative_path})"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query("SELECT * FROM file WHERE repo_id = $1 AND relative_path = $2")
            .bind(self.repo_id)
            .bind(relative_path)
            .fetch_optional(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(row.as_ref().map(file_from_row))
    }

    async fn file_by_id(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        let operation = StoreOperation::Query {
            description: format!("file_by_id({id})"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query("SELECT * FROM file WHERE id = $1")
            .bind(id)
            .fetch_optional(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(row.as_ref().map(file_from_row))
    }

    async fn list_files(&self) -> StoreResult<Vec<FileRecord>> {
        let operation = StoreOperation::Query {
            description: "list_files".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query("SELECT * FROM file WHERE repo_id = $1 ORDER BY relative_path")
            .bind(self.repo_id)
            .fetch_all(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(rows.iter().map(file_from_row).collect())
    }

    async fn list_chunks(&self, limit: i64, offset: i64) -> StoreResult<Vec<ChunkRecord>> {
        let operation = StoreOperation::FetchChunks {
            key: format!("page:{offset}"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(
            r"
            SELECT * FROM chunk
            WHERE repo_id = $1
            ORDER BY file_id, start_line, end_line
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(self.repo_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn list_symbols(&self, limit: i64, offset: i64) -> StoreResult<Vec<SymbolRecord>> {
        let operation = StoreOperation::Query {
            description: format!("list_symbols(page:{offset})"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(
            "SELECT * FROM symbol WHERE repo_id = $1 ORDER BY fqn LIMIT $2 OFFSET $3",
        )
        .bind(self.repo_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)?;

        rows.iter().map(symbol_from_row).collect()
    }

    async fn chunk_by_id(&self, id: Uuid) -> StoreResult<Option<ChunkRecord>> {
        let operation = StoreOperation::FetchChunks {
            key: id.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query("SELECT * FROM chunk WHERE id = $1")
            .bind(id)
            .fetch_optional(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(row.as_ref().map(chunk_from_row))
    }

    async fn index_state(&self) -> StoreResult<IndexState> {
        let operation = StoreOperation::Query {
            description: "index_state".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query("SELECT * FROM repo_index_state WHERE repo_id = $1")
            .bind(self.repo_id)
            .fetch_optional(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(row.map_or_else(IndexState::default, |row| IndexState {
            last_indexed_at: row.get("last_indexed_at"),
            last_scan_marker: row.get("last_scan_marker"),
            file_count: row.get("file_count"),
            symbol_count: row.get("symbol_count"),
            chunk_count: row.get("chunk_count"),
            edge_count: row.get("edge_count"),
            embedding_dimension: row.get("embedding_dimension"),
            last_error: row.get("last_error"),
        }))
    }

    async fn finish_index_pass(&self, last_error: Option<&str>) -> StoreResult<IndexState> {
        let operation = StoreOperation::UpdateIndexState;

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        sqlx::query(
            r"
            UPDATE repo_index_state SET
                last_indexed_at = NOW(),
                file_count = (SELECT COUNT(*) FROM file WHERE repo_id = $1),
                symbol_count = (SELECT COUNT(*) FROM symbol WHERE repo_id = $1),
                chunk_count = (SELECT COUNT(*) FROM chunk WHERE repo_id = $1),
                edge_count = (SELECT COUNT(*) FROM edge WHERE repo_id = $1),
                last_error = $2
            WHERE repo_id = $1
            ",
        )
        .bind(self.repo_id)
        .bind(last_error)
        .execute(session.conn())
        .await
        .map_store_err(operation)?;

        drop(session);
        self.index_state().await
    }

    async fn unembedded_chunks(&self, limit: i64) -> StoreResult<Vec<ChunkRecord>> {
        let operation = StoreOperation::FetchUnembedded {
            entity: "chunk".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(
            r"
            SELECT c.*
            FROM chunk c
            LEFT JOIN chunk_embedding e ON e.chunk_id = c.id
            WHERE c.repo_id = $1 AND e.chunk_id IS NULL
            ORDER BY c.created_at ASC, c.id ASC
            LIMIT $2
            ",
        )
        .bind(self.repo_id)
        .bind(limit)
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn insert_chunk_embeddings(&self, rows: Vec<(Uuid, Vec<f32>)>) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let operation = StoreOperation::InsertEmbeddings {
            entity: "chunk".into(),
            count: rows.len(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let mut builder =
            QueryBuilder::new("INSERT INTO chunk_embedding (chunk_id, embedding) ");
        builder.push_values(rows, |mut b, (chunk_id, embedding)| {
            b.push_bind(chunk_id).push_bind(Vector::from(embedding));
        });
        builder.push(" ON CONFLICT (chunk_id) DO NOTHING");

        let result = builder
            .build()
            .execute(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(result.rows_affected())
    }

    async fn unembedded_documents(&self, limit: i64) -> StoreResult<Vec<DocumentRecord>> {
        let operation = StoreOperation::FetchUnembedded {
            entity: "document".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(
            r"
            SELECT d.*
            FROM document d
            LEFT JOIN document_embedding e ON e.document_id = d.id
            WHERE d.repo_id = $1 AND e.document_id IS NULL
            ORDER BY d.created_at ASC, d.id ASC
            LIMIT $2
            ",
        )
        .bind(self.repo_id)
        .bind(limit)
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn insert_document_embeddings(&self, rows: Vec<(Uuid, Vec<f32>)>) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let operation = StoreOperation::InsertEmbeddings {
            entity: "document".into(),
            count: rows.len(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let mut builder =
            QueryBuilder::new("INSERT INTO document_embedding (document_id, embedding) ");
        builder.push_values(rows, |mut b, (document_id, embedding)| {
            b.push_bind(document_id).push_bind(Vector::from(embedding));
        });
        builder.push(" ON CONFLICT (document_id) DO NOTHING");

        let result = builder
            .build()
            .execute(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(result.rows_affected())
    }

    async fn record_embedding_dimension(&self, dimension: i32) -> StoreResult<Option<i32>> {
        let operation = StoreOperation::UpdateIndexState;

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let previous: Option<i32> = sqlx::query_scalar(
            "SELECT embedding_dimension FROM repo_index_state WHERE repo_id = $1",
        )
        .bind(self.repo_id)
        .fetch_optional(session.conn())
        .await
        .map_store_err(operation.clone())?
        .flatten();

        if previous.is_none() {
            sqlx::query(
                "UPDATE repo_index_state SET embedding_dimension = $2 WHERE repo_id = $1",
            )
            .bind(self.repo_id)
            .bind(dimension)
            .execute(session.conn())
            .await
            .map_store_err(operation)?;
        }

        Ok(previous)
    }

    async fn embedding_counts(&self) -> StoreResult<(i64, i64)> {
        let operation = StoreOperation::Query {
            description: "embedding_counts".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM chunk_embedding) AS chunk_embeddings,
                (SELECT COUNT(*) FROM document_embedding) AS document_embeddings
            ",
        )
        .fetch_one(session.conn())
        .await
        .map_store_err(operation)?;

        Ok((row.get("chunk_embeddings"), row.get("document_embeddings")))
    }

    async fn upsert_document(&self, doc: NewDocument) -> StoreResult<DocumentUpsert> {
        let operation = StoreOperation::UpsertDocument {
            relative_path: doc.relative_path.clone().unwrap_or_default(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let mut tx = session.begin().await?;

        let existing = sqlx::query(
            r"
            SELECT id, content_hash FROM document
            WHERE repo_id = $1 AND doc_type = $2 AND relative_path IS NOT DISTINCT FROM $3
            ",
        )
        .bind(self.repo_id)
        .bind(doc.doc_type.to_string())
        .bind(&doc.relative_path)
        .fetch_optional(&mut *tx)
        .await
        .map_store_err(operation.clone())?;

        if let Some(row) = &existing {
            let hash: String = row.get("content_hash");
            if hash == doc.content_hash {
                // Unchanged content keeps its embedding
                return Ok(DocumentUpsert::Unchanged);
            }
            let id: Uuid = row.get("id");
            // Delete rather than update so the stale embedding cascades away
            sqlx::query("DELETE FROM document WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_store_err(operation.clone())?;
        }

        let document_id: Uuid = sqlx::query_scalar(
            r"
            INSERT INTO document
                (repo_id, doc_type, source, relative_path, title, content, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(self.repo_id)
        .bind(doc.doc_type.to_string())
        .bind(doc.source.to_string())
        .bind(&doc.relative_path)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.content_hash)
        .fetch_one(&mut *tx)
        .await
        .map_store_err(operation.clone())?;

        tx.commit().await.map_store_err(operation)?;

        Ok(DocumentUpsert::Written { document_id })
    }

    async fn symbol_by_fqn(&self, fqn: &str) -> StoreResult<Option<SymbolRecord>> {
        let operation = StoreOperation::LookupSymbol {
            key: fqn.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query("SELECT * FROM symbol WHERE repo_id = $1 AND fqn = $2 LIMIT 1")
            .bind(self.repo_id)
            .bind(fqn)
            .fetch_optional(session.conn())
            .await
            .map_store_err(operation)?;

        row.as_ref().map(symbol_from_row).transpose()
    }

    async fn symbol_by_id(&self, id: Uuid) -> StoreResult<Option<SymbolRecord>> {
        let operation = StoreOperation::LookupSymbol { key: id.to_string() };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query("SELECT * FROM symbol WHERE id = $1")
            .bind(id)
            .fetch_optional(session.conn())
            .await
            .map_store_err(operation)?;

        row.as_ref().map(symbol_from_row).transpose()
    }

    async fn symbols_by_name(&self, name: &str) -> StoreResult<Vec<SymbolRecord>> {
        let operation = StoreOperation::LookupSymbol {
            key: name.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows =
            sqlx::query("SELECT * FROM symbol WHERE repo_id = $1 AND name = $2 ORDER BY fqn")
                .bind(self.repo_id)
                .bind(name)
                .fetch_all(session.conn())
                .await
                .map_store_err(operation)?;

        rows.iter().map(symbol_from_row).collect()
    }

    async fn edges_from(
        &self,
        symbol_id: Uuid,
        edge_type: EdgeType,
    ) -> StoreResult<Vec<EdgeRecord>> {
        let operation = StoreOperation::FetchEdges { symbol_id };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(
            "SELECT * FROM edge WHERE src_symbol_id = $1 AND edge_type = $2 ORDER BY dst_symbol_id",
        )
        .bind(symbol_id)
        .bind(edge_type.to_string())
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)?;

        rows.iter().map(edge_from_row).collect()
    }

    async fn edges_to(&self, symbol_id: Uuid, edge_type: EdgeType) -> StoreResult<Vec<EdgeRecord>> {
        let operation = StoreOperation::FetchEdges { symbol_id };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(
            "SELECT * FROM edge WHERE dst_symbol_id = $1 AND edge_type = $2 ORDER BY src_symbol_id",
        )
        .bind(symbol_id)
        .bind(edge_type.to_string())
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)?;

        rows.iter().map(edge_from_row).collect()
    }

    async fn chunks_for_symbol(&self, symbol_id: Uuid) -> StoreResult<Vec<ChunkRecord>> {
        let operation = StoreOperation::FetchChunks {
            key: symbol_id.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows =
            sqlx::query("SELECT * FROM chunk WHERE symbol_id = $1 ORDER BY start_line, end_line")
                .bind(symbol_id)
                .fetch_all(session.conn())
                .await
                .map_store_err(operation)?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn header_chunk(&self, file_id: Uuid) -> StoreResult<Option<ChunkRecord>> {
        let operation = StoreOperation::FetchChunks {
            key: format!("header:{file_id}"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query(
            r"
            SELECT * FROM chunk
            WHERE file_id = $1 AND symbol_id IS NULL
            ORDER BY start_line ASC
            LIMIT 1
            ",
        )
        .bind(file_id)
        .fetch_optional(session.conn())
        .await
        .map_store_err(operation)?;

        Ok(row.as_ref().map(chunk_from_row))
    }

    async fn list_tags(&self) -> StoreResult<Vec<TagRecord>> {
        let operation = StoreOperation::Query {
            description: "list_tags".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query("SELECT id, name, description FROM tag ORDER BY name")
            .fetch_all(session.conn())
            .await
            .map_store_err(operation)?;

        Ok(rows
            .into_iter()
            .map(|row| TagRecord {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
            })
            .collect())
    }

    async fn ensure_tag(&self, name: &str, description: Option<&str>) -> StoreResult<TagRecord> {
        let operation = StoreOperation::TagWrite {
            tag: name.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let row = sqlx::query(
            r"
            INSERT INTO tag (name, description)
            VALUES (lower($1), $2)
            ON CONFLICT (name)
            DO UPDATE SET description = COALESCE(EXCLUDED.description, tag.description)
            RETURNING id, name, description
            ",
        )
        .bind(name)
        .bind(description)
        .fetch_one(session.conn())
        .await
        .map_store_err(operation)?;

        Ok(TagRecord {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
        })
    }

    async fn tag_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        tag_name: &str,
        source: TagSource,
        confidence: f64,
    ) -> StoreResult<()> {
        let tag = self.ensure_tag(tag_name, None).await?;
        let operation = StoreOperation::TagWrite {
            tag: tag_name.to_string(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        sqlx::query(
            r"
            INSERT INTO entity_tag (repo_id, entity_type, entity_id, tag_id, source, confidence)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (repo_id, entity_type, entity_id, tag_id)
            DO UPDATE SET source = EXCLUDED.source, confidence = EXCLUDED.confidence
            ",
        )
        .bind(self.repo_id)
        .bind(entity_type.to_string())
        .bind(entity_id)
        .bind(tag.id)
        .bind(source.to_string())
        .bind(confidence)
        .execute(session.conn())
        .await
        .map_store_err(operation)?;

        Ok(())
    }

    async fn tag_rules(&self) -> StoreResult<Vec<TagRule>> {
        let operation = StoreOperation::Query {
            description: "tag_rules".into(),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        let rows = sqlx::query(
            r"
            SELECT r.id, r.tag_id, t.name AS tag_name, r.match_type, r.pattern, r.weight
            FROM tag_rule r
            JOIN tag t ON t.id = r.tag_id
            ORDER BY t.name, r.pattern
            ",
        )
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)?;

        rows.into_iter()
            .map(|row| {
                let match_str: String = row.get("match_type");
                let match_type: TagMatchType =
                    match_str.parse().map_err(|reason| StoreError::Invalid {
                        what: "tag match type".into(),
                        value: match_str.clone(),
                        reason,
                    })?;
                Ok(TagRule {
                    id: row.get("id"),
                    tag_id: row.get("tag_id"),
                    tag_name: row.get("tag_name"),
                    match_type,
                    pattern: row.get("pattern"),
                    weight: row.get("weight"),
                })
            })
            .collect()
    }

    async fn tags_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> StoreResult<Vec<String>> {
        let operation = StoreOperation::Query {
            description: format!("tags_for_entity({entity_type})"),
        };

        let mut session = self.schemas.scoped(&self.schema_name).await?;
        sqlx::query_scalar(
            r"
            SELECT t.name
            FROM entity_tag et
            JOIN tag t ON t.id = et.tag_id
            WHERE et.entity_type = $1 AND et.entity_id = $2
            ORDER BY t.name
            ",
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .fetch_all(session.conn())
        .await
        .map_store_err(operation)
    }
}
