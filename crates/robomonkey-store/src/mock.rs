//! In-memory mock implementations of the storage traits
//!
//! The mocks mirror the Postgres semantics the workers and indexer rely
//! on: dedup on enqueue, dispatch ordering, claim/complete/fail
//! transitions with backoff, and the per-file replace-children index
//! transaction. Tests exercise pipeline logic against these without a
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    ChunkRecord, DocumentRecord, DocumentUpsert, EdgeIntent, EdgeRecord, EdgeType, EnqueueOutcome,
    EntityType, FileIndexSummary, FileRecord, FileState, IndexState, JobRecord, JobStatus, JobType,
    NewChunk, NewDocument, NewFile, NewJob, NewSymbol, SymbolRecord, TagRecord, TagRule, TagSource,
};
use crate::queue::retry_delay_secs;
use crate::traits::{JobQueue, RepoStore};

/// In-memory job queue with Postgres-equivalent transition semantics
#[derive(Default)]
pub struct MockJobQueue {
    jobs: Mutex<Vec<JobRecord>>,
    heartbeats: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a worker heartbeat (used by reap tests)
    pub async fn set_heartbeat(&self, instance_id: &str, at: DateTime<Utc>) {
        self.heartbeats.lock().await.insert(instance_id.to_string(), at);
    }

    /// All jobs, for assertions
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        self.jobs.lock().await.clone()
    }

    /// Force a job's run_after into the past so it becomes dispatchable
    pub async fn make_due(&self, job_id: Uuid) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.run_after = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(&self, job: NewJob) -> StoreResult<EnqueueOutcome> {
        let mut jobs = self.jobs.lock().await;

        if let Some(key) = &job.dedup_key {
            let live = jobs.iter().any(|j| {
                j.repo_name == job.repo_name
                    && j.job_type == job.job_type
                    && j.dedup_key.as_deref() == Some(key)
                    && matches!(j.status, JobStatus::Pending | JobStatus::Claimed)
            });
            if live {
                return Ok(EnqueueOutcome::Deduplicated);
            }
        }

        let id = Uuid::new_v4();
        jobs.push(JobRecord {
            id,
            repo_name: job.repo_name,
            schema_name: job.schema_name,
            job_type: job.job_type,
            payload: job.payload,
            priority: job.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            run_after: job.run_after.unwrap_or_else(Utc::now),
            claimed_at: None,
            claimed_by: None,
            started_at: None,
            completed_at: None,
            error: None,
            error_detail: None,
            dedup_key: job.dedup_key,
            created_at: Utc::now(),
        });

        Ok(EnqueueOutcome::Enqueued { job_id: id })
    }

    async fn claim(
        &self,
        claimed_by: &str,
        job_types: &[JobType],
        excluded_repos: &[String],
        limit: i64,
    ) -> StoreResult<Vec<JobRecord>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        let mut eligible: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                j.status == JobStatus::Pending
                    && j.run_after <= now
                    && job_types.contains(&j.job_type)
                    && !excluded_repos.contains(&j.repo_name)
            })
            .map(|(i, _)| i)
            .collect();

        eligible.sort_by(|&a, &b| {
            let (ja, jb) = (&jobs[a], &jobs[b]);
            jb.priority
                .cmp(&ja.priority)
                .then(ja.run_after.cmp(&jb.run_after))
                .then(ja.created_at.cmp(&jb.created_at))
        });
        eligible.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for i in eligible {
            let job = &mut jobs[i];
            job.status = JobStatus::Claimed;
            job.claimed_by = Some(claimed_by.to_string());
            job.claimed_at = Some(now);
            job.started_at = Some(now);
            job.attempts += 1;
            claimed.push(job.clone());
        }
        drop(jobs);

        self.heartbeats
            .lock()
            .await
            .entry(claimed_by.to_string())
            .or_insert(now);

        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid, claimed_by: &str) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| {
                j.id == job_id
                    && j.status == JobStatus::Claimed
                    && j.claimed_by.as_deref() == Some(claimed_by)
            })
            .ok_or_else(|| StoreError::Invalid {
                what: "job claim".into(),
                value: job_id.to_string(),
                reason: format!("not claimed by {claimed_by}"),
            })?;

        job.status = JobStatus::Done;
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        claimed_by: &str,
        error: &str,
        error_detail: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| {
                j.id == job_id
                    && j.status == JobStatus::Claimed
                    && j.claimed_by.as_deref() == Some(claimed_by)
            })
            .ok_or_else(|| StoreError::Invalid {
                what: "job claim".into(),
                value: job_id.to_string(),
                reason: format!("not claimed by {claimed_by}"),
            })?;

        job.error = Some(error.to_string());
        job.error_detail = error_detail;
        job.claimed_by = None;
        job.claimed_at = None;

        if job.attempts < job.max_attempts {
            job.status = JobStatus::Pending;
            job.run_after = Utc::now() + Duration::seconds(retry_delay_secs(job.attempts));
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn reap_dead(&self, dead_threshold_sec: u64) -> StoreResult<u64> {
        let cutoff = Utc::now() - Duration::seconds(dead_threshold_sec as i64);
        let heartbeats = self.heartbeats.lock().await;
        let mut jobs = self.jobs.lock().await;

        let mut reaped = 0;
        for job in jobs.iter_mut() {
            if job.status != JobStatus::Claimed {
                continue;
            }
            let alive = job
                .claimed_by
                .as_ref()
                .and_then(|w| heartbeats.get(w))
                .is_some_and(|&at| at >= cutoff);
            if !alive {
                job.status = JobStatus::Pending;
                job.claimed_by = None;
                job.claimed_at = None;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn cleanup(&self, retention_days: u32) -> StoreResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| {
            !(matches!(j.status, JobStatus::Done | JobStatus::Failed)
                && j.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn list_jobs(&self, repo_name: &str, limit: i64) -> StoreResult<Vec<JobRecord>> {
        let jobs = self.jobs.lock().await;
        let mut matched: Vec<JobRecord> = jobs
            .iter()
            .filter(|j| j.repo_name == repo_name)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }

    async fn claimed_counts_by_repo(&self) -> StoreResult<Vec<(String, i64)>> {
        let jobs = self.jobs.lock().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for job in jobs.iter().filter(|j| j.status == JobStatus::Claimed) {
            *counts.entry(job.repo_name.clone()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[derive(Default)]
struct MockRepoData {
    files: HashMap<String, FileRecord>,
    symbols: Vec<SymbolRecord>,
    chunks: Vec<ChunkRecord>,
    edges: Vec<EdgeRecord>,
    chunk_embeddings: HashMap<Uuid, Vec<f32>>,
    document_embeddings: HashMap<Uuid, Vec<f32>>,
    documents: Vec<DocumentRecord>,
    tags: Vec<TagRecord>,
    entity_tags: Vec<(EntityType, Uuid, Uuid, TagSource, f64)>,
    tag_rules: Vec<TagRule>,
    index_state: IndexState,
}

/// In-memory mock of [`RepoStore`]
pub struct MockRepoStore {
    repo_id: Uuid,
    schema_name: String,
    data: Mutex<MockRepoData>,
}

impl MockRepoStore {
    pub fn new(schema_name: &str) -> Self {
        Self {
            repo_id: Uuid::new_v4(),
            schema_name: schema_name.to_string(),
            data: Mutex::new(MockRepoData::default()),
        }
    }

    /// Number of chunk embedding rows (for idempotency assertions)
    pub async fn chunk_embedding_count(&self) -> usize {
        self.data.lock().await.chunk_embeddings.len()
    }

    /// All stored chunks (for assertions)
    pub async fn all_chunks(&self) -> Vec<ChunkRecord> {
        self.data.lock().await.chunks.clone()
    }

    /// All stored symbols (for assertions)
    pub async fn all_symbols(&self) -> Vec<SymbolRecord> {
        self.data.lock().await.symbols.clone()
    }

    /// All stored edges (for assertions)
    pub async fn all_edges(&self) -> Vec<EdgeRecord> {
        self.data.lock().await.edges.clone()
    }

    /// Install a tag rule directly (test setup)
    pub async fn add_tag_rule(&self, rule: TagRule) {
        let mut data = self.data.lock().await;
        if !data.tags.iter().any(|t| t.id == rule.tag_id) {
            data.tags.push(TagRecord {
                id: rule.tag_id,
                name: rule.tag_name.clone(),
                description: None,
            });
        }
        data.tag_rules.push(rule);
    }
}

#[async_trait]
impl RepoStore for MockRepoStore {
    fn repo_id(&self) -> Uuid {
        self.repo_id
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    async fn file_state(&self, relative_path: &str, content_sha: &str) -> StoreResult<FileState> {
        let data = self.data.lock().await;
        Ok(match data.files.get(relative_path) {
            None => FileState::New,
            Some(file) if file.content_sha == content_sha => FileState::Unchanged { file_id: file.id },
            Some(file) => FileState::Updated { file_id: file.id },
        })
    }

    async fn apply_file_index(
        &self,
        file: NewFile,
        symbols: Vec<NewSymbol>,
        chunks: Vec<NewChunk>,
        edges: Vec<EdgeIntent>,
    ) -> StoreResult<FileIndexSummary> {
        let mut data = self.data.lock().await;

        let file_id = data
            .files
            .get(&file.relative_path)
            .map_or_else(Uuid::new_v4, |f| f.id);

        // Replace children; embeddings of removed chunks go with them
        let removed: Vec<Uuid> = data
            .chunks
            .iter()
            .filter(|c| c.file_id == file_id)
            .map(|c| c.id)
            .collect();
        for id in &removed {
            data.chunk_embeddings.remove(id);
        }
        data.chunks.retain(|c| c.file_id != file_id);
        let removed_symbols: Vec<Uuid> = data
            .symbols
            .iter()
            .filter(|s| s.file_id == file_id)
            .map(|s| s.id)
            .collect();
        data.symbols.retain(|s| s.file_id != file_id);
        data.edges.retain(|e| {
            e.evidence_file_id != Some(file_id)
                && !removed_symbols.contains(&e.src_symbol_id)
                && !removed_symbols.contains(&e.dst_symbol_id)
        });

        data.files.insert(
            file.relative_path.clone(),
            FileRecord {
                id: file_id,
                repo_id: self.repo_id,
                relative_path: file.relative_path.clone(),
                language: file.language,
                content_sha: file.content_sha,
                mtime: file.mtime,
                indexed_at: Utc::now(),
            },
        );

        let mut symbol_ids = HashMap::with_capacity(symbols.len());
        for symbol in &symbols {
            let id = Uuid::new_v4();
            symbol_ids.insert(symbol.fqn.clone(), id);
            data.symbols.push(SymbolRecord {
                id,
                repo_id: self.repo_id,
                file_id,
                fqn: symbol.fqn.clone(),
                name: symbol.name.clone(),
                kind: symbol.kind,
                signature: symbol.signature.clone(),
                docstring: symbol.docstring.clone(),
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                content_hash: symbol.content_hash.clone(),
            });
        }

        for chunk in &chunks {
            let symbol_id = chunk
                .symbol_fqn
                .as_ref()
                .and_then(|fqn| symbol_ids.get(fqn).copied());
            data.chunks.push(ChunkRecord {
                id: Uuid::new_v4(),
                repo_id: self.repo_id,
                file_id,
                symbol_id,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                content: chunk.content.clone(),
                content_hash: chunk.content_hash.clone(),
            });
        }

        let mut inserted_edges = 0;
        let mut dropped_edges = 0;
        for intent in &edges {
            let Some(&src_id) = symbol_ids.get(&intent.src_fqn) else {
                dropped_edges += 1;
                continue;
            };
            let candidates: Vec<Uuid> = data
                .symbols
                .iter()
                .filter(|s| s.name == intent.dst_name)
                .map(|s| s.id)
                .collect();
            if candidates.len() != 1 || candidates[0] == src_id {
                dropped_edges += 1;
                continue;
            }
            data.edges.push(EdgeRecord {
                id: Uuid::new_v4(),
                src_symbol_id: src_id,
                dst_symbol_id: candidates[0],
                edge_type: intent.edge_type,
                evidence_file_id: Some(file_id),
                evidence_start_line: Some(intent.evidence_start_line),
                evidence_end_line: Some(intent.evidence_end_line),
                confidence: 1.0,
            });
            inserted_edges += 1;
        }

        Ok(FileIndexSummary {
            symbols: symbols.len(),
            chunks: chunks.len(),
            edges: inserted_edges,
            edges_dropped: dropped_edges,
        })
    }

    async fn delete_file(&self, relative_path: &str) -> StoreResult<bool> {
        let mut data = self.data.lock().await;
        let Some(file) = data.files.remove(relative_path) else {
            return Ok(false);
        };
        let removed: Vec<Uuid> = data
            .chunks
            .iter()
            .filter(|c| c.file_id == file.id)
            .map(|c| c.id)
            .collect();
        for id in &removed {
            data.chunk_embeddings.remove(id);
        }
        data.chunks.retain(|c| c.file_id != file.id);
        data.symbols.retain(|s| s.file_id != file.id);
        data.edges.retain(|e| e.evidence_file_id != Some(file.id));
        Ok(true)
    }

    async fn list_file_paths(&self) -> StoreResult<Vec<String>> {
        let data = self.data.lock().await;
        let mut paths: Vec<String> = data.files.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    async fn delete_missing_files(&self, keep: &[String]) -> StoreResult<u64> {
        let paths: Vec<String> = {
            let data = self.data.lock().await;
            data.files
                .keys()
                .filter(|p| !keep.contains(p))
                .cloned()
                .collect()
        };
        let mut deleted = 0;
        for path in paths {
            if self.delete_file(&path).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn file_by_path(&self, relative_path: &str) -> StoreResult<Option<FileRecord>> {
        Ok(self.data.lock().await.files.get(relative_path).cloned())
    }

    async fn file_by_id(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        Ok(self
            .data
            .lock()
            .await
            .files
            .values()
            .find(|f| f.id == id)
            .cloned())
    }

    async fn list_files(&self) -> StoreResult<Vec<FileRecord>> {
        let data = self.data.lock().await;
        let mut files: Vec<FileRecord> = data.files.values().cloned().collect();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    async fn list_chunks(&self, limit: i64, offset: i64) -> StoreResult<Vec<ChunkRecord>> {
        let data = self.data.lock().await;
        let mut chunks = data.chunks.clone();
        chunks.sort_by_key(|c| (c.file_id, c.start_line, c.end_line));
        Ok(chunks
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_symbols(&self, limit: i64, offset: i64) -> StoreResult<Vec<SymbolRecord>> {
        let data = self.data.lock().await;
        let mut symbols = data.symbols.clone();
        symbols.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        Ok(symbols
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn chunk_by_id(&self, id: Uuid) -> StoreResult<Option<ChunkRecord>> {
        Ok(self
            .data
            .lock()
            .await
            .chunks
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn index_state(&self) -> StoreResult<IndexState> {
        Ok(self.data.lock().await.index_state.clone())
    }

    async fn finish_index_pass(&self, last_error: Option<&str>) -> StoreResult<IndexState> {
        let mut data = self.data.lock().await;
        data.index_state = IndexState {
            last_indexed_at: Some(Utc::now()),
            last_scan_marker: data.index_state.last_scan_marker.clone(),
            file_count: data.files.len() as i64,
            symbol_count: data.symbols.len() as i64,
            chunk_count: data.chunks.len() as i64,
            edge_count: data.edges.len() as i64,
            embedding_dimension: data.index_state.embedding_dimension,
            last_error: last_error.map(String::from),
        };
        Ok(data.index_state.clone())
    }

    async fn unembedded_chunks(&self, limit: i64) -> StoreResult<Vec<ChunkRecord>> {
        let data = self.data.lock().await;
        Ok(data
            .chunks
            .iter()
            .filter(|c| !data.chunk_embeddings.contains_key(&c.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_chunk_embeddings(&self, rows: Vec<(Uuid, Vec<f32>)>) -> StoreResult<u64> {
        let mut data = self.data.lock().await;
        let mut inserted = 0;
        for (chunk_id, embedding) in rows {
            if data.chunk_embeddings.contains_key(&chunk_id) {
                continue;
            }
            data.chunk_embeddings.insert(chunk_id, embedding);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn unembedded_documents(&self, limit: i64) -> StoreResult<Vec<DocumentRecord>> {
        let data = self.data.lock().await;
        Ok(data
            .documents
            .iter()
            .filter(|d| !data.document_embeddings.contains_key(&d.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_document_embeddings(&self, rows: Vec<(Uuid, Vec<f32>)>) -> StoreResult<u64> {
        let mut data = self.data.lock().await;
        let mut inserted = 0;
        for (document_id, embedding) in rows {
            if data.document_embeddings.contains_key(&document_id) {
                continue;
            }
            data.document_embeddings.insert(document_id, embedding);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn record_embedding_dimension(&self, dimension: i32) -> StoreResult<Option<i32>> {
        let mut data = self.data.lock().await;
        let previous = data.index_state.embedding_dimension;
        if previous.is_none() {
            data.index_state.embedding_dimension = Some(dimension);
        }
        Ok(previous)
    }

    async fn embedding_counts(&self) -> StoreResult<(i64, i64)> {
        let data = self.data.lock().await;
        Ok((
            data.chunk_embeddings.len() as i64,
            data.document_embeddings.len() as i64,
        ))
    }

    async fn upsert_document(&self, doc: NewDocument) -> StoreResult<DocumentUpsert> {
        let mut data = self.data.lock().await;
        if let Some(existing) = data
            .documents
            .iter()
            .position(|d| d.doc_type == doc.doc_type && d.relative_path == doc.relative_path)
        {
            if data.documents[existing].content_hash == doc.content_hash {
                return Ok(DocumentUpsert::Unchanged);
            }
            let old = data.documents.remove(existing);
            data.document_embeddings.remove(&old.id);
        }

        let id = Uuid::new_v4();
        data.documents.push(DocumentRecord {
            id,
            repo_id: self.repo_id,
            doc_type: doc.doc_type,
            source: doc.source,
            relative_path: doc.relative_path,
            title: doc.title,
            content: doc.content,
            content_hash: doc.content_hash,
        });
        Ok(DocumentUpsert::Written { document_id: id })
    }

    async fn symbol_by_fqn(&self, fqn: &str) -> StoreResult<Option<SymbolRecord>> {
        Ok(self
            .data
            .lock()
            .await
            .symbols
            .iter()
            .find(|s| s.fqn == fqn)
            .cloned())
    }

    async fn symbol_by_id(&self, id: Uuid) -> StoreResult<Option<SymbolRecord>> {
        Ok(self
            .data
            .lock()
            .await
            .symbols
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn symbols_by_name(&self, name: &str) -> StoreResult<Vec<SymbolRecord>> {
        let data = self.data.lock().await;
        let mut matched: Vec<SymbolRecord> = data
            .symbols
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        Ok(matched)
    }

    async fn edges_from(
        &self,
        symbol_id: Uuid,
        edge_type: EdgeType,
    ) -> StoreResult<Vec<EdgeRecord>> {
        Ok(self
            .data
            .lock()
            .await
            .edges
            .iter()
            .filter(|e| e.src_symbol_id == symbol_id && e.edge_type == edge_type)
            .cloned()
            .collect())
    }

    async fn edges_to(&self, symbol_id: Uuid, edge_type: EdgeType) -> StoreResult<Vec<EdgeRecord>> {
        Ok(self
            .data
            .lock()
            .await
            .edges
            .iter()
            .filter(|e| e.dst_symbol_id == symbol_id && e.edge_type == edge_type)
            .cloned()
            .collect())
    }

    async fn chunks_for_symbol(&self, symbol_id: Uuid) -> StoreResult<Vec<ChunkRecord>> {
        let data = self.data.lock().await;
        let mut matched: Vec<ChunkRecord> = data
            .chunks
            .iter()
            .filter(|c| c.symbol_id == Some(symbol_id))
            .cloned()
            .collect();
        matched.sort_by_key(|c| (c.start_line, c.end_line));
        Ok(matched)
    }

    async fn header_chunk(&self, file_id: Uuid) -> StoreResult<Option<ChunkRecord>> {
        let data = self.data.lock().await;
        Ok(data
            .chunks
            .iter()
            .filter(|c| c.file_id == file_id && c.symbol_id.is_none())
            .min_by_key(|c| c.start_line)
            .cloned())
    }

    async fn list_tags(&self) -> StoreResult<Vec<TagRecord>> {
        let mut tags = self.data.lock().await.tags.clone();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn ensure_tag(&self, name: &str, description: Option<&str>) -> StoreResult<TagRecord> {
        let normalized = name.to_lowercase();
        let mut data = self.data.lock().await;
        if let Some(tag) = data.tags.iter().find(|t| t.name == normalized) {
            return Ok(tag.clone());
        }
        let tag = TagRecord {
            id: Uuid::new_v4(),
            name: normalized,
            description: description.map(String::from),
        };
        data.tags.push(tag.clone());
        Ok(tag)
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
        let mut data = self.data.lock().await;
        let exists = data
            .entity_tags
            .iter()
            .any(|(t, id, tag_id, _, _)| *t == entity_type && *id == entity_id && *tag_id == tag.id);
        if !exists {
            data.entity_tags
                .push((entity_type, entity_id, tag.id, source, confidence));
        }
        Ok(())
    }

    async fn tag_rules(&self) -> StoreResult<Vec<TagRule>> {
        Ok(self.data.lock().await.tag_rules.clone())
    }

    async fn tags_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> StoreResult<Vec<String>> {
        let data = self.data.lock().await;
        let mut names: Vec<String> = data
            .entity_tags
            .iter()
            .filter(|(t, id, _, _, _)| *t == entity_type && *id == entity_id)
            .filter_map(|(_, _, tag_id, _, _)| {
                data.tags.iter().find(|t| t.id == *tag_id).map(|t| t.name.clone())
            })
            .collect();
        names.sort();
        Ok(names)
    }
}
