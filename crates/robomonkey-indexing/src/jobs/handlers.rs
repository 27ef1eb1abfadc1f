//! Job handlers, keyed by job type
//!
//! Every handler is idempotent: `FULL_INDEX` relies on the per-file
//! content-hash short-circuit, `EMBED_MISSING` only touches rows with
//! null embeddings, and re-running any of them converges to the same
//! stored state.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::JobContext;
use crate::docs::DocsIndexer;
use crate::embedder::EmbedBackfill;
use crate::error::{IndexError, IndexResult};
use crate::indexer::Indexer;
use crate::scanner::{ScannedFile, Scanner};
use crate::tagger::Tagger;
use robomonkey_parsing::language_for_extension;
use robomonkey_store::{JobRecord, JobType, NewJob};

#[derive(Debug, Deserialize)]
struct ReindexFilePayload {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ReindexManyPayload {
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedChunkPayload {
    chunk_id: uuid::Uuid,
}

fn payload<T: serde::de::DeserializeOwned>(job: &JobRecord) -> IndexResult<T> {
    serde_json::from_value(job.payload.clone())
        .map_err(|e| IndexError::Payload(format!("{}: {e}", job.job_type)))
}

/// Execute one claimed job. Returns a JSON result summary persisted by
/// callers that care (the RPC layer reports it).
pub async fn handle_job(
    ctx: &JobContext,
    job: &JobRecord,
    cancel: &CancellationToken,
) -> IndexResult<serde_json::Value> {
    let repo = ctx.resolver.open(&job.repo_name).await?;

    match job.job_type {
        JobType::FullIndex => {
            let scanner = Scanner::new(&repo.root_path, ctx.config.indexing.max_file_bytes);
            let indexer = Indexer::new(
                repo.store.clone(),
                ctx.parser.clone(),
                ctx.chunker(),
            );
            let stats = indexer.index_repo(&scanner, cancel).await?;

            if repo.auto_embed && stats.files_indexed > 0 {
                let follow_up = NewJob::new(&job.repo_name, &job.schema_name, JobType::EmbedMissing)
                    .with_dedup_key("embed-missing");
                ctx.queue.enqueue(follow_up).await?;
            }

            Ok(serde_json::to_value(&stats).unwrap_or_default())
        }

        JobType::ReindexFile => {
            let input: ReindexFilePayload = payload(job)?;
            let summary = reindex_one(ctx, &repo, &input.path).await?;
            repo.store.finish_index_pass(None).await?;
            Ok(summary)
        }

        JobType::ReindexMany => {
            let input: ReindexManyPayload = payload(job)?;
            let mut results = Vec::with_capacity(input.paths.len());
            for path in &input.paths {
                if cancel.is_cancelled() {
                    return Err(IndexError::Cancelled);
                }
                match reindex_one(ctx, &repo, path).await {
                    Ok(summary) => results.push(summary),
                    Err(e) if !e.is_transient() => {
                        // Per-file isolation: record and keep going
                        results.push(serde_json::json!({ "path": path, "error": e.to_string() }));
                    }
                    Err(e) => return Err(e),
                }
            }
            repo.store.finish_index_pass(None).await?;
            Ok(serde_json::json!({ "files": results }))
        }

        JobType::EmbedMissing => {
            let backfill = EmbedBackfill::new(
                repo.store.clone(),
                ctx.embeddings.clone(),
                ctx.config.embeddings.batch_size,
            );
            let stats = backfill.run(cancel).await?;
            Ok(serde_json::to_value(&stats).unwrap_or_default())
        }

        JobType::EmbedChunk => {
            let input: EmbedChunkPayload = payload(job)?;
            let Some(chunk) = repo.store.chunk_by_id(input.chunk_id).await? else {
                // Chunk was replaced since enqueue; nothing to do
                return Ok(serde_json::json!({ "skipped": "chunk gone" }));
            };
            let vector = ctx.embeddings.embed_query(&chunk.content).await?;
            let inserted = repo
                .store
                .insert_chunk_embeddings(vec![(chunk.id, vector)])
                .await?;
            Ok(serde_json::json!({ "embedded": inserted }))
        }

        JobType::DocsScan => {
            let scanner = Scanner::new(&repo.root_path, ctx.config.indexing.max_file_bytes);
            let docs = DocsIndexer::new(repo.store.clone());
            let stats = docs.scan(&scanner).await?;

            if repo.auto_embed && stats.written > 0 {
                let follow_up = NewJob::new(&job.repo_name, &job.schema_name, JobType::EmbedMissing)
                    .with_dedup_key("embed-missing");
                ctx.queue.enqueue(follow_up).await?;
            }

            Ok(serde_json::to_value(&stats).unwrap_or_default())
        }

        JobType::SummarizeMissing => {
            // Summary text generation is delegated to an external LLM
            // collaborator; without one configured this completes empty.
            tracing::info!(repo = %job.repo_name, "No summarizer configured, completing as no-op");
            Ok(serde_json::json!({ "summaries": 0 }))
        }

        JobType::TagRulesSync => {
            let tagger = Tagger::new(repo.store.clone());
            let stats = tagger.sync_rules().await?;
            Ok(serde_json::to_value(&stats).unwrap_or_default())
        }
    }
}

/// Reindex one path: index current content, or delete the row when the
/// file vanished from disk.
async fn reindex_one(
    ctx: &JobContext,
    repo: &super::OpenedRepo,
    path: &str,
) -> IndexResult<serde_json::Value> {
    let scanner = Scanner::new(&repo.root_path, ctx.config.indexing.max_file_bytes);
    let full_path = repo.root_path.join(path);

    if !full_path.exists() {
        let deleted = repo.store.delete_file(path).await?;
        return Ok(serde_json::json!({ "path": path, "deleted": deleted }));
    }

    let Some(content) = scanner.read_text(path)? else {
        return Ok(serde_json::json!({ "path": path, "skipped": "binary" }));
    };

    let ext = path.rsplit('.').next().unwrap_or("");
    let Some(language) = language_for_extension(ext) else {
        return Ok(serde_json::json!({ "path": path, "skipped": "unsupported language" }));
    };

    let indexer = Indexer::new(repo.store.clone(), ctx.parser.clone(), ctx.chunker());
    let outcome = indexer
        .index_file(
            &ScannedFile {
                relative_path: path.to_string(),
                language: language.to_string(),
                mtime: None,
            },
            &content,
        )
        .await?;

    Ok(serde_json::json!({ "path": path, "outcome": format!("{outcome:?}") }))
}
