//! Per-file transactional indexer
//!
//! The content-hash short-circuit in [`Indexer::index_file`] is the load-
//! bearing optimization: an unchanged file is never touched, so its
//! chunks keep their ids and their embeddings. Everything else is a
//! replace-children transaction delegated to the store.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::error::{IndexError, IndexResult};
use crate::scanner::{ScannedFile, Scanner};
use robomonkey_common::content_hash;
use robomonkey_parsing::{ParsedFile, SourceParser};
use robomonkey_store::{
    EdgeIntent, EdgeType, FileIndexSummary, FileState, IndexState, NewChunk, NewFile, NewSymbol,
    RepoStore,
};

/// What happened to one file during indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Content hash matched; nothing touched
    Skipped,
    /// File was (re)indexed inside one transaction
    Indexed(FileIndexSummary),
    /// Content was binary or not valid UTF-8
    NotText,
}

/// Aggregate result of a full index pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RepoIndexStats {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_deleted: u64,
    pub symbols: usize,
    pub chunks: usize,
    pub edges: usize,
    #[serde(skip)]
    pub state: IndexState,
}

/// Indexer over one repository's store
pub struct Indexer {
    store: Arc<dyn RepoStore>,
    parser: Arc<dyn SourceParser>,
    chunker: Chunker,
}

impl Indexer {
    pub fn new(store: Arc<dyn RepoStore>, parser: Arc<dyn SourceParser>, chunker: Chunker) -> Self {
        Self {
            store,
            parser,
            chunker,
        }
    }

    /// Index a single file's content.
    ///
    /// # Errors
    ///
    /// Returns an error when the store transaction fails; parse problems
    /// never surface here (the parser is best-effort).
    #[tracing::instrument(skip(self, content), fields(path = %scanned.relative_path))]
    pub async fn index_file(
        &self,
        scanned: &ScannedFile,
        content: &str,
    ) -> IndexResult<FileOutcome> {
        let sha = content_hash(content);

        match self
            .store
            .file_state(&scanned.relative_path, &sha)
            .await?
        {
            FileState::Unchanged { .. } => {
                tracing::debug!(hash = %sha, "Skipping unchanged file");
                return Ok(FileOutcome::Skipped);
            }
            FileState::New | FileState::Updated { .. } => {}
        }

        let parsed = self
            .parser
            .parse(&scanned.language, &scanned.relative_path, content)?;

        let symbols = build_symbols(&parsed);
        let chunks = self.build_chunks(&parsed, content);
        let edges = build_edges(&parsed);

        let summary = self
            .store
            .apply_file_index(
                NewFile {
                    relative_path: scanned.relative_path.clone(),
                    language: scanned.language.clone(),
                    content_sha: sha,
                    mtime: scanned.mtime,
                },
                symbols,
                chunks,
                edges,
            )
            .await?;

        Ok(FileOutcome::Indexed(summary))
    }

    /// Full index pass: scan, index changed files, delete vanished files,
    /// refresh aggregate state. Per-file failures are isolated; the pass
    /// records the last error but keeps going.
    pub async fn index_repo(
        &self,
        scanner: &Scanner,
        cancel: &CancellationToken,
    ) -> IndexResult<RepoIndexStats> {
        let scanned = scanner.scan();
        let mut stats = RepoIndexStats {
            files_seen: scanned.len(),
            ..RepoIndexStats::default()
        };
        let mut last_error: Option<String> = None;

        for file in &scanned {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }

            let content = match scanner.read_text(&file.relative_path) {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %file.relative_path, error = %e, "Failed to read file");
                    stats.files_failed += 1;
                    last_error = Some(format!("{}: {e}", file.relative_path));
                    continue;
                }
            };

            match self.index_file(file, &content).await {
                Ok(FileOutcome::Indexed(summary)) => {
                    stats.files_indexed += 1;
                    stats.symbols += summary.symbols;
                    stats.chunks += summary.chunks;
                    stats.edges += summary.edges;
                }
                Ok(FileOutcome::Skipped) => stats.files_skipped += 1,
                Ok(FileOutcome::NotText) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    // One bad file never fails the whole pass
                    tracing::warn!(path = %file.relative_path, error = %e, "File indexing failed");
                    stats.files_failed += 1;
                    last_error = Some(format!("{}: {e}", file.relative_path));
                }
            }
        }

        let keep: Vec<String> = scanned.into_iter().map(|f| f.relative_path).collect();
        stats.files_deleted = self.store.delete_missing_files(&keep).await?;

        stats.state = self
            .store
            .finish_index_pass(last_error.as_deref())
            .await?;

        tracing::info!(
            indexed = stats.files_indexed,
            skipped = stats.files_skipped,
            failed = stats.files_failed,
            deleted = stats.files_deleted,
            "Index pass finished"
        );

        Ok(stats)
    }

    /// Chunk symbol bodies plus one file-header chunk, all through the
    /// same split rule.
    fn build_chunks(&self, parsed: &ParsedFile, content: &str) -> Vec<NewChunk> {
        let mut chunks = Vec::new();

        for symbol in &parsed.symbols {
            for window in self.chunker.split(&symbol.body) {
                let line_base = symbol.start_line.saturating_sub(1);
                chunks.push(NewChunk {
                    symbol_fqn: Some(symbol.fqn.clone()),
                    start_line: (line_base + window.start_line) as i32,
                    end_line: (line_base + window.end_line) as i32,
                    content_hash: window.content_hash,
                    content: window.content,
                });
            }
        }

        // Header: everything above the first symbol, which is where the
        // imports and the module docstring live
        let header_end = parsed
            .symbols
            .iter()
            .map(|s| s.start_line)
            .min()
            .map_or(usize::MAX, |first| first.saturating_sub(1));
        let header_text: String = content
            .lines()
            .take(header_end)
            .collect::<Vec<_>>()
            .join("\n");

        if !header_text.trim().is_empty() {
            for window in self.chunker.split(&header_text) {
                chunks.push(NewChunk {
                    symbol_fqn: None,
                    start_line: window.start_line as i32,
                    end_line: window.end_line as i32,
                    content_hash: window.content_hash,
                    content: window.content,
                });
            }
        }

        chunks
    }
}

fn build_symbols(parsed: &ParsedFile) -> Vec<NewSymbol> {
    parsed
        .symbols
        .iter()
        .map(|s| NewSymbol {
            fqn: s.fqn.clone(),
            name: s.name.clone(),
            kind: s.kind,
            signature: s.signature.clone(),
            docstring: s.docstring.clone(),
            start_line: s.start_line as i32,
            end_line: s.end_line as i32,
            content_hash: content_hash(&s.body),
        })
        .collect()
}

fn build_edges(parsed: &ParsedFile) -> Vec<EdgeIntent> {
    let mut edges = Vec::new();

    for call in &parsed.calls {
        edges.push(EdgeIntent {
            src_fqn: call.caller_fqn.clone(),
            dst_name: call.callee_name.clone(),
            edge_type: EdgeType::Calls,
            evidence_start_line: call.start_line as i32,
            evidence_end_line: call.end_line as i32,
        });
    }

    for inherit in &parsed.inherits {
        edges.push(EdgeIntent {
            src_fqn: inherit.child_fqn.clone(),
            dst_name: inherit.parent_name.clone(),
            edge_type: if inherit.is_implementation {
                EdgeType::Implements
            } else {
                EdgeType::Inherits
            },
            evidence_start_line: inherit.line as i32,
            evidence_end_line: inherit.line as i32,
        });
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use robomonkey_parsing::LineParser;
    use robomonkey_store::MockRepoStore;

    fn indexer_with(store: Arc<MockRepoStore>) -> Indexer {
        Indexer::new(store, Arc::new(LineParser::new()), Chunker::new(7000, 500))
    }

    fn scanned(path: &str, language: &str) -> ScannedFile {
        ScannedFile {
            relative_path: path.to_string(),
            language: language.to_string(),
            mtime: None,
        }
    }

    const SOURCE: &str = "import os\n\ndef alpha():\n    beta()\n\ndef beta():\n    pass\n";

    #[tokio::test]
    async fn test_index_then_reindex_unchanged_skips() {
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let indexer = indexer_with(Arc::clone(&store));
        let file = scanned("src/app.py", "python");

        let first = indexer.index_file(&file, SOURCE).await.unwrap();
        assert!(matches!(first, FileOutcome::Indexed(_)));

        // Embed everything, then reindex the identical content
        let chunks = store.all_chunks().await;
        let rows: Vec<_> = chunks.iter().map(|c| (c.id, vec![0.0_f32])).collect();
        store.insert_chunk_embeddings(rows).await.unwrap();
        let embeddings_before = store.chunk_embedding_count().await;
        let chunk_ids_before: Vec<_> = chunks.iter().map(|c| c.id).collect();

        let second = indexer.index_file(&file, SOURCE).await.unwrap();
        assert_eq!(second, FileOutcome::Skipped);

        // Chunk rows and their embeddings survived untouched
        let chunk_ids_after: Vec<_> = store.all_chunks().await.iter().map(|c| c.id).collect();
        assert_eq!(chunk_ids_before, chunk_ids_after);
        assert_eq!(store.chunk_embedding_count().await, embeddings_before);
    }

    #[tokio::test]
    async fn test_changed_content_replaces_chunks_and_embeddings() {
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let indexer = indexer_with(Arc::clone(&store));
        let file = scanned("src/app.py", "python");

        indexer.index_file(&file, SOURCE).await.unwrap();
        let chunks = store.all_chunks().await;
        let rows: Vec<_> = chunks.iter().map(|c| (c.id, vec![0.0_f32])).collect();
        store.insert_chunk_embeddings(rows).await.unwrap();
        let old_hashes: Vec<String> =
            chunks.iter().map(|c| c.content_hash.clone()).collect();

        let changed = SOURCE.replace("pass", "return 42");
        let outcome = indexer.index_file(&file, &changed).await.unwrap();
        assert!(matches!(outcome, FileOutcome::Indexed(_)));

        // Old chunk rows are gone (embeddings cascaded), new hashes differ
        let new_chunks = store.all_chunks().await;
        let beta_chunk = new_chunks
            .iter()
            .find(|c| c.content.contains("return 42"))
            .expect("changed chunk present");
        assert!(!old_hashes.contains(&beta_chunk.content_hash));
        assert_eq!(store.chunk_embedding_count().await, 0);
    }

    #[tokio::test]
    async fn test_symbols_and_call_edges_extracted() {
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let indexer = indexer_with(Arc::clone(&store));

        indexer
            .index_file(&scanned("src/app.py", "python"), SOURCE)
            .await
            .unwrap();

        let symbols = store.all_symbols().await;
        let fqns: Vec<&str> = symbols.iter().map(|s| s.fqn.as_str()).collect();
        assert!(fqns.contains(&"src.app.alpha"));
        assert!(fqns.contains(&"src.app.beta"));

        let edges = store.all_edges().await;
        assert_eq!(edges.len(), 1, "alpha -> beta call edge");
        assert_eq!(edges[0].edge_type, EdgeType::Calls);
        assert!((edges[0].confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_header_chunk_contains_imports() {
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let indexer = indexer_with(Arc::clone(&store));

        indexer
            .index_file(&scanned("src/app.py", "python"), SOURCE)
            .await
            .unwrap();

        let chunks = store.all_chunks().await;
        let header = chunks
            .iter()
            .find(|c| c.symbol_id.is_none())
            .expect("header chunk");
        assert!(header.content.contains("import os"));
    }

    #[tokio::test]
    async fn test_large_symbol_body_is_split_with_shared_symbol() {
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let indexer = indexer_with(Arc::clone(&store));

        // One function body well past the 7000-char window
        let big_body: String = (0..400)
            .map(|i| format!("    line_{i} = value_{i} + {i}\n"))
            .collect();
        let source = format!("def huge():\n{big_body}");
        assert!(source.len() > 7000);

        indexer
            .index_file(&scanned("big.py", "python"), &source)
            .await
            .unwrap();

        let chunks = store.all_chunks().await;
        let symbol_chunks: Vec<_> = chunks.iter().filter(|c| c.symbol_id.is_some()).collect();
        assert!(symbol_chunks.len() >= 2, "split into multiple windows");

        let first_symbol = symbol_chunks[0].symbol_id;
        assert!(
            symbol_chunks.iter().all(|c| c.symbol_id == first_symbol),
            "all windows share the owning symbol"
        );

        let hashes: std::collections::HashSet<_> = symbol_chunks
            .iter()
            .map(|c| c.content_hash.clone())
            .collect();
        assert_eq!(hashes.len(), symbol_chunks.len(), "window hashes distinct");
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent_on_fqn_and_hash_sets() {
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let indexer = indexer_with(Arc::clone(&store));
        let file = scanned("src/app.py", "python");

        indexer.index_file(&file, SOURCE).await.unwrap();
        let fingerprint = |symbols: Vec<robomonkey_store::SymbolRecord>,
                           chunks: Vec<robomonkey_store::ChunkRecord>| {
            let mut fqns: Vec<String> = symbols.into_iter().map(|s| s.fqn).collect();
            let mut hashes: Vec<String> = chunks.into_iter().map(|c| c.content_hash).collect();
            fqns.sort();
            hashes.sort();
            (fqns, hashes)
        };
        let first = fingerprint(store.all_symbols().await, store.all_chunks().await);

        // Force a re-apply by changing then restoring content
        indexer
            .index_file(&file, &format!("{SOURCE}\n# touched\n"))
            .await
            .unwrap();
        indexer.index_file(&file, SOURCE).await.unwrap();
        let second = fingerprint(store.all_symbols().await, store.all_chunks().await);

        assert_eq!(first, second);
    }
}
