//! End-to-end pipeline tests over a temporary repository tree
//!
//! These exercise the scan -> parse -> index -> embed flow against the
//! in-memory store, including the unchanged-file and changed-file
//! embedding behavior and the queue interaction of REINDEX_FILE jobs.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;
use robomonkey_config::ApplicationConfig;
use robomonkey_embeddings::{EmbeddingProvider, EmbeddingResult, EmbeddingService};
use robomonkey_indexing::{Chunker, EmbedBackfill, Indexer, Scanner};
use robomonkey_parsing::LineParser;
use robomonkey_store::{
    EnqueueOutcome, JobQueue, JobStatus, JobType, MockJobQueue, MockRepoStore, NewJob, RepoStore,
};

struct StubProvider;

#[async_trait]
impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }
    fn model_id(&self) -> &str {
        "stub-model"
    }
    fn dimensions(&self) -> usize {
        8
    }
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.25; 8]).collect())
    }
}

fn embedding_service() -> Arc<EmbeddingService> {
    let mut config = ApplicationConfig::default().embeddings;
    config.dimension = 8;
    Arc::new(EmbeddingService::new(Arc::new(StubProvider), &config))
}

fn indexer(store: &Arc<MockRepoStore>) -> Indexer {
    Indexer::new(
        Arc::clone(store) as Arc<dyn RepoStore>,
        Arc::new(LineParser::new()),
        Chunker::new(7000, 500),
    )
}

fn write(root: &std::path::Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn unchanged_reindex_preserves_embeddings() {
    // Index a repo with one small file containing one function, embed,
    // then index the identical tree again: the chunk rows and their
    // embeddings must survive untouched.
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib.py", "def only():\n    return 7\n");

    let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
    let scanner = Scanner::new(dir.path(), 1024 * 1024);
    let indexer = indexer(&store);

    let first = indexer
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.files_indexed, 1);

    let backfill = EmbedBackfill::new(
        Arc::clone(&store) as Arc<dyn RepoStore>,
        embedding_service(),
        100,
    );
    let embedded = backfill.run(&CancellationToken::new()).await.unwrap();
    assert!(embedded.chunks_embedded >= 1);

    let chunk_ids_before: Vec<_> = store.all_chunks().await.iter().map(|c| c.id).collect();
    let embeddings_before = store.chunk_embedding_count().await;

    let second = indexer
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_skipped, 1);

    let chunk_ids_after: Vec<_> = store.all_chunks().await.iter().map(|c| c.id).collect();
    assert_eq!(chunk_ids_before, chunk_ids_after, "chunk row ids stable");
    assert_eq!(
        store.chunk_embedding_count().await,
        embeddings_before,
        "embeddings not regenerated"
    );

    // And the second embed pass finds nothing to do
    let again = backfill.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.chunks_embedded, 0);
}

#[tokio::test]
async fn change_triggers_reembed_with_new_hash() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib.py", "def only():\n    return 7\n");

    let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
    let scanner = Scanner::new(dir.path(), 1024 * 1024);
    let indexer = indexer(&store);
    let backfill = EmbedBackfill::new(
        Arc::clone(&store) as Arc<dyn RepoStore>,
        embedding_service(),
        100,
    );

    indexer
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();
    backfill.run(&CancellationToken::new()).await.unwrap();
    let old_hashes: Vec<String> = store
        .all_chunks()
        .await
        .iter()
        .map(|c| c.content_hash.clone())
        .collect();

    // Modify the body and index again
    write(dir.path(), "lib.py", "def only():\n    return 8\n");
    indexer
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();

    // Old chunk is gone (its embedding cascaded); new hash appears
    let new_chunks = store.all_chunks().await;
    assert!(new_chunks.iter().all(|c| !old_hashes.contains(&c.content_hash)));
    assert_eq!(store.chunk_embedding_count().await, 0);

    let stats = backfill.run(&CancellationToken::new()).await.unwrap();
    assert!(stats.chunks_embedded >= 1, "changed chunks re-embedded");
}

#[tokio::test]
async fn vanished_files_are_deleted_from_the_index() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "keep.py", "def keep():\n    pass\n");
    write(dir.path(), "gone.py", "def gone():\n    pass\n");

    let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
    let scanner = Scanner::new(dir.path(), 1024 * 1024);
    let indexer = indexer(&store);

    indexer
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(store.list_file_paths().await.unwrap().len(), 2);

    std::fs::remove_file(dir.path().join("gone.py")).unwrap();
    let stats = indexer
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_deleted, 1);
    assert_eq!(store.list_file_paths().await.unwrap(), vec!["keep.py"]);
    assert!(
        store.symbol_by_fqn("gone.gone").await.unwrap().is_none(),
        "symbols of deleted files cascade"
    );
}

#[tokio::test]
async fn reindex_file_jobs_dedupe_by_path() {
    // Enqueue REINDEX_FILE for the same path twice before the first is
    // done: exactly one live row.
    let queue = MockJobQueue::new();

    let job = NewJob::new("demo", "robomonkey_demo", JobType::ReindexFile)
        .with_payload(serde_json::json!({ "path": "src/x.py" }))
        .with_dedup_key("src/x.py");

    assert!(matches!(
        queue.enqueue(job.clone()).await.unwrap(),
        EnqueueOutcome::Enqueued { .. }
    ));
    assert_eq!(
        queue.enqueue(job.clone()).await.unwrap(),
        EnqueueOutcome::Deduplicated
    );

    let live: Vec<_> = queue
        .snapshot()
        .await
        .into_iter()
        .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Claimed))
        .collect();
    assert_eq!(live.len(), 1);

    // Claiming does not open the dedup window; completion does
    let claimed = queue.claim("w", &JobType::ALL, &[], 1).await.unwrap();
    assert_eq!(
        queue.enqueue(job.clone()).await.unwrap(),
        EnqueueOutcome::Deduplicated
    );
    queue.complete(claimed[0].id, "w").await.unwrap();
    assert!(matches!(
        queue.enqueue(job).await.unwrap(),
        EnqueueOutcome::Enqueued { .. }
    ));
}

#[tokio::test]
async fn index_then_reindex_produces_identical_fact_sets() {
    // Idempotent indexing: same (fqn, content_hash) sets across runs
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/app.py",
        "import json\n\nclass Api:\n    def handle(self):\n        parse()\n\ndef parse():\n    return json.loads('{}')\n",
    );

    let store_a = Arc::new(MockRepoStore::new("robomonkey_a"));
    let store_b = Arc::new(MockRepoStore::new("robomonkey_b"));
    let scanner = Scanner::new(dir.path(), 1024 * 1024);

    indexer(&store_a)
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();
    indexer(&store_b)
        .index_repo(&scanner, &CancellationToken::new())
        .await
        .unwrap();

    let facts = |symbols: Vec<robomonkey_store::SymbolRecord>,
                 chunks: Vec<robomonkey_store::ChunkRecord>| {
        let mut fqns: Vec<String> = symbols.into_iter().map(|s| s.fqn).collect();
        let mut hashes: Vec<String> = chunks.into_iter().map(|c| c.content_hash).collect();
        fqns.sort();
        hashes.sort();
        (fqns, hashes)
    };

    assert_eq!(
        facts(store_a.all_symbols().await, store_a.all_chunks().await),
        facts(store_b.all_symbols().await, store_b.all_chunks().await),
    );
}
