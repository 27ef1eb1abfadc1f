//! Worker pool
//!
//! A pool of cooperative tasks drains the durable queue under a global
//! concurrency cap and a per-repository cap. The per-repo cap keeps one
//! large repository from starving the others: repositories already at
//! their cap are excluded from the claim query, and jobs are claimed one
//! at a time so the exclusion set stays current within a poll round.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{JobContext, error_detail, handlers::handle_job};
use robomonkey_store::{DaemonRegistry, JobRecord, JobType};

/// How long in-flight jobs get to finish after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Queue maintenance cadence, in poll rounds
const REAP_EVERY_ROUNDS: u64 = 6;
const CLEANUP_EVERY_ROUNDS: u64 = 720;

/// The worker pool draining the control-plane queue
pub struct WorkerPool {
    ctx: Arc<JobContext>,
    daemons: Option<DaemonRegistry>,
    instance_id: String,
    per_repo: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<JobContext>, daemons: Option<DaemonRegistry>, instance_id: String) -> Self {
        Self {
            ctx,
            daemons,
            instance_id,
            per_repo: Arc::new(Mutex::new(HashMap::new())),
            total: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Claim jobs for one poll round, honoring both caps. Jobs are
    /// claimed one at a time so a repo reaching its cap mid-round is
    /// excluded from the next claim.
    pub async fn claim_round(&self) -> Vec<JobRecord> {
        let global_cap = self.ctx.config.daemon.global_max_concurrent;
        let per_repo_cap = self.ctx.config.daemon.max_concurrent_per_repo;
        let mut claimed: Vec<JobRecord> = Vec::new();

        loop {
            let in_flight = self.total.load(Ordering::SeqCst) + claimed.len();
            if in_flight >= global_cap {
                break;
            }

            let excluded: Vec<String> = {
                let counts = self.per_repo.lock().await;
                let mut at_cap: Vec<String> = counts
                    .iter()
                    .filter(|&(_, &n)| n >= per_repo_cap)
                    .map(|(repo, _)| repo.clone())
                    .collect();
                for job in &claimed {
                    let already = counts.get(&job.repo_name).copied().unwrap_or(0)
                        + claimed.iter().filter(|j| j.repo_name == job.repo_name).count();
                    if already >= per_repo_cap && !at_cap.contains(&job.repo_name) {
                        at_cap.push(job.repo_name.clone());
                    }
                }
                at_cap
            };

            match self
                .ctx
                .queue
                .claim(&self.instance_id, &JobType::ALL, &excluded, 1)
                .await
            {
                Ok(mut jobs) if !jobs.is_empty() => claimed.append(&mut jobs),
                Ok(_) => break,
                Err(e) => {
                    warn!(error = %e, "Claim failed, backing off until next poll");
                    break;
                }
            }
        }

        claimed
    }

    /// Execute one claimed job to completion: handler, then the matching
    /// queue transition. Errors are converted into queue state, never
    /// propagated.
    pub async fn execute(&self, job: JobRecord, cancel: CancellationToken) {
        let started = std::time::Instant::now();
        tracing::debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            repo = %job.repo_name,
            attempt = job.attempts,
            "Job started"
        );

        match handle_job(&self.ctx, &job, &cancel).await {
            Ok(result) => {
                if let Err(e) = self.ctx.queue.complete(job.id, &self.instance_id).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job done");
                } else {
                    info!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        repo = %job.repo_name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        result = %result,
                        "Job completed"
                    );
                }
            }
            Err(e) => {
                let short = e.to_string();
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    repo = %job.repo_name,
                    error = %short,
                    "Job failed"
                );
                if let Err(qe) = self
                    .ctx
                    .queue
                    .fail(job.id, &self.instance_id, &short, Some(error_detail(&e)))
                    .await
                {
                    error!(job_id = %job.id, error = %qe, "Failed to mark job failed");
                }
            }
        }
    }

    async fn track(&self, repo_name: &str) {
        self.total.fetch_add(1, Ordering::SeqCst);
        let mut counts = self.per_repo.lock().await;
        *counts.entry(repo_name.to_string()).or_insert(0) += 1;
    }

    async fn untrack(&self, repo_name: &str) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        let mut counts = self.per_repo.lock().await;
        if let Some(n) = counts.get_mut(repo_name) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                counts.remove(repo_name);
            }
        }
    }

    /// Main loop: poll, claim, dispatch, heartbeat, reap, clean up.
    /// Returns after a graceful shutdown when `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let poll_interval = Duration::from_secs(self.ctx.config.daemon.poll_interval_sec.max(1));
        let heartbeat_interval =
            Duration::from_secs(self.ctx.config.daemon.heartbeat_interval_sec.max(1));

        info!(
            instance = %self.instance_id,
            global_cap = self.ctx.config.daemon.global_max_concurrent,
            per_repo_cap = self.ctx.config.daemon.max_concurrent_per_repo,
            "Worker pool started"
        );

        let mut join_set: JoinSet<String> = JoinSet::new();
        let mut poll = tokio::time::interval(poll_interval);
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        let mut rounds: u64 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                _ = heartbeat.tick() => {
                    if let Some(daemons) = &self.daemons
                        && let Err(e) = daemons.heartbeat(&self.instance_id).await
                    {
                        warn!(error = %e, "Heartbeat failed");
                    }
                }

                _ = poll.tick() => {
                    rounds += 1;
                    self.maintenance(rounds).await;

                    for job in self.claim_round().await {
                        let repo_name = job.repo_name.clone();
                        self.track(&repo_name).await;

                        let pool = Arc::clone(&self);
                        let job_cancel = cancel.child_token();
                        join_set.spawn(async move {
                            pool.execute(job, job_cancel).await;
                            repo_name
                        });
                    }
                }

                Some(finished) = join_set.join_next(), if !join_set.is_empty() => {
                    match finished {
                        Ok(repo_name) => self.untrack(&repo_name).await,
                        Err(e) => {
                            error!(error = %e, "Worker task panicked");
                            // Counters re-sync from the queue at next claim;
                            // the panicked job is reaped via dead threshold
                        }
                    }
                }
            }
        }

        self.shutdown(join_set).await;
    }

    async fn maintenance(&self, rounds: u64) {
        if rounds % REAP_EVERY_ROUNDS == 0 {
            if let Err(e) = self
                .ctx
                .queue
                .reap_dead(self.ctx.config.daemon.dead_threshold_sec)
                .await
            {
                warn!(error = %e, "Reaper pass failed");
            }
        }
        if rounds % CLEANUP_EVERY_ROUNDS == 0 {
            match self
                .ctx
                .queue
                .cleanup(self.ctx.config.daemon.retention_days)
                .await
            {
                Ok(removed) if removed > 0 => info!(removed, "Cleaned up finished jobs"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Cleanup pass failed"),
            }
        }
    }

    async fn shutdown(&self, mut join_set: JoinSet<String>) {
        info!(
            in_flight = join_set.len(),
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Shutting down worker pool"
        );

        if let Some(daemons) = &self.daemons
            && let Err(e) = daemons.set_status(&self.instance_id, "STOPPING").await
        {
            warn!(error = %e, "Failed to advertise STOPPING status");
        }

        // In-flight jobs get the grace period; anything still claimed
        // after we exit becomes re-claimable once the heartbeat goes stale.
        let drain = async {
            while let Some(finished) = join_set.join_next().await {
                if let Ok(repo_name) = finished {
                    self.untrack(&repo_name).await;
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Grace period elapsed with jobs still in flight");
            join_set.abort_all();
        }

        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robomonkey_config::ApplicationConfig;
    use robomonkey_embeddings::{EmbeddingProvider, EmbeddingResult, EmbeddingService};
    use robomonkey_parsing::LineParser;
    use robomonkey_store::{
        EnqueueOutcome, JobQueue, JobStatus, MockJobQueue, MockRepoStore, NewJob, RepoStore,
    };
    use std::path::PathBuf;

    struct NullProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }
        fn model_id(&self) -> &str {
            "null"
        }
        fn dimensions(&self) -> usize {
            4
        }
        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }
    }

    struct MockResolver {
        root: PathBuf,
        store: Arc<MockRepoStore>,
    }

    #[async_trait::async_trait]
    impl super::super::RepoResolver for MockResolver {
        async fn open(&self, _repo_name: &str) -> crate::error::IndexResult<super::super::OpenedRepo> {
            Ok(super::super::OpenedRepo {
                store: Arc::clone(&self.store) as Arc<dyn RepoStore>,
                root_path: self.root.clone(),
                auto_embed: false,
            })
        }
    }

    fn pool_with(
        queue: Arc<MockJobQueue>,
        store: Arc<MockRepoStore>,
        root: PathBuf,
        global_cap: usize,
        per_repo_cap: usize,
    ) -> WorkerPool {
        let mut config = ApplicationConfig::default();
        config.daemon.global_max_concurrent = global_cap;
        config.daemon.max_concurrent_per_repo = per_repo_cap;

        let embeddings_config = config.embeddings.clone();
        let ctx = Arc::new(JobContext {
            config,
            resolver: Arc::new(MockResolver { root, store }),
            queue,
            embeddings: Arc::new(EmbeddingService::new(
                Arc::new(NullProvider),
                &embeddings_config,
            )),
            parser: Arc::new(LineParser::new()),
        });

        WorkerPool::new(ctx, None, "test-worker".to_string())
    }

    #[tokio::test]
    async fn test_claim_round_respects_per_repo_cap() {
        let queue = Arc::new(MockJobQueue::new());
        for _ in 0..4 {
            queue
                .enqueue(NewJob::new("big", "robomonkey_big", JobType::EmbedMissing))
                .await
                .unwrap();
        }
        queue
            .enqueue(NewJob::new("small", "robomonkey_small", JobType::EmbedMissing))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockRepoStore::new("robomonkey_big"));
        let pool = pool_with(
            Arc::clone(&queue),
            store,
            dir.path().to_path_buf(),
            4,
            2,
        );

        let claimed = pool.claim_round().await;
        assert_eq!(claimed.len(), 3, "2 from big (cap) + 1 from small");
        let big_jobs = claimed.iter().filter(|j| j.repo_name == "big").count();
        assert_eq!(big_jobs, 2, "per-repo cap holds within one round");
    }

    #[tokio::test]
    async fn test_execute_completes_successful_job() {
        let queue = Arc::new(MockJobQueue::new());
        queue
            .enqueue(
                NewJob::new("demo", "robomonkey_demo", JobType::EmbedMissing)
                    .with_dedup_key("embed-missing"),
            )
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let pool = pool_with(Arc::clone(&queue), store, dir.path().to_path_buf(), 4, 2);

        let claimed = pool.claim_round().await;
        assert_eq!(claimed.len(), 1);
        pool.execute(claimed.into_iter().next().unwrap(), CancellationToken::new())
            .await;

        let jobs = queue.snapshot().await;
        assert_eq!(jobs[0].status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_execute_fails_job_with_bad_payload() {
        let queue = Arc::new(MockJobQueue::new());
        let EnqueueOutcome::Enqueued { job_id } = queue
            .enqueue(
                NewJob::new("demo", "robomonkey_demo", JobType::ReindexFile)
                    .with_payload(serde_json::json!({ "wrong": true })),
            )
            .await
            .unwrap()
        else {
            panic!("expected enqueue");
        };

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let pool = pool_with(Arc::clone(&queue), store, dir.path().to_path_buf(), 4, 2);

        let claimed = pool.claim_round().await;
        pool.execute(claimed.into_iter().next().unwrap(), CancellationToken::new())
            .await;

        let job = queue
            .snapshot()
            .await
            .into_iter()
            .find(|j| j.id == job_id)
            .unwrap();
        // Failed once, retry budget remains: back to PENDING with backoff
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.as_deref().is_some_and(|e| e.contains("payload")));
    }

    #[tokio::test]
    async fn test_full_index_job_end_to_end_with_mock_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.py"),
            "def alpha():\n    beta()\n\ndef beta():\n    pass\n",
        )
        .unwrap();

        let queue = Arc::new(MockJobQueue::new());
        queue
            .enqueue(
                NewJob::new("demo", "robomonkey_demo", JobType::FullIndex)
                    .with_dedup_key("full-index"),
            )
            .await
            .unwrap();

        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let pool = pool_with(
            Arc::clone(&queue),
            Arc::clone(&store),
            dir.path().to_path_buf(),
            4,
            2,
        );

        let claimed = pool.claim_round().await;
        pool.execute(claimed.into_iter().next().unwrap(), CancellationToken::new())
            .await;

        assert_eq!(queue.snapshot().await[0].status, JobStatus::Done);
        assert_eq!(store.all_symbols().await.len(), 2);
        assert!(!store.all_chunks().await.is_empty());
    }
}
