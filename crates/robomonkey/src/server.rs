//! Daemon bootstrap and signal-driven shutdown
//!
//! Wires the pool, schema manager, registry, queue, embedding service,
//! worker pool and stdio RPC server together, then runs until SIGINT or
//! SIGTERM. Shutdown is cooperative: the cancellation token propagates
//! into every handler, in-flight jobs get the worker pool's grace period,
//! and anything still claimed becomes re-claimable once the heartbeat
//! goes stale.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::ControlApi;
use crate::rpc::serve_stdio;
use robomonkey_config::ApplicationConfig;
use robomonkey_embeddings::{EmbeddingService, provider_for};
use robomonkey_indexing::{JobContext, PgRepoResolver, WorkerPool};
use robomonkey_parsing::LineParser;
use robomonkey_store::{
    DaemonRegistry, JobQueue, PgJobQueue, RepoRegistry, SchemaManager, initialize_database,
};

/// Shared service wiring used by both the daemon and the one-shot CLI
pub struct Services {
    pub api: Arc<ControlApi>,
    pub queue: Arc<dyn JobQueue>,
    pub schemas: SchemaManager,
    pub registry: RepoRegistry,
    pub embeddings: Arc<EmbeddingService>,
    pub daemons: DaemonRegistry,
}

/// Connect, migrate, and build the service graph.
///
/// # Errors
///
/// Returns an error if the database is unreachable or migrations fail.
pub async fn build_services(config: &ApplicationConfig) -> anyhow::Result<Services> {
    let pool = initialize_database(&config.database).await?;

    let schemas = SchemaManager::new(
        pool.clone(),
        config.database.schema_prefix.clone(),
        config.embeddings.dimension,
    );
    let registry = RepoRegistry::new(pool.clone());
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool.clone()));
    let daemons = DaemonRegistry::new(pool);

    let provider = provider_for(&config.embeddings);
    let embeddings = Arc::new(EmbeddingService::new(provider, &config.embeddings));

    let api = Arc::new(ControlApi {
        config: config.clone(),
        schemas: schemas.clone(),
        registry: registry.clone(),
        queue: Arc::clone(&queue),
        embeddings: Arc::clone(&embeddings),
        daemons: daemons.clone(),
    });

    Ok(Services {
        api,
        queue,
        schemas,
        registry,
        embeddings,
        daemons,
    })
}

fn instance_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("robomonkey-{hostname}-{}", std::process::id())
}

/// Run the daemon: worker pool plus stdio RPC server, until a signal.
///
/// # Errors
///
/// Returns an error if startup wiring fails; runtime errors are handled
/// through queue state, not propagation.
pub async fn run_daemon(config: ApplicationConfig) -> anyhow::Result<()> {
    let services = build_services(&config).await?;
    let cancel = CancellationToken::new();

    let instance = instance_id();
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    services
        .daemons
        .register(&instance, &hostname, std::process::id() as i32)
        .await?;

    let ctx = Arc::new(JobContext {
        config: config.clone(),
        resolver: Arc::new(PgRepoResolver::new(
            services.schemas.clone(),
            services.registry.clone(),
        )),
        queue: Arc::clone(&services.queue),
        embeddings: Arc::clone(&services.embeddings),
        parser: Arc::new(LineParser::new()),
    });

    let pool = Arc::new(WorkerPool::new(
        ctx,
        Some(services.daemons.clone()),
        instance.clone(),
    ));

    let worker_handle = tokio::spawn(Arc::clone(&pool).run(cancel.child_token()));
    let rpc_handle = tokio::spawn(serve_stdio(Arc::clone(&services.api), cancel.child_token()));

    info!(instance = %instance, "Daemon running; serving RPC on stdio");

    shutdown_signal().await;
    info!("Shutdown signal received");
    cancel.cancel();

    // The worker pool drains in-flight jobs within its grace period
    let _ = worker_handle.await;
    let _ = rpc_handle.await;

    services.daemons.set_status(&instance, "STOPPED").await.ok();
    info!("Daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(_) => {
            // Fall back to ctrl-c only
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
