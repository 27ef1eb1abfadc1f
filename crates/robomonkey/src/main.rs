//! robomonkey: local-first code intelligence service
//!
//! `serve` runs the daemon (worker pool + stdio JSON-RPC); the other
//! subcommands are one-shot wrappers over the same control API.

mod api;
mod rpc;
mod server;

use clap::{Parser, Subcommand};

use robomonkey_config::ApplicationConfig;

#[derive(Parser)]
#[command(
    name = "robomonkey",
    about = "Local-first code intelligence: index repositories, serve hybrid retrieval",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: worker pool and line-delimited JSON-RPC on stdio
    Serve,

    /// Register a repository and create its schema
    Register {
        /// Repository name (unique)
        name: String,
        /// Absolute path to the repository root
        path: String,
        /// Recreate the schema if it already exists under a different root
        #[arg(long)]
        force: bool,
    },

    /// Enqueue a full index of a repository
    Index {
        /// Repository name
        repo: String,
    },

    /// Hybrid search over an indexed repository
    Search {
        /// Repository name
        repo: String,
        /// Query text
        query: String,
        /// Number of results
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show indexing state and recent jobs for a repository
    Status {
        /// Repository name
        repo: String,
    },

    /// List registered repositories
    Repos,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    robomonkey_common::init::initialize_environment();
    robomonkey_common::tracing::init_tracing();

    let cli = Cli::parse();
    let config = ApplicationConfig::from_env()?;

    match cli.command {
        Command::Serve => server::run_daemon(config).await,
        command => one_shot(config, command).await,
    }
}

async fn one_shot(config: ApplicationConfig, command: Command) -> anyhow::Result<()> {
    let services = server::build_services(&config).await?;
    let api = services.api;

    let result = match command {
        Command::Serve => unreachable!("handled by caller"),
        Command::Register { name, path, force } => {
            let root = std::fs::canonicalize(&path)
                .map_err(|e| anyhow::anyhow!("invalid path {path}: {e}"))?;
            api.register_repo(api::RegisterParams {
                name,
                root_path: root.to_string_lossy().into_owned(),
                force,
            })
            .await
        }
        Command::Index { repo } => api.enqueue_full_index(api::RepoParams { repo }).await,
        Command::Search { repo, query, top_k } => {
            api.hybrid_search(api::HybridSearchParams {
                repo,
                query,
                filters: robomonkey_search::SearchFilters::default(),
                top_k,
            })
            .await
        }
        Command::Status { repo } => api.index_status(api::RepoParams { repo }).await,
        Command::Repos => api.list_repos().await,
    };

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            let error = serde_json::json!({ "error": { "kind": e.kind(), "why": e.to_string() } });
            println!("{}", serde_json::to_string_pretty(&error)?);
            std::process::exit(1);
        }
    }
}
