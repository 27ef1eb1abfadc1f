//! Line-delimited JSON-RPC over stdio
//!
//! Requests are one JSON object per line: `{"id", "method", "params"}`.
//! Responses mirror the id with either `result` or
//! `error: {kind, why}`. Dispatch goes through a registry mapping
//! operation name to a handler with a typed, serde-validated input
//! struct; malformed input is answered, never crashed on. Logs go to
//! stderr so stdout stays a clean protocol channel.

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiError, ControlApi};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

type Handler = Arc<
    dyn Fn(Arc<ControlApi>, Value) -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync,
>;

/// Registry mapping operation name -> typed handler
pub struct Registry {
    handlers: HashMap<&'static str, Handler>,
}

/// Register an operation whose params deserialize into a typed struct
macro_rules! operation {
    ($registry:expr, $name:literal, |$api:ident, $params:ident : $ty:ty| $body:expr) => {
        $registry.insert(
            $name,
            Arc::new(move |api: Arc<ControlApi>, raw: Value| {
                Box::pin(async move {
                    let $params: $ty = serde_json::from_value(raw)
                        .map_err(|e| ApiError::BadRequest(format!("params: {e}")))?;
                    let $api = api;
                    $body.await
                }) as BoxFuture<'static, Result<Value, ApiError>>
            }) as Handler,
        );
    };
    ($registry:expr, $name:literal, |$api:ident| $body:expr) => {
        $registry.insert(
            $name,
            Arc::new(move |api: Arc<ControlApi>, _raw: Value| {
                Box::pin(async move {
                    let $api = api;
                    $body.await
                }) as BoxFuture<'static, Result<Value, ApiError>>
            }) as Handler,
        );
    };
}

impl Registry {
    pub fn new() -> Self {
        use crate::api::*;

        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();

        operation!(handlers, "ping", |api| api.ping());
        operation!(handlers, "list_repos", |api| api.list_repos());
        operation!(handlers, "daemon_status", |api| api.daemon_status());
        operation!(handlers, "register_repo", |api, p: RegisterParams| api
            .register_repo(p));
        operation!(handlers, "index_status", |api, p: RepoParams| api
            .index_status(p));
        operation!(handlers, "hybrid_search", |api, p: HybridSearchParams| api
            .hybrid_search(p));
        operation!(handlers, "doc_search", |api, p: DocSearchParams| api
            .doc_search(p));
        operation!(handlers, "symbol_lookup", |api, p: SymbolParams| api
            .symbol_lookup(p));
        operation!(handlers, "symbol_context", |api, p: SymbolContextParams| api
            .symbol_context(p));
        operation!(handlers, "callers", |api, p: SymbolParams| api.callers(p));
        operation!(handlers, "callees", |api, p: SymbolParams| api.callees(p));
        operation!(handlers, "list_tags", |api, p: RepoParams| api.list_tags(p));
        operation!(handlers, "tag_entity", |api, p: TagEntityParams| api
            .tag_entity(p));
        operation!(handlers, "index_repo", |api, p: RepoParams| api
            .enqueue_full_index(p));
        operation!(handlers, "enqueue_reindex_file", |api, p: ReindexFileParams| api
            .enqueue_reindex_file(p));
        operation!(handlers, "enqueue_reindex_many", |api, p: ReindexManyParams| api
            .enqueue_reindex_many(p));

        Self { handlers }
    }

    /// Dispatch one request line to its handler.
    pub async fn dispatch(&self, api: &Arc<ControlApi>, line: &str) -> Value {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return json!({
                    "id": null,
                    "error": { "kind": "BadRequest", "why": format!("malformed request: {e}") },
                });
            }
        };

        let Some(handler) = self.handlers.get(request.method.as_str()) else {
            return json!({
                "id": request.id,
                "error": { "kind": "BadRequest", "why": format!("unknown method: {}", request.method) },
            });
        };

        debug!(method = %request.method, "Dispatching RPC request");
        match handler(Arc::clone(api), request.params).await {
            Ok(result) => json!({ "id": request.id, "result": result }),
            Err(e) => json!({
                "id": request.id,
                "error": { "kind": e.kind(), "why": e.to_string() },
            }),
        }
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve requests from stdin until EOF or cancellation.
///
/// # Errors
///
/// Returns an error only when stdout becomes unwritable.
pub async fn serve_stdio(api: Arc<ControlApi>, cancel: CancellationToken) -> anyhow::Result<()> {
    let registry = Registry::new();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = registry.dispatch(&api, &line).await;
        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        stdout.write_all(payload.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
