//! Call-graph expansion
//!
//! Breadth-first traversal over CALLS edges from a starting symbol,
//! collecting definition chunks plus one surrounding-file chunk per file,
//! deduplicated by `(file_id, start_line, end_line)` and capped by an
//! estimated token budget. CALLS can form cycles, so traversal keeps a
//! visited set and depth never exceeds two.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{SearchError, SearchResult};
use robomonkey_store::{ChunkRecord, EdgeType, RepoStore, SymbolRecord};

/// Rough token estimate: four characters per token
const CHARS_PER_TOKEN: usize = 4;

/// Maximum traversal depth regardless of the request
const MAX_DEPTH: usize = 2;

/// Which directions to traverse
#[derive(Debug, Clone, Copy)]
pub struct Direction {
    pub callers: bool,
    pub callees: bool,
}

impl Direction {
    pub fn both() -> Self {
        Self {
            callers: true,
            callees: true,
        }
    }
}

/// One packed context piece
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContextChunk {
    pub symbol_fqn: Option<String>,
    pub file_path: String,
    pub start_line: i32,
    pub end_line: i32,
    pub content: String,
    /// BFS distance of the owning symbol from the start
    pub layer: usize,
}

/// The packed expansion result
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ContextPack {
    pub chunks: Vec<ContextChunk>,
    pub estimated_tokens: usize,
    pub symbols_visited: usize,
    pub truncated: bool,
}

/// Expands call graphs under a token budget
pub struct GraphExpander {
    store: Arc<dyn RepoStore>,
    budget_tokens: usize,
}

impl GraphExpander {
    pub fn new(store: Arc<dyn RepoStore>, budget_tokens: usize) -> Self {
        Self {
            store,
            budget_tokens,
        }
    }

    /// Direct callers of a symbol (one hop, CALLS edges pointing at it).
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn callers(&self, symbol_id: Uuid) -> SearchResult<Vec<SymbolRecord>> {
        let edges = self.store.edges_to(symbol_id, EdgeType::Calls).await?;
        self.resolve_symbols(edges.iter().map(|e| e.src_symbol_id)).await
    }

    /// Direct callees of a symbol (one hop, CALLS edges leaving it).
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn callees(&self, symbol_id: Uuid) -> SearchResult<Vec<SymbolRecord>> {
        let edges = self.store.edges_from(symbol_id, EdgeType::Calls).await?;
        self.resolve_symbols(edges.iter().map(|e| e.dst_symbol_id)).await
    }

    async fn resolve_symbols(
        &self,
        ids: impl Iterator<Item = Uuid>,
    ) -> SearchResult<Vec<SymbolRecord>> {
        let mut symbols = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(symbol) = self.store.symbol_by_id(id).await? {
                symbols.push(symbol);
            }
        }
        symbols.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        Ok(symbols)
    }

    /// BFS expansion from `start_id` up to `depth` (clamped to 2),
    /// packing context until the token budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` for an unknown start, or a store error.
    #[tracing::instrument(skip(self), fields(start = %start_id, depth))]
    pub async fn expand(
        &self,
        start_id: Uuid,
        depth: usize,
        direction: Direction,
    ) -> SearchResult<ContextPack> {
        let depth = depth.clamp(1, MAX_DEPTH);

        let start = self
            .store
            .symbol_by_id(start_id)
            .await?
            .ok_or_else(|| SearchError::SymbolNotFound {
                key: start_id.to_string(),
            })?;

        // BFS with a visited set; CALLS cycles terminate on revisit
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut layers: Vec<Vec<SymbolRecord>> = vec![vec![start.clone()]];
        visited.insert(start.id);

        let mut frontier = VecDeque::from([start.id]);
        for _ in 0..depth {
            let mut next_layer = Vec::new();
            let mut next_frontier = VecDeque::new();

            while let Some(current) = frontier.pop_front() {
                let mut neighbors: Vec<Uuid> = Vec::new();
                if direction.callees {
                    neighbors.extend(
                        self.store
                            .edges_from(current, EdgeType::Calls)
                            .await?
                            .into_iter()
                            .map(|e| e.dst_symbol_id),
                    );
                }
                if direction.callers {
                    neighbors.extend(
                        self.store
                            .edges_to(current, EdgeType::Calls)
                            .await?
                            .into_iter()
                            .map(|e| e.src_symbol_id),
                    );
                }

                for neighbor in neighbors {
                    if !visited.insert(neighbor) {
                        continue;
                    }
                    if let Some(symbol) = self.store.symbol_by_id(neighbor).await? {
                        next_frontier.push_back(symbol.id);
                        next_layer.push(symbol);
                    }
                }
            }

            if next_layer.is_empty() {
                break;
            }
            layers.push(next_layer);
            frontier = next_frontier;
        }

        self.pack(layers).await
    }

    /// Collect definition chunks plus one file-header chunk per file, in
    /// deterministic order: BFS layer, then file path, then start line.
    async fn pack(&self, layers: Vec<Vec<SymbolRecord>>) -> SearchResult<ContextPack> {
        let mut pack = ContextPack::default();
        let mut seen_spans: HashSet<(Uuid, i32, i32)> = HashSet::new();
        let mut seen_header_files: HashSet<Uuid> = HashSet::new();
        let mut path_cache: HashMap<Uuid, String> = HashMap::new();

        for (layer_idx, layer) in layers.iter().enumerate() {
            let mut layer_chunks: Vec<(String, ChunkRecord, Option<String>)> = Vec::new();

            for symbol in layer {
                pack.symbols_visited += 1;
                let path = self.file_path(&mut path_cache, symbol.file_id).await?;

                for chunk in self.store.chunks_for_symbol(symbol.id).await? {
                    layer_chunks.push((path.clone(), chunk, Some(symbol.fqn.clone())));
                }

                if seen_header_files.insert(symbol.file_id)
                    && let Some(header) = self.store.header_chunk(symbol.file_id).await?
                {
                    layer_chunks.push((path.clone(), header, None));
                }
            }

            layer_chunks.sort_by(|a, b| {
                a.0.cmp(&b.0)
                    .then(a.1.start_line.cmp(&b.1.start_line))
                    .then(a.1.end_line.cmp(&b.1.end_line))
            });

            for (path, chunk, fqn) in layer_chunks {
                if !seen_spans.insert((chunk.file_id, chunk.start_line, chunk.end_line)) {
                    continue;
                }
                let tokens = chunk.content.len() / CHARS_PER_TOKEN;
                if pack.estimated_tokens + tokens > self.budget_tokens {
                    pack.truncated = true;
                    return Ok(pack);
                }
                pack.estimated_tokens += tokens;
                pack.chunks.push(ContextChunk {
                    symbol_fqn: fqn,
                    file_path: path,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    content: chunk.content,
                    layer: layer_idx,
                });
            }
        }

        Ok(pack)
    }

    async fn file_path(
        &self,
        cache: &mut HashMap<Uuid, String>,
        file_id: Uuid,
    ) -> SearchResult<String> {
        if let Some(path) = cache.get(&file_id) {
            return Ok(path.clone());
        }
        let path = self
            .store
            .file_by_id(file_id)
            .await?
            .map(|f| f.relative_path)
            .unwrap_or_default();
        cache.insert(file_id, path.clone());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robomonkey_store::MockRepoStore;

    /// Seed a three-function chain a -> b -> c plus a cycle c -> a
    async fn seeded() -> (Arc<MockRepoStore>, Uuid, Uuid, Uuid) {
        use self::shim::index_python;

        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        index_python(
            &store,
            "chain.py",
            "def a():\n    b()\n\ndef b():\n    c()\n\ndef c():\n    a()\n",
        )
        .await;

        let a = store.symbol_by_fqn("chain.a").await.unwrap().unwrap().id;
        let b = store.symbol_by_fqn("chain.b").await.unwrap().unwrap().id;
        let c = store.symbol_by_fqn("chain.c").await.unwrap().unwrap().id;
        (store, a, b, c)
    }

    /// Minimal indexing shim for graph tests, kept local to avoid a dev
    /// dependency cycle with robomonkey-indexing.
    mod shim {
        use super::*;
        use robomonkey_common::content_hash;
        use robomonkey_store::{
            EdgeIntent, EdgeType, NewChunk, NewFile, NewSymbol, SymbolKind,
        };

        pub async fn index_python(store: &Arc<MockRepoStore>, path: &str, content: &str) {
            // Hand-rolled extraction of `def name():` blocks calling one
            // function each; enough structure for BFS tests.
            let module = path.trim_end_matches(".py").replace('/', ".");
            let lines: Vec<&str> = content.lines().collect();

            let mut symbols = Vec::new();
            let mut chunks = Vec::new();
            let mut edges = Vec::new();

            for (i, line) in lines.iter().enumerate() {
                let Some(name) = line.strip_prefix("def ").and_then(|r| r.split('(').next())
                else {
                    continue;
                };
                let body = format!("{}\n{}", line, lines.get(i + 1).unwrap_or(&""));
                let fqn = format!("{module}.{name}");

                symbols.push(NewSymbol {
                    fqn: fqn.clone(),
                    name: name.to_string(),
                    kind: SymbolKind::Function,
                    signature: Some(line.to_string()),
                    docstring: None,
                    start_line: (i + 1) as i32,
                    end_line: (i + 2) as i32,
                    content_hash: content_hash(&body),
                });
                chunks.push(NewChunk {
                    symbol_fqn: Some(fqn.clone()),
                    start_line: (i + 1) as i32,
                    end_line: (i + 2) as i32,
                    content_hash: content_hash(&body),
                    content: body,
                });

                if let Some(callee) = lines
                    .get(i + 1)
                    .map(|l| l.trim().trim_end_matches("()"))
                    .filter(|c| !c.is_empty() && *c != "pass")
                {
                    edges.push(EdgeIntent {
                        src_fqn: fqn,
                        dst_name: callee.to_string(),
                        edge_type: EdgeType::Calls,
                        evidence_start_line: (i + 2) as i32,
                        evidence_end_line: (i + 2) as i32,
                    });
                }
            }

            store
                .apply_file_index(
                    NewFile {
                        relative_path: path.to_string(),
                        language: "python".into(),
                        content_sha: content_hash(content),
                        mtime: None,
                    },
                    symbols,
                    chunks,
                    edges,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_callers_and_callees_single_hop() {
        let (store, a, b, _c) = seeded().await;
        let expander = GraphExpander::new(store as Arc<dyn RepoStore>, 12_000);

        let callees = expander.callees(a).await.unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].fqn, "chain.b");

        let callers = expander.callers(b).await.unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].fqn, "chain.a");
    }

    #[tokio::test]
    async fn test_expand_handles_cycles() {
        let (store, a, _b, _c) = seeded().await;
        let expander = GraphExpander::new(store as Arc<dyn RepoStore>, 12_000);

        // a -> b -> c -> a is a cycle; depth 2 must terminate and visit
        // each symbol at most once
        let pack = expander.expand(a, 2, Direction::both()).await.unwrap();
        assert_eq!(pack.symbols_visited, 3);
        assert!(!pack.truncated);

        let fqns: Vec<_> = pack.chunks.iter().filter_map(|c| c.symbol_fqn.clone()).collect();
        assert_eq!(
            fqns.iter().collect::<std::collections::HashSet<_>>().len(),
            fqns.len(),
            "no duplicate definition chunks"
        );
    }

    #[tokio::test]
    async fn test_expand_depth_one_stops_early() {
        let (store, a, _b, _c) = seeded().await;
        let expander = GraphExpander::new(store as Arc<dyn RepoStore>, 12_000);

        let pack = expander.expand(a, 1, Direction { callers: false, callees: true })
            .await
            .unwrap();
        // a plus its direct callee b; c is two hops out
        assert_eq!(pack.symbols_visited, 2);
    }

    #[tokio::test]
    async fn test_budget_truncates_pack() {
        let (store, a, _b, _c) = seeded().await;
        // Budget of ~1 token forces truncation immediately
        let expander = GraphExpander::new(store as Arc<dyn RepoStore>, 1);

        let pack = expander.expand(a, 2, Direction::both()).await.unwrap();
        assert!(pack.truncated);
        assert!(pack.estimated_tokens <= 1);
    }

    #[tokio::test]
    async fn test_unknown_start_symbol_errors() {
        let (store, _a, _b, _c) = seeded().await;
        let expander = GraphExpander::new(store as Arc<dyn RepoStore>, 12_000);

        let result = expander.expand(Uuid::new_v4(), 2, Direction::both()).await;
        assert!(matches!(result, Err(SearchError::SymbolNotFound { .. })));
    }

    #[tokio::test]
    async fn test_layer_ordering_is_deterministic() {
        let (store, a, _b, _c) = seeded().await;
        let expander = GraphExpander::new(store as Arc<dyn RepoStore>, 12_000);

        let first = expander.expand(a, 2, Direction::both()).await.unwrap();
        let second = expander.expand(a, 2, Direction::both()).await.unwrap();

        let spans = |p: &ContextPack| {
            p.chunks
                .iter()
                .map(|c| (c.layer, c.file_path.clone(), c.start_line))
                .collect::<Vec<_>>()
        };
        assert_eq!(spans(&first), spans(&second));

        // Layers are non-decreasing through the pack
        for pair in first.chunks.windows(2) {
            assert!(pair[0].layer <= pair[1].layer);
        }
    }
}
