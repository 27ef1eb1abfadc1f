//! Rule-based tagging
//!
//! Tag rules attach tags to entities: PATH rules glob file paths, REGEX
//! rules match chunk content, SYMBOL rules match symbol names, and IMPORT
//! rules match the file-header chunk (which carries the import lines).
//! Applied tags carry `RULE_BASED` source and the rule weight as
//! confidence; re-running is idempotent.

use regex::Regex;
use std::sync::Arc;

use crate::error::{IndexError, IndexResult};
use robomonkey_store::{EntityType, RepoStore, TagMatchType, TagRule, TagSource};

const PAGE: i64 = 500;

/// Aggregate result of a rule sync
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TagSyncStats {
    pub rules: usize,
    pub files_tagged: usize,
    pub chunks_tagged: usize,
    pub symbols_tagged: usize,
}

/// Convert a path glob to an anchored regex: `**` crosses separators,
/// `*` stays within one segment, `?` is one character.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` also matches the empty prefix
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push('.'),
            c if "\\.+()[]{}|^$".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out)
}

/// Applies tag rules across a repository's entities
pub struct Tagger {
    store: Arc<dyn RepoStore>,
}

impl Tagger {
    pub fn new(store: Arc<dyn RepoStore>) -> Self {
        Self { store }
    }

    /// Apply every stored rule.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails; an invalid rule pattern is
    /// logged and skipped rather than aborting the sync.
    pub async fn sync_rules(&self) -> IndexResult<TagSyncStats> {
        let rules = self.store.tag_rules().await?;
        let mut stats = TagSyncStats {
            rules: rules.len(),
            ..TagSyncStats::default()
        };

        for rule in &rules {
            match self.apply_rule(rule, &mut stats).await {
                Ok(()) => {}
                Err(IndexError::Payload(message)) => {
                    tracing::warn!(rule = %rule.pattern, %message, "Skipping invalid tag rule");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }

    async fn apply_rule(&self, rule: &TagRule, stats: &mut TagSyncStats) -> IndexResult<()> {
        match rule.match_type {
            TagMatchType::Path => self.apply_path_rule(rule, stats).await,
            TagMatchType::Regex => self.apply_regex_rule(rule, stats).await,
            TagMatchType::Symbol => self.apply_symbol_rule(rule, stats).await,
            TagMatchType::Import => self.apply_import_rule(rule, stats).await,
        }
    }

    async fn apply_path_rule(&self, rule: &TagRule, stats: &mut TagSyncStats) -> IndexResult<()> {
        let matcher = glob_to_regex(&rule.pattern)
            .map_err(|e| IndexError::Payload(format!("bad glob: {e}")))?;

        for file in self.store.list_files().await? {
            if matcher.is_match(&file.relative_path) {
                self.store
                    .tag_entity(
                        EntityType::File,
                        file.id,
                        &rule.tag_name,
                        TagSource::RuleBased,
                        rule.weight,
                    )
                    .await?;
                stats.files_tagged += 1;
            }
        }
        Ok(())
    }

    async fn apply_regex_rule(&self, rule: &TagRule, stats: &mut TagSyncStats) -> IndexResult<()> {
        let matcher = Regex::new(&rule.pattern)
            .map_err(|e| IndexError::Payload(format!("bad regex: {e}")))?;

        let mut offset = 0;
        loop {
            let chunks = self.store.list_chunks(PAGE, offset).await?;
            if chunks.is_empty() {
                break;
            }
            offset += chunks.len() as i64;

            for chunk in chunks {
                if matcher.is_match(&chunk.content) {
                    self.store
                        .tag_entity(
                            EntityType::Chunk,
                            chunk.id,
                            &rule.tag_name,
                            TagSource::RuleBased,
                            rule.weight,
                        )
                        .await?;
                    stats.chunks_tagged += 1;
                }
            }
        }
        Ok(())
    }

    async fn apply_symbol_rule(&self, rule: &TagRule, stats: &mut TagSyncStats) -> IndexResult<()> {
        let matcher = glob_to_regex(&rule.pattern)
            .map_err(|e| IndexError::Payload(format!("bad pattern: {e}")))?;

        let mut offset = 0;
        loop {
            let symbols = self.store.list_symbols(PAGE, offset).await?;
            if symbols.is_empty() {
                break;
            }
            offset += symbols.len() as i64;

            for symbol in symbols {
                if matcher.is_match(&symbol.name) {
                    self.store
                        .tag_entity(
                            EntityType::Symbol,
                            symbol.id,
                            &rule.tag_name,
                            TagSource::RuleBased,
                            rule.weight,
                        )
                        .await?;
                    stats.symbols_tagged += 1;
                }
            }
        }
        Ok(())
    }

    /// Imports live in the file-header chunk; a file whose header mentions
    /// the pattern gets the tag.
    async fn apply_import_rule(&self, rule: &TagRule, stats: &mut TagSyncStats) -> IndexResult<()> {
        for file in self.store.list_files().await? {
            let Some(header) = self.store.header_chunk(file.id).await? else {
                continue;
            };
            if header.content.contains(&rule.pattern) {
                self.store
                    .tag_entity(
                        EntityType::File,
                        file.id,
                        &rule.tag_name,
                        TagSource::RuleBased,
                        rule.weight,
                    )
                    .await?;
                stats.files_tagged += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::indexer::Indexer;
    use crate::scanner::ScannedFile;
    use robomonkey_parsing::LineParser;
    use robomonkey_store::{MockRepoStore, TagRule};
    use uuid::Uuid;

    fn rule(match_type: TagMatchType, pattern: &str, tag: &str) -> TagRule {
        TagRule {
            id: Uuid::new_v4(),
            tag_id: Uuid::new_v4(),
            tag_name: tag.to_string(),
            match_type,
            pattern: pattern.to_string(),
            weight: 0.8,
        }
    }

    async fn seeded_store() -> Arc<MockRepoStore> {
        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let indexer = Indexer::new(
            Arc::clone(&store) as Arc<dyn RepoStore>,
            Arc::new(LineParser::new()),
            Chunker::new(7000, 500),
        );
        indexer
            .index_file(
                &ScannedFile {
                    relative_path: "src/db/client.py".into(),
                    language: "python".into(),
                    mtime: None,
                },
                "import psycopg\n\ndef query_db():\n    return psycopg.connect()\n",
            )
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_glob_conversion() {
        let matcher = glob_to_regex("src/**/*.py").unwrap();
        assert!(matcher.is_match("src/db/client.py"));
        assert!(matcher.is_match("src/client.py"));
        assert!(!matcher.is_match("lib/client.py"));
        assert!(!matcher.is_match("src/client.rs"));

        let single = glob_to_regex("*.py").unwrap();
        assert!(single.is_match("client.py"));
        assert!(!single.is_match("src/client.py"));
    }

    #[tokio::test]
    async fn test_path_rule_tags_files() {
        let store = seeded_store().await;
        store
            .add_tag_rule(rule(TagMatchType::Path, "src/db/**", "database"))
            .await;

        let tagger = Tagger::new(Arc::clone(&store) as Arc<dyn RepoStore>);
        let stats = tagger.sync_rules().await.unwrap();
        assert_eq!(stats.files_tagged, 1);

        let file = store.file_by_path("src/db/client.py").await.unwrap().unwrap();
        let tags = store
            .tags_for_entity(EntityType::File, file.id)
            .await
            .unwrap();
        assert_eq!(tags, vec!["database"]);
    }

    #[tokio::test]
    async fn test_import_rule_matches_header_chunk() {
        let store = seeded_store().await;
        store
            .add_tag_rule(rule(TagMatchType::Import, "psycopg", "postgres"))
            .await;

        let tagger = Tagger::new(Arc::clone(&store) as Arc<dyn RepoStore>);
        let stats = tagger.sync_rules().await.unwrap();
        assert_eq!(stats.files_tagged, 1);
    }

    #[tokio::test]
    async fn test_symbol_rule_tags_symbols() {
        let store = seeded_store().await;
        store
            .add_tag_rule(rule(TagMatchType::Symbol, "query_*", "query-layer"))
            .await;

        let tagger = Tagger::new(Arc::clone(&store) as Arc<dyn RepoStore>);
        let stats = tagger.sync_rules().await.unwrap();
        assert_eq!(stats.symbols_tagged, 1);
    }

    #[tokio::test]
    async fn test_invalid_regex_rule_is_skipped_not_fatal() {
        let store = seeded_store().await;
        store
            .add_tag_rule(rule(TagMatchType::Regex, "([unclosed", "broken"))
            .await;
        store
            .add_tag_rule(rule(TagMatchType::Regex, "connect", "connector"))
            .await;

        let tagger = Tagger::new(Arc::clone(&store) as Arc<dyn RepoStore>);
        let stats = tagger.sync_rules().await.unwrap();
        assert!(stats.chunks_tagged >= 1, "valid rule still applied");
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let store = seeded_store().await;
        store
            .add_tag_rule(rule(TagMatchType::Path, "src/**", "source"))
            .await;

        let tagger = Tagger::new(Arc::clone(&store) as Arc<dyn RepoStore>);
        tagger.sync_rules().await.unwrap();
        tagger.sync_rules().await.unwrap();

        let file = store.file_by_path("src/db/client.py").await.unwrap().unwrap();
        let tags = store
            .tags_for_entity(EntityType::File, file.id)
            .await
            .unwrap();
        assert_eq!(tags.len(), 1, "no duplicate entity tags");
    }
}
