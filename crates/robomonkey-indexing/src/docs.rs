//! Documentation scan
//!
//! Indexes README* and docs/** files into `document` rows with the same
//! content-hash short-circuit as code files: an unchanged document keeps
//! its row and its embedding.

use std::sync::Arc;

use crate::error::IndexResult;
use crate::scanner::Scanner;
use robomonkey_common::content_hash;
use robomonkey_store::{DocSource, DocType, DocumentUpsert, NewDocument, RepoStore};

/// Aggregate result of a docs scan
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DocsScanStats {
    pub seen: usize,
    pub written: usize,
    pub unchanged: usize,
}

/// Scans and stores human documentation files
pub struct DocsIndexer {
    store: Arc<dyn RepoStore>,
}

impl DocsIndexer {
    pub fn new(store: Arc<dyn RepoStore>) -> Self {
        Self { store }
    }

    /// Walk the repository for documentation files and upsert them.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails; unreadable files are
    /// skipped.
    pub async fn scan(&self, scanner: &Scanner) -> IndexResult<DocsScanStats> {
        let docs = scanner.scan_docs();
        let mut stats = DocsScanStats {
            seen: docs.len(),
            ..DocsScanStats::default()
        };

        for doc in docs {
            let Some(content) = scanner.read_text(&doc.relative_path).unwrap_or(None) else {
                continue;
            };

            let title = title_of(&doc.relative_path, &content);
            let outcome = self
                .store
                .upsert_document(NewDocument {
                    doc_type: DocType::DocFile,
                    source: DocSource::Human,
                    relative_path: Some(doc.relative_path.clone()),
                    title,
                    content_hash: content_hash(&content),
                    content,
                })
                .await?;

            match outcome {
                DocumentUpsert::Written { .. } => stats.written += 1,
                DocumentUpsert::Unchanged => stats.unchanged += 1,
            }
        }

        Ok(stats)
    }
}

/// First markdown heading, or the file name
fn title_of(relative_path: &str, content: &str) -> String {
    content
        .lines()
        .find_map(|line| line.strip_prefix("# ").map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            relative_path
                .rsplit('/')
                .next()
                .unwrap_or(relative_path)
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use robomonkey_store::MockRepoStore;
    use std::fs;

    #[tokio::test]
    async fn test_docs_scan_upserts_and_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "# Demo Project\n\nHello.\n").unwrap();

        let store = Arc::new(MockRepoStore::new("robomonkey_demo"));
        let scanner = Scanner::new(dir.path(), 1024 * 1024);
        let docs = DocsIndexer::new(Arc::clone(&store) as Arc<dyn RepoStore>);

        let first = docs.scan(&scanner).await.unwrap();
        assert_eq!(first.written, 1);
        assert_eq!(first.unchanged, 0);

        let second = docs.scan(&scanner).await.unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.unchanged, 1);
    }

    #[test]
    fn test_title_prefers_heading() {
        assert_eq!(title_of("README.md", "# My Title\nbody"), "My Title");
        assert_eq!(title_of("docs/guide.md", "no heading here"), "guide.md");
    }
}
