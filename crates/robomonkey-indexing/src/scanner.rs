//! Repository scanner
//!
//! Walks a repository tree honoring `.gitignore`, maps extensions to
//! languages, and yields `(relative_path, language, mtime)` for files the
//! indexer should look at. Binary files (NUL byte probe) and oversized
//! files are skipped here so the pipeline never reads them.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, IndexResult};
use robomonkey_parsing::{is_doc_path, language_for_extension};

/// A file the scanner decided is indexable
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub relative_path: String,
    pub language: String,
    pub mtime: Option<DateTime<Utc>>,
}

/// A documentation file found during a docs scan
#[derive(Debug, Clone)]
pub struct ScannedDoc {
    pub relative_path: String,
    pub mtime: Option<DateTime<Utc>>,
}

/// Gitignore-aware repository walker
pub struct Scanner {
    root: PathBuf,
    max_file_bytes: u64,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_file_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and collect source files in a supported language.
    /// Output is sorted by relative path so scans are deterministic.
    pub fn scan(&self) -> Vec<ScannedFile> {
        let mut files = Vec::new();

        for entry in self.walk() {
            let Some(relative) = self.relative_path(entry.path()) else {
                continue;
            };
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let Some(language) = language_for_extension(ext) else {
                continue;
            };
            if self.too_large(&entry) {
                tracing::debug!(path = %relative, "Skipping oversized file");
                continue;
            }

            files.push(ScannedFile {
                relative_path: relative,
                language: language.to_string(),
                mtime: mtime_of(&entry),
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files
    }

    /// Walk the tree and collect documentation files (README*, docs/**).
    pub fn scan_docs(&self) -> Vec<ScannedDoc> {
        let mut docs = Vec::new();

        for entry in self.walk() {
            let Some(relative) = self.relative_path(entry.path()) else {
                continue;
            };
            if !is_doc_path(&relative) || self.too_large(&entry) {
                continue;
            }
            docs.push(ScannedDoc {
                relative_path: relative,
                mtime: mtime_of(&entry),
            });
        }

        docs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        docs
    }

    /// Read one scanned file as UTF-8 text. Returns `Ok(None)` for binary
    /// content (NUL byte probe) or invalid UTF-8.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read at all.
    pub fn read_text(&self, relative_path: &str) -> IndexResult<Option<String>> {
        let full = self.root.join(relative_path);
        let bytes = std::fs::read(&full).map_err(|source| IndexError::Io {
            path: relative_path.to_string(),
            source,
        })?;

        if bytes.contains(&0) {
            tracing::debug!(path = %relative_path, "Skipping binary file");
            return Ok(None);
        }

        Ok(String::from_utf8(bytes).ok())
    }

    fn walk(&self) -> impl Iterator<Item = ignore::DirEntry> {
        ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            // Honor .gitignore files even when the tree is not a checkout
            .require_git(false)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let text = relative.to_str()?;
        // Normalize separators for stable keys across platforms
        Some(text.replace('\\', "/"))
    }

    fn too_large(&self, entry: &ignore::DirEntry) -> bool {
        entry
            .metadata()
            .map(|m| m.len() > self.max_file_bytes)
            .unwrap_or(true)
    }
}

fn mtime_of(entry: &ignore::DirEntry) -> Option<DateTime<Utc>> {
    entry
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_finds_supported_languages_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/b.py", b"def b(): pass\n");
        write(dir.path(), "src/a.rs", b"fn a() {}\n");
        write(dir.path(), "notes.txt", b"not code\n");

        let scanner = Scanner::new(dir.path(), 1024 * 1024);
        let files = scanner.scan();

        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.rs", "src/b.py"]);
        assert_eq!(files[0].language, "rust");
        assert_eq!(files[1].language, "python");
    }

    #[test]
    fn test_scan_honors_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", b"generated/\n");
        write(dir.path(), "src/keep.py", b"def keep(): pass\n");
        write(dir.path(), "generated/skip.py", b"def skip(): pass\n");

        let scanner = Scanner::new(dir.path(), 1024 * 1024);
        let paths: Vec<String> = scanner
            .scan()
            .into_iter()
            .map(|f| f.relative_path)
            .collect();

        assert!(paths.contains(&"src/keep.py".to_string()));
        assert!(!paths.iter().any(|p| p.contains("generated")));
    }

    #[test]
    fn test_scan_skips_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.py", &vec![b'x'; 2048]);
        write(dir.path(), "small.py", b"def ok(): pass\n");

        let scanner = Scanner::new(dir.path(), 1024);
        let paths: Vec<String> = scanner
            .scan()
            .into_iter()
            .map(|f| f.relative_path)
            .collect();

        assert_eq!(paths, vec!["small.py"]);
    }

    #[test]
    fn test_read_text_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bin.py", &[0x64, 0x65, 0x00, 0x66]);
        write(dir.path(), "ok.py", b"def ok(): pass\n");

        let scanner = Scanner::new(dir.path(), 1024 * 1024);
        assert!(scanner.read_text("bin.py").unwrap().is_none());
        assert!(scanner.read_text("ok.py").unwrap().is_some());
    }

    #[test]
    fn test_scan_docs_finds_readme_and_docs_tree() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", b"# Hello\n");
        write(dir.path(), "docs/guide.md", b"guide\n");
        write(dir.path(), "src/main.rs", b"fn main() {}\n");

        let scanner = Scanner::new(dir.path(), 1024 * 1024);
        let docs: Vec<String> = scanner
            .scan_docs()
            .into_iter()
            .map(|d| d.relative_path)
            .collect();

        assert_eq!(docs, vec!["README.md", "docs/guide.md"]);
    }
}
