//! Language-specific configurations for code parsing
//!
//! This module centralizes language identification and the per-language
//! parsing rules: block style, definition keywords, and file extensions.

/// Configuration for a specific programming language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// The language identifier (e.g., "rust", "python")
    pub id: &'static str,
    /// File extensions associated with this language
    pub extensions: &'static [&'static str],
    /// Whether the language uses braces for blocks
    pub uses_braces: bool,
    /// Whether the language uses indentation for blocks (like Python)
    pub uses_indentation: bool,
}

impl LanguageConfig {
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            extensions: &[],
            uses_braces: true,
            uses_indentation: false,
        }
    }

    pub const fn with_extensions(mut self, extensions: &'static [&'static str]) -> Self {
        self.extensions = extensions;
        self
    }

    pub const fn with_block_style(mut self, uses_braces: bool, uses_indentation: bool) -> Self {
        self.uses_braces = uses_braces;
        self.uses_indentation = uses_indentation;
        self
    }
}

/// Registry of all supported language configurations
pub const LANGUAGES: &[LanguageConfig] = &[
    LanguageConfig::new("rust").with_extensions(&["rs"]),
    LanguageConfig::new("python")
        .with_extensions(&["py", "pyi"])
        .with_block_style(false, true),
    LanguageConfig::new("javascript").with_extensions(&["js", "jsx", "mjs", "cjs"]),
    LanguageConfig::new("typescript").with_extensions(&["ts", "tsx", "mts"]),
    LanguageConfig::new("go").with_extensions(&["go"]),
];

/// Map a file extension to a language identifier
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|config| config.extensions.contains(&ext.as_str()))
        .map(|config| config.id)
}

/// Configuration for a language identifier
pub fn config_for_language(language: &str) -> Option<&'static LanguageConfig> {
    LANGUAGES.iter().find(|config| config.id == language)
}

/// Whether a relative path looks like human documentation worth indexing
/// as a document rather than code
pub fn is_doc_path(relative_path: &str) -> bool {
    let lower = relative_path.to_ascii_lowercase();
    let in_docs_tree = lower.starts_with("docs/") || lower.contains("/docs/");
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);

    file_name.starts_with("readme")
        || (in_docs_tree && (lower.ends_with(".md") || lower.ends_with(".rst") || lower.ends_with(".txt")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lookup() {
        assert_eq!(language_for_extension("rs"), Some("rust"));
        assert_eq!(language_for_extension("py"), Some("python"));
        assert_eq!(language_for_extension("TSX"), Some("typescript"));
        assert_eq!(language_for_extension("exe"), None);
    }

    #[test]
    fn test_python_uses_indentation() {
        let config = config_for_language("python").unwrap();
        assert!(config.uses_indentation);
        assert!(!config.uses_braces);
    }

    #[test]
    fn test_doc_path_detection() {
        assert!(is_doc_path("README.md"));
        assert!(is_doc_path("readme.rst"));
        assert!(is_doc_path("docs/guide.md"));
        assert!(is_doc_path("sub/docs/api.md"));
        assert!(!is_doc_path("src/main.rs"));
        assert!(!is_doc_path("docs/diagram.png"));
    }
}
