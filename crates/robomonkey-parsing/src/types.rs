//! Parsed-file contract types
//!
//! These are the façade's output: what the indexer consumes. Line numbers
//! are 1-based and inclusive.

use robomonkey_store::SymbolKind;
use serde::{Deserialize, Serialize};

/// A symbol definition found in a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSymbol {
    pub name: String,
    /// Deterministic fully-qualified name, stable across re-indexing
    pub fqn: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    /// The symbol's body text, used for chunking and content hashing
    pub body: String,
}

/// An import statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedImport {
    pub target: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// A call site inside a symbol body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCall {
    pub caller_fqn: String,
    pub callee_name: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// An inheritance or implementation relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInherit {
    pub child_fqn: String,
    pub parent_name: String,
    /// True for interface implementation, false for class inheritance
    pub is_implementation: bool,
    pub line: usize,
}

/// Everything extracted from one file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedFile {
    pub symbols: Vec<ParsedSymbol>,
    pub imports: Vec<ParsedImport>,
    pub calls: Vec<ParsedCall>,
    pub inherits: Vec<ParsedInherit>,
    /// Module-level docstring or leading comment block, if any
    pub module_doc: Option<String>,
}
