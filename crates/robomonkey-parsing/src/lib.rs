//! Robomonkey parsing: best-effort structured facts from source text
//!
//! Given `(language, content)` the parser returns symbols, imports, call
//! sites and inheritance relations. Extraction is line-oriented and
//! heuristic; unsupported languages yield empty collections rather than
//! errors, and a parse failure never aborts a batch.

pub mod error;
pub mod languages;
pub mod parser;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use languages::{LanguageConfig, is_doc_path, language_for_extension};
pub use parser::{LineParser, SourceParser};
pub use types::{ParsedCall, ParsedFile, ParsedImport, ParsedInherit, ParsedSymbol};
