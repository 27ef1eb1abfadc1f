//! Parsing error types

use thiserror::Error;

/// Errors raised by the parser façade
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid pattern for {language}: {message}")]
    Pattern { language: String, message: String },

    #[error("Parse failure in {path}: {message}")]
    Failed { path: String, message: String },
}

/// Specialized Result type for parsing operations
pub type ParseResult<T> = std::result::Result<T, ParseError>;
