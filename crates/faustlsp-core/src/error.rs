//! Error types for the analysis engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the analysis engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A URI that is not a valid `file://` URI.
    #[error("invalid file uri: {0}")]
    InvalidUri(String),

    /// A position outside the document it refers to.
    #[error("position {line}:{character} out of bounds")]
    InvalidPosition { line: u32, character: u32 },

    /// A path that is not tracked by the file store.
    #[error("file not tracked: {0}")]
    FileNotTracked(PathBuf),

    /// An identifier that could not be resolved in any reachable scope.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// The tree-sitter grammar could not be loaded.
    #[error("grammar error: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),

    /// A malformed tree-sitter query pattern.
    #[error("query error: {0}")]
    Query(#[from] tree_sitter::QueryError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
