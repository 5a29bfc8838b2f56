//! Error types for filingprep.
//!
//! Library crates use [`PrepError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all document preparation operations.
#[derive(Debug, thiserror::Error)]
pub enum PrepError {
    /// Input bytes could not be decoded as text. Aborts that document.
    #[error("decode error in {source_id}: {message}")]
    Decode { source_id: String, message: String },

    /// A single table block could not be resolved into a grid.
    #[error("malformed table {table_index}: {reason}")]
    MalformedTable { table_index: usize, reason: String },

    /// A table block is empty after whitespace normalization.
    #[error("table {table_index} is empty after normalization")]
    EmptyTable { table_index: usize },

    /// Paragraph-anchor coverage fell below the configured floor.
    #[error(
        "paragraph anchor coverage {ratio:.4} below floor {floor:.2} \
         ({anchored} anchored of {paragraphs} non-empty paragraphs)"
    )]
    AnchorCoverage {
        ratio: f64,
        floor: f64,
        anchored: usize,
        paragraphs: usize,
    },

    /// An internal offset invariant was violated.
    #[error("offset out of bounds: {message}")]
    OffsetOutOfBounds { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Artifact serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Data validation error (schema mismatch, broken postcondition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrepError>;

impl PrepError {
    /// Create a decode error for a document.
    pub fn decode(source_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            source_id: source_id.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed-table error.
    pub fn malformed_table(table_index: usize, reason: impl Into<String>) -> Self {
        Self::MalformedTable {
            table_index,
            reason: reason.into(),
        }
    }

    /// Create an offset invariant error from any displayable message.
    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        Self::OffsetOutOfBounds {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts the whole document rather than one table block.
    pub fn is_document_fatal(&self) -> bool {
        !matches!(self, Self::MalformedTable { .. } | Self::EmptyTable { .. })
    }
}

impl From<serde_json::Error> for PrepError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
