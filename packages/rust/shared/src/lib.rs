//! Shared types, error model, and configuration for filingprep.
//!
//! This crate is the foundation depended on by all other filingprep crates.
//! It provides:
//! - [`PrepError`]: the unified error type
//! - Data model ([`CanonicalDocument`], [`SourceSpan`], [`Anchor`], [`TableBlock`])
//! - Configuration ([`PrepConfig`] and its per-component sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnchorConfig, BatchConfig, CanonicalConfig, HighlightConfig, OutputConfig, PrepConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PrepError, Result};
pub use types::{
    Anchor, AnchorKind, CanonicalDocument, CanonicalSpan, CellAddress, HintFlags,
    SCHEMA_VERSION, SourceSpan, TableBlock, TableLayout, TextIndex,
};
