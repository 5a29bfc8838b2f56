//! Application configuration for filingprep.
//!
//! User config lives at `~/.filingprep/filingprep.toml`.
//! CLI flags override config file values, which override defaults.
//! Each component receives its own section explicitly; nothing reads
//! process-wide state at processing time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "filingprep.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".filingprep";

// ---------------------------------------------------------------------------
// Config structs (matching filingprep.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepConfig {
    /// Canonicalizer settings.
    #[serde(default)]
    pub canonical: CanonicalConfig,

    /// Anchor builder settings.
    #[serde(default)]
    pub anchors: AnchorConfig,

    /// Reverse highlighter settings.
    #[serde(default)]
    pub highlight: HighlightConfig,

    /// Batch driver settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Output bundle settings.
    #[serde(default)]
    pub output: OutputConfig,
}

impl PrepConfig {
    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.anchors.chunk_size == 0 {
            return Err(PrepError::config("anchors.chunk_size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.anchors.min_paragraph_coverage) {
            return Err(PrepError::config(
                "anchors.min_paragraph_coverage must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.highlight.min_similarity) {
            return Err(PrepError::config(
                "highlight.min_similarity must be within [0, 1]",
            ));
        }
        if self.batch.workers == 0 {
            return Err(PrepError::config("batch.workers must be positive"));
        }
        Ok(())
    }
}

/// `[canonical]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalConfig {
    /// Parse input as HTML/SGML markup (false = plain text with legacy table tags).
    #[serde(default = "default_true")]
    pub treat_as_markup: bool,

    /// Wrap table blocks without row/cell structure in explicit markers, verbatim.
    #[serde(default = "default_true")]
    pub preserve_raw_tables: bool,
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            treat_as_markup: true,
            preserve_raw_tables: true,
        }
    }
}

/// `[anchors]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Paragraphs longer than this (in characters) also get chunk anchors.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Width of the context-hash window on each side of an anchor.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Minimum paragraph anchors ÷ non-empty paragraphs.
    #[serde(default = "default_min_coverage")]
    pub min_paragraph_coverage: f64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            context_window: default_context_window(),
            min_paragraph_coverage: default_min_coverage(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_context_window() -> usize {
    80
}
fn default_min_coverage() -> f64 {
    0.98
}

/// `[highlight]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightConfig {
    /// Minimum token containment for a context-verified fallback match.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,

    /// Maximum number of matches returned per excerpt.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Fallback confidences are scaled by this so they never tie an exact match.
    #[serde(default = "default_fallback_ceiling")]
    pub fallback_confidence_ceiling: f64,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            max_results: default_max_results(),
            fallback_confidence_ceiling: default_fallback_ceiling(),
        }
    }
}

fn default_min_similarity() -> f64 {
    0.6
}
fn default_max_results() -> usize {
    5
}
fn default_fallback_ceiling() -> f64 {
    0.9
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of documents processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock budget per document; overruns are marked failed-retryable.
    #[serde(default = "default_timeout_secs")]
    pub document_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            document_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[output]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Write `canonical.txt.gz` instead of `canonical.txt`.
    #[serde(default)]
    pub compress_canonical: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.filingprep/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| PrepError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.filingprep/filingprep.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<PrepConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(PrepConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<PrepConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;

    let config: PrepConfig = toml::from_str(&content)
        .map_err(|e| PrepError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PrepError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = PrepConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PrepError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PrepError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
