//! Per-document output bundle.
//!
//! ```text
//! <bundle>/
//! ├── canonical.txt      (or canonical.txt.gz)
//! ├── anchors.jsonl      one flat record per anchor
//! └── index.json         schema version, hashes, counts, source descriptor
//! ```

mod records;

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use filingprep_shared::{
    Anchor, AnchorKind, CanonicalDocument, OutputConfig, PrepError, Result, TableLayout,
    SCHEMA_VERSION,
};

pub use records::AnchorRecord;

pub const CANONICAL_FILE: &str = "canonical.txt";
pub const CANONICAL_GZ_FILE: &str = "canonical.txt.gz";
pub const ANCHORS_FILE: &str = "anchors.jsonl";
pub const INDEX_FILE: &str = "index.json";

// ---------------------------------------------------------------------------
// Index metadata
// ---------------------------------------------------------------------------

/// Where the raw bytes came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_id: String,
    /// Input path, when the document was read from disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub byte_len: usize,
    pub sha256: String,
}

impl SourceDescriptor {
    pub fn from_bytes(source_id: &str, path: Option<&Path>, raw: &[u8]) -> Self {
        Self {
            source_id: source_id.to_string(),
            path: path.map(|p| p.display().to_string()),
            byte_len: raw.len(),
            sha256: sha256_hex(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDescriptor {
    /// File name inside the bundle.
    pub file: String,
    pub compressed: bool,
    pub chars: usize,
    /// SHA-256 of the uncompressed UTF-8 text.
    pub sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub structured: usize,
    pub preserved: usize,
    pub dropped: usize,
}

/// Contents of `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub schema_version: u32,
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub source: SourceDescriptor,
    pub canonical: CanonicalDescriptor,
    /// Anchor counts keyed by kind name.
    pub anchor_counts: BTreeMap<String, usize>,
    pub tables: TableCounts,
    pub paragraph_coverage: f64,
    /// Characters hashed on each side of an anchor.
    pub context_window: usize,
}

/// Everything needed to write one bundle.
#[derive(Debug, Clone, Copy)]
pub struct BundleInput<'a> {
    pub source: &'a SourceDescriptor,
    pub document: &'a CanonicalDocument,
    pub anchors: &'a [Anchor],
    pub paragraph_coverage: f64,
    pub context_window: usize,
}

/// A bundle read back from disk.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub dir: PathBuf,
    pub index: IndexMetadata,
    pub text: String,
    pub anchors: Vec<Anchor>,
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write the canonical text, anchor table and index metadata into `dir`.
///
/// Existing bundle files in `dir` are overwritten; a stale canonical file of
/// the other compression variant is removed.
#[instrument(skip_all, fields(dir = %dir.display(), source_id = %input.source.source_id))]
pub fn write_bundle(dir: &Path, input: BundleInput<'_>, config: &OutputConfig) -> Result<IndexMetadata> {
    std::fs::create_dir_all(dir).map_err(|e| PrepError::io(dir, e))?;

    let text = &input.document.text;
    let (file, stale) = if config.compress_canonical {
        (CANONICAL_GZ_FILE, CANONICAL_FILE)
    } else {
        (CANONICAL_FILE, CANONICAL_GZ_FILE)
    };
    let canonical_path = dir.join(file);
    if config.compress_canonical {
        write_gzip(&canonical_path, text.as_bytes())?;
    } else {
        std::fs::write(&canonical_path, text).map_err(|e| PrepError::io(&canonical_path, e))?;
    }
    let stale_path = dir.join(stale);
    if stale_path.exists() {
        std::fs::remove_file(&stale_path).map_err(|e| PrepError::io(&stale_path, e))?;
    }

    let anchors_path = dir.join(ANCHORS_FILE);
    let mut lines = String::new();
    for anchor in input.anchors {
        lines.push_str(&serde_json::to_string(&AnchorRecord::from(anchor))?);
        lines.push('\n');
    }
    std::fs::write(&anchors_path, lines).map_err(|e| PrepError::io(&anchors_path, e))?;

    let index = build_index(input, file, config.compress_canonical);
    write_json(&dir.join(INDEX_FILE), &index)?;

    info!(
        anchors = input.anchors.len(),
        chars = index.canonical.chars,
        compressed = config.compress_canonical,
        "bundle written"
    );
    Ok(index)
}

fn build_index(input: BundleInput<'_>, file: &str, compressed: bool) -> IndexMetadata {
    let mut anchor_counts: BTreeMap<String, usize> = [AnchorKind::Paragraph, AnchorKind::Chunk, AnchorKind::TableCell]
        .iter()
        .map(|k| (k.as_str().to_string(), 0))
        .collect();
    for anchor in input.anchors {
        *anchor_counts.entry(anchor.kind.as_str().to_string()).or_default() += 1;
    }

    let mut tables = TableCounts::default();
    for block in &input.document.tables {
        match block.layout {
            TableLayout::Structured => tables.structured += 1,
            TableLayout::Preserved => tables.preserved += 1,
            TableLayout::Dropped => tables.dropped += 1,
        }
    }

    IndexMetadata {
        schema_version: SCHEMA_VERSION,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: Utc::now(),
        source: input.source.clone(),
        canonical: CanonicalDescriptor {
            file: file.to_string(),
            compressed,
            chars: input.document.char_len(),
            sha256: sha256_hex(input.document.text.as_bytes()),
        },
        anchor_counts,
        tables,
        paragraph_coverage: input.paragraph_coverage,
        context_window: input.context_window,
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Load a bundle and check it against its own index.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn read_bundle(dir: &Path) -> Result<Bundle> {
    let index_path = dir.join(INDEX_FILE);
    if !index_path.exists() {
        return Err(PrepError::validation(format!("missing {INDEX_FILE} in {}", dir.display())));
    }
    let raw = std::fs::read_to_string(&index_path).map_err(|e| PrepError::io(&index_path, e))?;
    let index: IndexMetadata = serde_json::from_str(&raw)
        .map_err(|e| PrepError::validation(format!("invalid {INDEX_FILE}: {e}")))?;
    if index.schema_version != SCHEMA_VERSION {
        return Err(PrepError::validation(format!(
            "unsupported bundle schema version {} (expected {SCHEMA_VERSION})",
            index.schema_version
        )));
    }

    let canonical_path = dir.join(&index.canonical.file);
    let text = if index.canonical.compressed {
        read_gzip(&canonical_path)?
    } else {
        std::fs::read_to_string(&canonical_path).map_err(|e| PrepError::io(&canonical_path, e))?
    };
    if sha256_hex(text.as_bytes()) != index.canonical.sha256 {
        return Err(PrepError::validation(format!(
            "{} does not match the hash recorded in {INDEX_FILE}",
            index.canonical.file
        )));
    }

    let anchors_path = dir.join(ANCHORS_FILE);
    let lines = std::fs::read_to_string(&anchors_path).map_err(|e| PrepError::io(&anchors_path, e))?;
    let mut anchors = Vec::new();
    for (n, line) in lines.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let record: AnchorRecord = serde_json::from_str(line)
            .map_err(|e| PrepError::validation(format!("{ANCHORS_FILE} line {}: {e}", n + 1)))?;
        anchors.push(record.into_anchor()?);
    }

    debug!(anchors = anchors.len(), chars = index.canonical.chars, "bundle loaded");
    Ok(Bundle {
        dir: dir.to_path_buf(),
        index,
        text,
        anchors,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    std::fs::write(path, json).map_err(|e| PrepError::io(path, e))?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

fn write_gzip(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(|e| PrepError::io(path, e))?;
    let compressed = encoder.finish().map_err(|e| PrepError::io(path, e))?;
    std::fs::write(path, compressed).map_err(|e| PrepError::io(path, e))
}

fn read_gzip(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).map_err(|e| PrepError::io(path, e))?;
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .map_err(|e| PrepError::io(path, e))?;
    Ok(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use filingprep_shared::{CanonicalSpan, CellAddress, HintFlags, SourceSpan, TableBlock};

    use super::*;

    fn document() -> CanonicalDocument {
        let id: Arc<str> = Arc::from("0001-ex99");
        let text = "Revenue rose.\n\n2023".to_string();
        let char_sources = text
            .char_indices()
            .map(|(i, _)| Some(SourceSpan::new(id.clone(), i + 3, i + 4)))
            .collect();
        CanonicalDocument {
            source_id: id,
            text,
            char_sources,
            treat_as_markup: true,
            tables: vec![TableBlock {
                index: 0,
                byte_range: 20..60,
                has_row_markup: true,
                layout: TableLayout::Structured,
                canonical_range: Some(15..19),
            }],
            heading_ranges: Vec::new(),
        }
    }

    fn anchors() -> Vec<Anchor> {
        let id: Arc<str> = Arc::from("0001-ex99");
        vec![
            Anchor {
                id: "s000001".into(),
                kind: AnchorKind::Paragraph,
                span: CanonicalSpan { from: 0, to: 13 },
                source_spans: vec![SourceSpan::new(id.clone(), 3, 16)],
                context_hash_before: "b".repeat(64),
                context_hash_after: "a".repeat(64),
                text_hash: "t".repeat(64),
                hints: HintFlags::default(),
                cell: None,
            },
            Anchor {
                id: "t01r01c01".into(),
                kind: AnchorKind::TableCell,
                span: CanonicalSpan { from: 15, to: 19 },
                source_spans: vec![SourceSpan::new(id, 30, 34)],
                context_hash_before: "c".repeat(64),
                context_hash_after: "d".repeat(64),
                text_hash: "e".repeat(64),
                hints: HintFlags {
                    heading_like: true,
                    table_like: true,
                    xref_like: false,
                },
                cell: Some(CellAddress {
                    table: 1,
                    row: 1,
                    col: 1,
                    row_header_trail: String::new(),
                    col_header_trail: "Year Ended".into(),
                    label: "2023".into(),
                }),
            },
        ]
    }

    fn write(dir: &Path, compress: bool) -> IndexMetadata {
        let doc = document();
        let anchors = anchors();
        let source = SourceDescriptor::from_bytes("0001-ex99", None, b"<p>Revenue rose.</p>");
        let input = BundleInput {
            source: &source,
            document: &doc,
            anchors: &anchors,
            paragraph_coverage: 1.0,
            context_window: 80,
        };
        write_bundle(dir, input, &OutputConfig { compress_canonical: compress }).expect("write")
    }

    #[test]
    fn bundle_layout_and_index() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let index = write(tmp.path(), false);

        assert!(tmp.path().join(CANONICAL_FILE).exists());
        assert!(tmp.path().join(ANCHORS_FILE).exists());
        assert!(tmp.path().join(INDEX_FILE).exists());

        assert_eq!(index.schema_version, SCHEMA_VERSION);
        assert_eq!(index.anchor_counts["paragraph"], 1);
        assert_eq!(index.anchor_counts["chunk"], 0);
        assert_eq!(index.anchor_counts["table_cell"], 1);
        assert_eq!(index.tables.structured, 1);
        assert_eq!(index.canonical.chars, 19);
        assert_eq!(index.source.byte_len, 20);
    }

    #[test]
    fn anchor_table_is_flat() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), false);
        let lines = std::fs::read_to_string(tmp.path().join(ANCHORS_FILE)).expect("read");
        let rows: Vec<serde_json::Value> = lines
            .lines()
            .map(|l| serde_json::from_str(l).expect("json"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["from"], 0);
        assert_eq!(rows[0]["to"], 13);
        assert!(rows[0].get("row").is_none());
        assert_eq!(rows[1]["row"], 1);
        assert_eq!(rows[1]["col_header_trail"], "Year Ended");
        assert_eq!(rows[1]["hint_flags"], serde_json::json!(["heading_like", "table_like"]));
        assert_eq!(rows[1]["source_spans"][0]["byte_start"], 30);
    }

    #[test]
    fn read_back_plain_and_compressed() {
        for compress in [false, true] {
            let tmp = tempfile::tempdir().expect("tempdir");
            write(tmp.path(), compress);
            let bundle = read_bundle(tmp.path()).expect("read");
            assert_eq!(bundle.text, document().text);
            assert_eq!(bundle.anchors, anchors());
            assert_eq!(bundle.index.canonical.compressed, compress);
        }
    }

    #[test]
    fn switching_compression_removes_stale_text() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), false);
        write(tmp.path(), true);
        assert!(!tmp.path().join(CANONICAL_FILE).exists());
        assert!(tmp.path().join(CANONICAL_GZ_FILE).exists());
    }

    #[test]
    fn tampered_text_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), false);
        std::fs::write(tmp.path().join(CANONICAL_FILE), "edited").expect("write");
        let err = read_bundle(tmp.path()).unwrap_err();
        assert!(matches!(err, PrepError::Validation { .. }));
    }

    #[test]
    fn missing_index_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = read_bundle(tmp.path()).unwrap_err();
        assert!(err.to_string().contains(INDEX_FILE));
    }
}
