//! Core data model shared by the canonicalizer, resolver, anchor builder and
//! highlighter. Everything here is built once per document and never mutated
//! afterwards.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// Current schema version for the output bundle format.
pub const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// SourceSpan
// ---------------------------------------------------------------------------

/// Half-open byte range into the original raw bytes of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpan {
    /// Identifier of the raw document the bytes belong to.
    pub source_id: Arc<str>,
    /// First byte (inclusive).
    pub byte_start: usize,
    /// Last byte (exclusive).
    pub byte_end: usize,
}

impl SourceSpan {
    pub fn new(source_id: Arc<str>, byte_start: usize, byte_end: usize) -> Self {
        Self {
            source_id,
            byte_start,
            byte_end,
        }
    }

    pub fn len(&self) -> usize {
        self.byte_end - self.byte_start
    }

    pub fn is_empty(&self) -> bool {
        self.byte_end <= self.byte_start
    }
}

// ---------------------------------------------------------------------------
// Table blocks
// ---------------------------------------------------------------------------

/// How a top-level table block ended up in the canonical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// Row/cell markup flowed through normal canonicalization.
    Structured,
    /// Raw text kept verbatim between `[TABLE]` / `[/TABLE]` markers.
    Preserved,
    /// Empty after whitespace normalization; contributes nothing.
    Dropped,
}

/// A top-level table block found while canonicalizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBlock {
    /// Zero-based position among the document's top-level tables.
    pub index: usize,
    /// Byte range of the whole block (opening tag through closing tag) in the raw input.
    pub byte_range: Range<usize>,
    /// Whether the block declares `<tr>`/`<td>`/`<th>` structure.
    pub has_row_markup: bool,
    pub layout: TableLayout,
    /// Character range in canonical text, `None` when dropped.
    pub canonical_range: Option<Range<usize>>,
}

// ---------------------------------------------------------------------------
// CanonicalDocument
// ---------------------------------------------------------------------------

/// Canonical text plus a per-character provenance map.
///
/// `char_sources[i]` describes where `text`'s i-th character came from;
/// `None` marks characters inserted for formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub source_id: Arc<str>,
    pub text: String,
    pub char_sources: Vec<Option<SourceSpan>>,
    /// Whether the input was parsed as markup.
    pub treat_as_markup: bool,
    /// Top-level table blocks in document order.
    #[serde(default)]
    pub tables: Vec<TableBlock>,
    /// Character ranges emitted inside `<h1>`–`<h6>`.
    #[serde(default)]
    pub heading_ranges: Vec<Range<usize>>,
}

impl CanonicalDocument {
    /// Number of characters in the canonical text.
    pub fn char_len(&self) -> usize {
        self.char_sources.len()
    }

    /// Check the postconditions every consumer relies on.
    ///
    /// 1. `text` has exactly one `char_sources` entry per character.
    /// 2. In markup mode, no `<` copied verbatim from the source is directly
    ///    followed (in the source as well) by a tag-start character.
    pub fn verify(&self) -> Result<()> {
        let char_count = self.text.chars().count();
        if char_count != self.char_sources.len() {
            return Err(PrepError::out_of_bounds(format!(
                "canonical text has {char_count} chars but {} char sources",
                self.char_sources.len()
            )));
        }

        if !self.treat_as_markup {
            return Ok(());
        }

        let chars: Vec<char> = self.text.chars().collect();
        for (i, window) in chars.windows(2).enumerate() {
            if window[0] != '<' || !is_tag_start(window[1]) {
                continue;
            }
            let (Some(lt), Some(next)) = (&self.char_sources[i], &self.char_sources[i + 1]) else {
                continue;
            };
            if lt.len() == 1 && next.byte_start == lt.byte_end {
                return Err(PrepError::validation(format!(
                    "residual markup delimiter at canonical offset {i} (source byte {})",
                    lt.byte_start
                )));
            }
        }
        Ok(())
    }
}

fn is_tag_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?')
}

// ---------------------------------------------------------------------------
// TextIndex
// ---------------------------------------------------------------------------

/// Maps character offsets to byte offsets (and back) for one string.
///
/// Canonical offsets are character offsets; Rust string slicing is by byte.
#[derive(Debug, Clone)]
pub struct TextIndex {
    offsets: Vec<usize>,
    byte_len: usize,
}

impl TextIndex {
    pub fn new(text: &str) -> Self {
        Self {
            offsets: text.char_indices().map(|(b, _)| b).collect(),
            byte_len: text.len(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.offsets.len()
    }

    /// Byte offset of character `char_idx`; `char_len()` maps to the end.
    pub fn byte_of(&self, char_idx: usize) -> usize {
        self.offsets.get(char_idx).copied().unwrap_or(self.byte_len)
    }

    /// Character offset of the char starting at or containing byte `byte_idx`.
    pub fn char_of(&self, byte_idx: usize) -> usize {
        if byte_idx >= self.byte_len {
            return self.offsets.len();
        }
        match self.offsets.binary_search(&byte_idx) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        }
    }

    /// Slice `text` by a character range (clamped to the text).
    pub fn slice<'t>(&self, text: &'t str, range: Range<usize>) -> &'t str {
        let end = range.end.min(self.char_len());
        let start = range.start.min(end);
        &text[self.byte_of(start)..self.byte_of(end)]
    }
}

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

/// Granularity of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    Paragraph,
    Chunk,
    TableCell,
}

impl AnchorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Chunk => "chunk",
            Self::TableCell => "table_cell",
        }
    }
}

impl std::fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open character range into canonical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalSpan {
    pub from: usize,
    pub to: usize,
}

impl CanonicalSpan {
    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    pub fn contains(&self, other: &CanonicalSpan) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    pub fn range(&self) -> Range<usize> {
        self.from..self.to
    }
}

/// Structural hints derived for an anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintFlags {
    pub heading_like: bool,
    pub table_like: bool,
    pub xref_like: bool,
}

impl HintFlags {
    /// Names of the set flags, in a fixed order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.heading_like {
            names.push("heading_like");
        }
        if self.table_like {
            names.push("table_like");
        }
        if self.xref_like {
            names.push("xref_like");
        }
        names
    }
}

/// Grid position and resolved headers of a table-cell anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAddress {
    /// One-based table number within the document.
    pub table: usize,
    /// One-based row of the owner cell.
    pub row: usize,
    /// One-based column of the owner cell.
    pub col: usize,
    pub row_header_trail: String,
    pub col_header_trail: String,
    /// Effective label after caption pairing and glyph promotion.
    pub label: String,
}

/// An addressable span of canonical text with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub kind: AnchorKind,
    pub span: CanonicalSpan,
    pub source_spans: Vec<SourceSpan>,
    pub context_hash_before: String,
    pub context_hash_after: String,
    /// SHA-256 of the span text itself.
    pub text_hash: String,
    pub hints: HintFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<CellAddress>,
}
