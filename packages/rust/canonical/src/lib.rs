//! Canonicalizer: raw filing bytes to normalized text with per-character
//! provenance back into the source.
//!
//! Two input modes are supported. In markup mode tags are stripped, character
//! references decoded and whitespace collapsed, with block elements producing
//! paragraph breaks. In plain mode the text is taken as-is apart from legacy
//! SGML table markers, a single newline is kept as a line break and two or
//! more become a paragraph break.

mod canonicalizer;
mod entities;
mod markup;
mod preserve;
mod text;

use std::collections::BTreeSet;
use std::sync::Arc;

use filingprep_shared::{CanonicalConfig, CanonicalDocument, PrepError, Result};
use tracing::{debug, instrument};

pub use entities::decode_entities;
pub use markup::is_hidden;
pub use text::{normalize_char, normalize_inline, normalize_markup_text};

use crate::canonicalizer::Canonicalizer;

/// Synthetic line opening a verbatim table block.
pub const TABLE_OPEN_MARKER: &str = "[TABLE]";
/// Synthetic line closing a verbatim table block.
pub const TABLE_CLOSE_MARKER: &str = "[/TABLE]";

/// Knobs for one canonicalization run.
#[derive(Debug, Clone)]
pub struct CanonicalizeOptions {
    pub treat_as_markup: bool,
    /// Keep table blocks without row/cell markup verbatim between markers.
    pub preserve_raw_tables: bool,
    /// Top-level table indexes to keep verbatim regardless of their markup.
    pub force_raw_tables: BTreeSet<usize>,
}

impl Default for CanonicalizeOptions {
    fn default() -> Self {
        Self {
            treat_as_markup: true,
            preserve_raw_tables: true,
            force_raw_tables: BTreeSet::new(),
        }
    }
}

impl CanonicalizeOptions {
    pub fn from_config(config: &CanonicalConfig) -> Self {
        Self {
            treat_as_markup: config.treat_as_markup,
            preserve_raw_tables: config.preserve_raw_tables,
            force_raw_tables: BTreeSet::new(),
        }
    }

    /// Same options, additionally forcing the given tables to verbatim layout.
    pub fn with_forced_raw(mut self, tables: impl IntoIterator<Item = usize>) -> Self {
        self.force_raw_tables.extend(tables);
        self
    }
}

/// Canonicalize raw document bytes. The bytes must be UTF-8.
#[instrument(skip(raw, options), fields(bytes = raw.len(), markup = options.treat_as_markup))]
pub fn canonicalize(
    raw: &[u8],
    source_id: &str,
    options: &CanonicalizeOptions,
) -> Result<CanonicalDocument> {
    let text = std::str::from_utf8(raw).map_err(|e| {
        PrepError::decode(
            source_id,
            format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        )
    })?;
    canonicalize_str(text, source_id, options)
}

/// Canonicalize already-decoded text.
pub fn canonicalize_str(
    raw: &str,
    source_id: &str,
    options: &CanonicalizeOptions,
) -> Result<CanonicalDocument> {
    let doc = Canonicalizer::new(raw, Arc::from(source_id), options).run();
    doc.verify()?;
    debug!(
        chars = doc.char_len(),
        tables = doc.tables.len(),
        headings = doc.heading_ranges.len(),
        "canonicalized document"
    );
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use filingprep_shared::TableLayout;

    use super::*;

    fn markup(raw: &str) -> CanonicalDocument {
        canonicalize_str(raw, "doc", &CanonicalizeOptions::default()).expect("canonicalize")
    }

    fn plain(raw: &str) -> CanonicalDocument {
        let options = CanonicalizeOptions {
            treat_as_markup: false,
            ..CanonicalizeOptions::default()
        };
        canonicalize_str(raw, "doc", &options).expect("canonicalize")
    }

    /// Raw text behind canonical character `i`.
    fn source_of<'r>(doc: &CanonicalDocument, raw: &'r str, i: usize) -> Option<&'r str> {
        doc.char_sources[i]
            .as_ref()
            .map(|s| &raw[s.byte_start..s.byte_end])
    }

    #[test]
    fn strips_tags_and_separates_blocks() {
        let raw = "<html><body><p>Hello&nbsp;<b>world</b></p>\n<div>  Next   line </div></body></html>";
        let doc = markup(raw);
        assert_eq!(doc.text, "Hello world\n\nNext line");
        assert_eq!(doc.char_sources.len(), doc.text.chars().count());

        let w = doc.text.find('w').expect("w");
        assert_eq!(source_of(&doc, raw, w), Some("w"));
        assert_eq!(source_of(&doc, raw, 5), Some("&nbsp;"));
        // paragraph separator is synthetic
        assert_eq!(doc.char_sources[11], None);
        assert_eq!(doc.char_sources[12], None);
    }

    #[test]
    fn folds_punctuation_with_shared_source() {
        let raw = "It\u{2019}s done\u{2026}";
        let doc = markup(raw);
        assert_eq!(doc.text, "It's done...");
        let dots: Vec<_> = doc.char_sources[9..12].to_vec();
        assert!(dots.iter().all(|s| s == &dots[0]));
        assert_eq!(source_of(&doc, raw, 9), Some("\u{2026}"));
    }

    #[test]
    fn skips_non_rendering_elements() {
        let raw = "<style>p { color: red }</style><p>Shown</p><script>if (a<b) x();</script>\
                   <div hidden>secret</div><span style=\"display:none\">gone</span><p>Also</p>";
        let doc = markup(raw);
        assert_eq!(doc.text, "Shown\n\nAlso");
    }

    #[test]
    fn line_breaks_are_synthetic_newlines() {
        let doc = markup("First<br>Second<br/><br>Third");
        assert_eq!(doc.text, "First\nSecond\nThird");
        assert_eq!(doc.char_sources[5], None);
    }

    #[test]
    fn literal_less_than_and_entities_survive() {
        let raw = "<p>5 < 6 and &lt;b&gt; is a tag</p>";
        let doc = markup(raw);
        assert_eq!(doc.text, "5 < 6 and <b> is a tag");
        assert!(doc.verify().is_ok());
    }

    #[test]
    fn comments_and_doctype_vanish() {
        let doc = markup("<!DOCTYPE html><!-- note --><p>Body</p><!-- unterminated");
        assert_eq!(doc.text, "Body");
    }

    #[test]
    fn records_heading_ranges() {
        let doc = markup("<h2>Item 1. Business</h2><p>We make things.</p>");
        assert_eq!(doc.text, "Item 1. Business\n\nWe make things.");
        assert_eq!(doc.heading_ranges, vec![0..16]);
    }

    #[test]
    fn structured_table_flows_through_text() {
        let raw = "<p>Before</p><table><tr><th>Year</th><th>Sales</th></tr>\
                   <tr><td>2023</td><td>1,000</td></tr></table><p>After</p>";
        let doc = markup(raw);
        assert_eq!(doc.text, "Before\n\nYear Sales\n\n2023 1,000\n\nAfter");

        assert_eq!(doc.tables.len(), 1);
        let table = &doc.tables[0];
        assert_eq!(table.layout, TableLayout::Structured);
        assert!(table.has_row_markup);
        let range = table.canonical_range.clone().expect("range");
        let chars: Vec<char> = doc.text.chars().collect();
        let inside: String = chars[range].iter().collect();
        assert_eq!(inside, "Year Sales\n\n2023 1,000");
        assert!(raw[table.byte_range.clone()].starts_with("<table>"));
        assert!(raw[table.byte_range.clone()].ends_with("</table>"));
    }

    #[test]
    fn raw_table_is_preserved_verbatim() {
        let raw = "<p>Intro</p><table>\nNet sales      1,200  \n\n   Cost of sales    800\n</table><p>Outro</p>";
        let doc = markup(raw);
        assert_eq!(
            doc.text,
            "Intro\n\n[TABLE]\nNet sales      1,200\n   Cost of sales    800\n[/TABLE]\n\nOutro"
        );
        let table = &doc.tables[0];
        assert_eq!(table.layout, TableLayout::Preserved);
        assert!(!table.has_row_markup);
        // markers are synthetic, content is not
        let start = table.canonical_range.clone().expect("range").start;
        assert_eq!(doc.char_sources[start], None);
        assert_eq!(source_of(&doc, raw, start + 8), Some("N"));
    }

    #[test]
    fn raw_table_without_preservation_flows() {
        let options = CanonicalizeOptions {
            preserve_raw_tables: false,
            ..CanonicalizeOptions::default()
        };
        let doc = canonicalize_str("<table>Net   sales 10</table>", "doc", &options).expect("ok");
        assert_eq!(doc.text, "Net sales 10");
        assert_eq!(doc.tables[0].layout, TableLayout::Structured);
    }

    #[test]
    fn forced_raw_table_keeps_cell_text() {
        let options = CanonicalizeOptions::default().with_forced_raw([0]);
        let raw = "<table><tr><td>A</td><td>B</td></tr><tr><td>1</td></tr></table>";
        let doc = canonicalize_str(raw, "doc", &options).expect("ok");
        assert_eq!(doc.text, "[TABLE]\nA B\n1\n[/TABLE]");
        assert_eq!(doc.tables[0].layout, TableLayout::Preserved);
        assert!(doc.tables[0].has_row_markup);
    }

    #[test]
    fn empty_tables_are_dropped() {
        let doc = markup("<p>x</p><table> &nbsp; </table><table><tr><td> </td></tr></table>");
        assert_eq!(doc.text, "x");
        assert_eq!(doc.tables.len(), 2);
        assert!(doc.tables.iter().all(|t| t.layout == TableLayout::Dropped));
        assert!(doc.tables.iter().all(|t| t.canonical_range.is_none()));
    }

    #[test]
    fn nested_tables_belong_to_top_level_block() {
        let raw = "<table><tr><td><table><tr><td>inner</td></tr></table></td></tr></table>";
        let doc = markup(raw);
        assert_eq!(doc.tables.len(), 1);
        assert_eq!(doc.text, "inner");
    }

    #[test]
    fn pre_keeps_line_structure() {
        let doc = markup("<pre>line one\nline two\n\n\nnext</pre>");
        assert_eq!(doc.text, "line one\nline two\n\nnext");
    }

    #[test]
    fn plain_mode_line_rules() {
        let doc = plain("Line one\r\nline two\n\n\n  Para two &amp; more\n");
        assert_eq!(doc.text, "Line one\nline two\n\nPara two &amp; more");
        assert!(!doc.treat_as_markup);
    }

    #[test]
    fn plain_mode_preserves_legacy_tables() {
        let raw = "Summary\n<TABLE>\n<CAPTION>\nItem        2020\n<S>         <C>\nSales         10\n</TABLE>\nAfter";
        let doc = plain(raw);
        assert_eq!(
            doc.text,
            "Summary\n\n[TABLE]\nItem        2020\n---         ---\nSales         10\n[/TABLE]\n\nAfter"
        );
        assert_eq!(doc.tables[0].layout, TableLayout::Preserved);
        assert!(raw[doc.tables[0].byte_range.clone()].starts_with("<TABLE>"));
    }

    #[test]
    fn plain_mode_keeps_unknown_tags_literally() {
        let doc = plain("a <b>bold</b> claim");
        assert_eq!(doc.text, "a <b>bold</b> claim");
    }

    #[test]
    fn text_never_ends_with_layout_whitespace() {
        let doc = markup("<p>End</p><p> </p><div></div>\n");
        assert_eq!(doc.text, "End");
        let doc = markup("");
        assert_eq!(doc.text, "");
        assert!(doc.char_sources.is_empty());
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let err = canonicalize(&[b'a', 0xff, b'b'], "bad", &CanonicalizeOptions::default())
            .unwrap_err();
        assert!(matches!(err, PrepError::Decode { .. }));
        assert!(err.to_string().contains("byte 1"));
    }

    #[test]
    fn output_is_deterministic() {
        let raw = "<p>Same <i>input</i></p><table><tr><td>1</td></tr></table>";
        assert_eq!(markup(raw), markup(raw));
    }
}
