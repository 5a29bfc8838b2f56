//! Anchor Builder: paragraph, chunk and table-cell anchors over canonical text.

use std::cmp::Reverse;
use std::ops::Range;

use tracing::{debug, instrument, warn};

use filingprep_shared::{
    Anchor, AnchorConfig, AnchorKind, CanonicalDocument, CanonicalSpan, CellAddress, HintFlags,
    PrepError, Result, SourceSpan, TableLayout, TextIndex,
};
use filingprep_tables::{CellRole, ResolvedTable, TableCell};

use crate::hash::{context_hashes, text_hash};
use crate::hints::{is_heading_like_text, is_xref_like};
use crate::search;

/// Anchors for one document, in canonical order.
#[derive(Debug, Clone)]
pub struct AnchorSet {
    pub anchors: Vec<Anchor>,
    /// Character length of the canonical text the anchors index.
    pub canonical_length: usize,
    /// Share of source-backed paragraphs that lie inside a paragraph anchor.
    pub paragraph_coverage: f64,
}

impl AnchorSet {
    pub fn count(&self, kind: AnchorKind) -> usize {
        self.anchors.iter().filter(|a| a.kind == kind).count()
    }
}

/// Per-invocation id counters; never shared between documents.
#[derive(Debug, Default)]
struct Sequence {
    paragraphs: usize,
    chunks: usize,
}

impl Sequence {
    fn next_paragraph(&mut self) -> String {
        self.paragraphs += 1;
        format!("s{:06}", self.paragraphs)
    }

    fn next_chunk(&mut self) -> String {
        self.chunks += 1;
        format!("c{:06}", self.chunks)
    }
}

fn cell_id(table_index: usize, cell: &TableCell) -> String {
    format!("t{:02}r{:02}c{:02}", table_index + 1, cell.row + 1, cell.col + 1)
}

/// Shared state while anchoring one document.
struct Builder<'d> {
    doc: &'d CanonicalDocument,
    chars: Vec<char>,
    index: TextIndex,
    window: usize,
    table_ranges: Vec<Range<usize>>,
}

impl<'d> Builder<'d> {
    fn new(doc: &'d CanonicalDocument, window: usize) -> Self {
        let table_ranges = doc
            .tables
            .iter()
            .filter(|t| t.layout != TableLayout::Dropped)
            .filter_map(|t| t.canonical_range.clone())
            .collect();
        Self {
            doc,
            chars: doc.text.chars().collect(),
            index: TextIndex::new(&doc.text),
            window,
            table_ranges,
        }
    }

    fn slice(&self, span: CanonicalSpan) -> &str {
        self.index.slice(&self.doc.text, span.range())
    }

    fn in_table(&self, span: CanonicalSpan) -> bool {
        self.table_ranges
            .iter()
            .any(|r| span.from < r.end && r.start < span.to)
    }

    fn in_heading(&self, span: CanonicalSpan) -> bool {
        self.doc
            .heading_ranges
            .iter()
            .any(|r| span.from < r.end && r.start < span.to)
    }

    /// Contributing source spans, coalescing adjacent or overlapping bytes.
    fn source_spans(&self, span: CanonicalSpan) -> Vec<SourceSpan> {
        let mut merged: Vec<SourceSpan> = Vec::new();
        for src in self.doc.char_sources[span.range()].iter().flatten() {
            match merged.last_mut() {
                Some(last)
                    if last.source_id == src.source_id
                        && src.byte_start <= last.byte_end
                        && src.byte_end >= last.byte_start =>
                {
                    last.byte_end = last.byte_end.max(src.byte_end);
                }
                _ => merged.push(src.clone()),
            }
        }
        merged
    }

    fn anchor(
        &self,
        id: String,
        kind: AnchorKind,
        span: CanonicalSpan,
        hints: HintFlags,
        cell: Option<CellAddress>,
    ) -> Anchor {
        let text = &self.doc.text;
        let (before, after) = context_hashes(text, &self.index, span, self.window);
        Anchor {
            id,
            kind,
            span,
            source_spans: self.source_spans(span),
            context_hash_before: before,
            context_hash_after: after,
            text_hash: text_hash(text, &self.index, span),
            hints,
            cell,
        }
    }

    fn text_hints(&self, span: CanonicalSpan) -> HintFlags {
        let text = self.slice(span);
        HintFlags {
            heading_like: self.in_heading(span) || is_heading_like_text(text),
            table_like: self.in_table(span),
            xref_like: is_xref_like(text),
        }
    }

    /// Trim whitespace off both ends of a character range.
    fn trim(&self, mut from: usize, mut to: usize) -> Option<CanonicalSpan> {
        while from < to && self.chars[from].is_whitespace() {
            from += 1;
        }
        while to > from && self.chars[to - 1].is_whitespace() {
            to -= 1;
        }
        (from < to).then_some(CanonicalSpan { from, to })
    }

    /// Blank-line-delimited blocks: split on runs of two or more newlines.
    fn paragraphs(&self) -> Vec<CanonicalSpan> {
        let mut spans = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.chars.len() {
            if self.chars[i] == '\n' {
                let run_end = (i..self.chars.len())
                    .find(|&j| self.chars[j] != '\n')
                    .unwrap_or(self.chars.len());
                if run_end - i >= 2 {
                    spans.extend(self.trim(start, i));
                    start = run_end;
                }
                i = run_end;
            } else {
                i += 1;
            }
        }
        spans.extend(self.trim(start, self.chars.len()));
        spans
    }

    /// Chunks of at most `size` characters, never splitting a word.
    fn chunks(&self, paragraph: CanonicalSpan, size: usize) -> Vec<CanonicalSpan> {
        let mut spans = Vec::new();
        let mut start = paragraph.from;
        while start < paragraph.to {
            let limit = start + size;
            let end = if limit >= paragraph.to {
                paragraph.to
            } else {
                // Cut at the last whitespace at or before the limit; a single
                // word longer than the chunk is cut hard.
                (start + 1..=limit)
                    .rev()
                    .find(|&p| self.chars[p].is_whitespace())
                    .unwrap_or(limit)
            };
            spans.extend(self.trim(start, end));
            start = end;
            while start < paragraph.to && self.chars[start].is_whitespace() {
                start += 1;
            }
        }
        spans
    }

    /// Locate each text-bearing owner of `table` inside its canonical block.
    fn cell_anchors(&self, table: &ResolvedTable, out: &mut Vec<Anchor>) {
        let Some(block) = self.doc.tables.iter().find(|b| b.index == table.table_index) else {
            warn!(table = table.table_index, "resolved table has no block in document");
            return;
        };
        let Some(range) = block.canonical_range.clone() else {
            debug!(table = table.table_index, "table block has no canonical text");
            return;
        };

        let text = &self.doc.text;
        let block_start = self.index.byte_of(range.start);
        let block_end = self.index.byte_of(range.end);
        let mut cursor = block_start;

        for cell in table.grid.text_owners() {
            let Some(pattern) = search::tolerant_pattern(&cell.text) else {
                continue;
            };
            let found = search::find_first(&pattern, text, cursor, block_end)
                .or_else(|| search::find_first(&pattern, text, block_start, block_end));
            let Some(bytes) = found else {
                warn!(
                    table = table.table_index,
                    row = cell.row,
                    col = cell.col,
                    "table cell text not found in canonical block"
                );
                continue;
            };
            cursor = cursor.max(bytes.end);

            let span = CanonicalSpan {
                from: self.index.char_of(bytes.start),
                to: self.index.char_of(bytes.end),
            };
            let hints = HintFlags {
                heading_like: matches!(cell.role, CellRole::Header | CellRole::Caption),
                table_like: true,
                xref_like: is_xref_like(&cell.text),
            };
            let address = CellAddress {
                table: table.table_index + 1,
                row: cell.row + 1,
                col: cell.col + 1,
                row_header_trail: cell.row_header_trail.clone(),
                col_header_trail: cell.col_header_trail.clone(),
                label: cell.label.clone(),
            };
            out.push(self.anchor(
                cell_id(table.table_index, cell),
                AnchorKind::TableCell,
                span,
                hints,
                Some(address),
            ));
        }
    }
}

/// Blank-line-delimited blocks holding source-backed text, and how many of
/// them lie inside a paragraph anchor, as `(anchored, expected)`.
///
/// Blocks are found from `char_sources` rather than from the paragraph
/// splitter, so a block the splitter skips or truncates counts as uncovered.
/// Blocks made only of synthetic characters are not expected to be anchored.
fn paragraph_coverage(
    doc: &CanonicalDocument,
    chars: &[char],
    paragraphs: &[CanonicalSpan],
) -> (usize, usize) {
    let covered = |first: usize, last: usize| {
        let idx = paragraphs.partition_point(|p| p.from <= first);
        idx > 0 && paragraphs[idx - 1].to > last
    };

    let mut expected = 0;
    let mut anchored = 0;
    let mut block: Option<(usize, usize)> = None;
    let mut newlines = 0;
    let mut close = |block: &mut Option<(usize, usize)>| {
        if let Some((first, last)) = block.take() {
            expected += 1;
            if covered(first, last) {
                anchored += 1;
            }
        }
    };

    for (i, &c) in chars.iter().enumerate() {
        if c == '\n' {
            newlines += 1;
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        if newlines >= 2 {
            close(&mut block);
        }
        newlines = 0;
        if doc.char_sources.get(i).is_some_and(Option::is_some) {
            block = Some(block.map_or((i, i), |(first, _)| (first, i)));
        }
    }
    close(&mut block);
    (anchored, expected)
}

fn check_coverage(anchored: usize, expected: usize, floor: f64) -> Result<f64> {
    let coverage = if expected == 0 {
        1.0
    } else {
        anchored as f64 / expected as f64
    };
    if coverage < floor {
        return Err(PrepError::AnchorCoverage {
            ratio: coverage,
            floor,
            anchored,
            paragraphs: expected,
        });
    }
    Ok(coverage)
}

/// Build every anchor for a canonical document and its resolved tables.
///
/// Fails with [`PrepError::AnchorCoverage`] when fewer than
/// `min_paragraph_coverage` of the non-empty paragraphs got an anchor, and
/// with [`PrepError::OffsetOutOfBounds`] if any span escapes the text.
#[instrument(skip_all, fields(source_id = %doc.source_id, chars = doc.char_len(), tables = tables.len()))]
pub fn build_anchors(
    doc: &CanonicalDocument,
    tables: &[ResolvedTable],
    config: &AnchorConfig,
) -> Result<AnchorSet> {
    let builder = Builder::new(doc, config.context_window);
    let mut seq = Sequence::default();
    let mut anchors = Vec::new();

    let paragraphs = builder.paragraphs();
    for &paragraph in &paragraphs {
        let hints = builder.text_hints(paragraph);
        anchors.push(builder.anchor(
            seq.next_paragraph(),
            AnchorKind::Paragraph,
            paragraph,
            hints,
            None,
        ));

        if paragraph.len() > config.chunk_size {
            for chunk in builder.chunks(paragraph, config.chunk_size) {
                let hints = builder.text_hints(chunk);
                anchors.push(builder.anchor(seq.next_chunk(), AnchorKind::Chunk, chunk, hints, None));
            }
        }
    }

    for table in tables {
        builder.cell_anchors(table, &mut anchors);
    }

    anchors.sort_by(|a, b| {
        (a.span.from, a.kind, Reverse(a.span.to), &a.id).cmp(&(
            b.span.from,
            b.kind,
            Reverse(b.span.to),
            &b.id,
        ))
    });

    let length = doc.char_len();
    if let Some(bad) = anchors
        .iter()
        .find(|a| a.span.from >= a.span.to || a.span.to > length)
    {
        return Err(PrepError::out_of_bounds(format!(
            "anchor {} spans {}..{} in text of {length} chars",
            bad.id, bad.span.from, bad.span.to
        )));
    }

    let (anchored, expected) = paragraph_coverage(doc, &builder.chars, &paragraphs);
    let coverage = check_coverage(anchored, expected, config.min_paragraph_coverage)?;

    let set = AnchorSet {
        anchors,
        canonical_length: length,
        paragraph_coverage: coverage,
    };
    debug!(
        paragraphs = set.count(AnchorKind::Paragraph),
        chunks = set.count(AnchorKind::Chunk),
        cells = set.count(AnchorKind::TableCell),
        coverage = set.paragraph_coverage,
        "built anchors"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use filingprep_canonical::{canonicalize_str, CanonicalizeOptions};
    use filingprep_tables::resolve_table;

    use super::*;

    fn prepare(html: &str) -> (CanonicalDocument, Vec<ResolvedTable>) {
        let doc = canonicalize_str(html, "doc", &CanonicalizeOptions::default()).expect("canonicalize");
        let tables = doc
            .tables
            .iter()
            .filter(|b| b.layout == TableLayout::Structured && b.has_row_markup)
            .map(|b| resolve_table(&html[b.byte_range.clone()], b.index).expect("resolve"))
            .collect();
        (doc, tables)
    }

    fn build(html: &str) -> (CanonicalDocument, AnchorSet) {
        let (doc, tables) = prepare(html);
        let set = build_anchors(&doc, &tables, &AnchorConfig::default()).expect("anchors");
        (doc, set)
    }

    fn text_of<'a>(doc: &'a CanonicalDocument, anchor: &Anchor) -> &'a str {
        TextIndex::new(&doc.text).slice(&doc.text, anchor.span.range())
    }

    #[test]
    fn one_paragraph_anchor_per_block() {
        let (doc, set) = build("<p>First block.</p><p>Second block.</p><div>Third</div>");
        let paragraphs: Vec<&Anchor> = set
            .anchors
            .iter()
            .filter(|a| a.kind == AnchorKind::Paragraph)
            .collect();
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0].id, "s000001");
        assert_eq!(paragraphs[2].id, "s000003");
        assert_eq!(text_of(&doc, paragraphs[1]), "Second block.");
        assert_eq!(set.paragraph_coverage, 1.0);
    }

    #[test]
    fn source_spans_point_back_into_raw_bytes() {
        let html = "<p>Hello <b>world</b></p>";
        let (_, set) = build(html);
        let anchor = &set.anchors[0];
        let spans = &anchor.source_spans;
        assert_eq!(&html[spans[0].byte_start..spans[0].byte_end], "Hello ");
        assert_eq!(&html[spans[1].byte_start..spans[1].byte_end], "world");
    }

    #[test]
    fn long_paragraph_gets_word_aligned_chunks() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let html = format!("<p>{}</p>", sentence.repeat(60));
        let (doc, tables) = prepare(&html);
        let config = AnchorConfig {
            chunk_size: 100,
            ..AnchorConfig::default()
        };
        let set = build_anchors(&doc, &tables, &config).expect("anchors");
        let chunks: Vec<&Anchor> = set
            .anchors
            .iter()
            .filter(|a| a.kind == AnchorKind::Chunk)
            .collect();
        assert!(chunks.len() > 20);
        assert_eq!(chunks[0].id, "c000001");
        let chars: Vec<char> = doc.text.chars().collect();
        for chunk in &chunks {
            assert!(chunk.span.len() <= 100);
            assert!(!chars[chunk.span.from].is_whitespace());
            if chunk.span.to < chars.len() {
                assert!(chars[chunk.span.to].is_whitespace(), "chunk splits a word");
            }
        }
        // a paragraph sorts before its first chunk
        assert_eq!(set.anchors[0].kind, AnchorKind::Paragraph);
        assert_eq!(set.anchors[1].id, "c000001");
    }

    #[test]
    fn short_paragraph_has_no_chunks() {
        let (_, set) = build("<p>Short.</p>");
        assert_eq!(set.count(AnchorKind::Chunk), 0);
    }

    #[test]
    fn owner_cells_get_addressed_anchors() {
        let (doc, set) = build(
            "<p>Cover</p><table><tr><td>Delaware</td></tr>\
             <tr><td>State of Incorporation</td></tr></table>",
        );
        let cell = set
            .anchors
            .iter()
            .find(|a| a.id == "t01r01c01")
            .expect("cell anchor");
        assert_eq!(cell.kind, AnchorKind::TableCell);
        assert_eq!(text_of(&doc, cell), "Delaware");
        let address = cell.cell.as_ref().expect("address");
        assert_eq!(address.label, "Delaware (State of Incorporation)");
        assert_eq!((address.row, address.col), (1, 1));
        assert!(cell.hints.table_like);
        assert!(set.anchors.iter().any(|a| a.id == "t01r02c01"));
    }

    #[test]
    fn spanned_coordinates_share_one_anchor() {
        let (_, set) = build(
            "<table><tr><th colspan='2'>Segment totals</th></tr>\
             <tr><td>Widgets</td><td>10</td></tr></table>",
        );
        let ids: Vec<&str> = set
            .anchors
            .iter()
            .filter(|a| a.kind == AnchorKind::TableCell)
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["t01r01c01", "t01r02c01", "t01r02c02"]);
    }

    #[test]
    fn repeated_cell_values_map_to_distinct_offsets() {
        let (_, set) = build(
            "<table><tr><th>A</th><th>B</th></tr><tr><td>x</td><td>5</td></tr>\
             <tr><td>y</td><td>5</td></tr></table>",
        );
        let fives: Vec<&Anchor> = set
            .anchors
            .iter()
            .filter(|a| matches!(a.id.as_str(), "t01r02c02" | "t01r03c02"))
            .collect();
        assert_eq!(fives.len(), 2);
        assert_ne!(fives[0].span, fives[1].span);
    }

    #[test]
    fn hints_are_structural() {
        let (_, set) = build(
            "<h2>Item 1. Business</h2><p>RISK FACTORS</p>\
             <p>See Section 3.2 for details.</p><p>Plain words here.</p>",
        );
        let by_id = |id: &str| set.anchors.iter().find(|a| a.id == id).expect("anchor");
        assert!(by_id("s000001").hints.heading_like);
        assert!(by_id("s000001").hints.xref_like);
        assert!(by_id("s000002").hints.heading_like);
        assert!(by_id("s000003").hints.xref_like);
        assert!(!by_id("s000003").hints.heading_like);
        assert_eq!(by_id("s000004").hints, HintFlags::default());
    }

    #[test]
    fn every_span_is_in_bounds() {
        let (doc, set) = build(
            "<p>a</p><table><tr><td>1</td><td>2</td></tr></table><p>tail &amp; end</p>",
        );
        let len = doc.char_len();
        assert!(set.anchors.iter().all(|a| a.span.from < a.span.to && a.span.to <= len));
        assert_eq!(set.canonical_length, len);
    }

    #[test]
    fn ids_and_hashes_are_deterministic() {
        let html = "<p>One</p><p>Two &mdash; three</p><table><tr><td>x</td><td>y</td></tr></table>";
        let (_, first) = build(html);
        let (_, second) = build(html);
        assert_eq!(first.anchors, second.anchors);
    }

    #[test]
    fn context_hash_survives_distant_edits() {
        let tail = "z".repeat(200);
        let (_, a) = build(&format!("<p>{tail}</p><p>Target paragraph.</p><p>After</p>"));
        let (_, b) = build(&format!(
            "<p>Extra</p><p>{tail}</p><p>Target paragraph.</p><p>After</p>"
        ));
        let find = |set: &AnchorSet| {
            set.anchors
                .iter()
                .find(|x| x.text_hash == crate::hash::sha256_hex("Target paragraph."))
                .cloned()
                .expect("target")
        };
        let (x, y) = (find(&a), find(&b));
        assert_ne!(x.id, y.id);
        assert_eq!(x.context_hash_before, y.context_hash_before);
        assert_eq!(x.context_hash_after, y.context_hash_after);
    }

    fn sourced_doc(text: &str) -> CanonicalDocument {
        let id: Arc<str> = Arc::from("doc");
        let char_sources = text
            .char_indices()
            .map(|(i, c)| (c != '\n').then(|| SourceSpan::new(id.clone(), i, i + 1)))
            .collect();
        CanonicalDocument {
            source_id: "doc".into(),
            text: text.into(),
            char_sources,
            treat_as_markup: true,
            tables: Vec::new(),
            heading_ranges: Vec::new(),
        }
    }

    #[test]
    fn coverage_counts_source_blocks() {
        let doc = sourced_doc("one\n\ntwo\n\nthree");
        let set = build_anchors(&doc, &[], &AnchorConfig::default()).expect("anchors");
        assert_eq!(set.count(AnchorKind::Paragraph), 3);
        assert_eq!(set.paragraph_coverage, 1.0);
    }

    #[test]
    fn unanchored_paragraph_lowers_coverage() {
        let doc = sourced_doc("one\n\ntwo\n\nthree");
        let chars: Vec<char> = doc.text.chars().collect();
        // "two" has no paragraph anchor
        let paragraphs = [CanonicalSpan { from: 0, to: 3 }, CanonicalSpan { from: 10, to: 15 }];
        assert_eq!(paragraph_coverage(&doc, &chars, &paragraphs), (2, 3));

        let err = check_coverage(2, 3, 0.98).unwrap_err();
        assert!(matches!(err, PrepError::AnchorCoverage { anchored: 2, paragraphs: 3, .. }));
        assert!(check_coverage(2, 3, 0.5).is_ok());
    }

    #[test]
    fn truncated_paragraph_is_not_covered() {
        let doc = sourced_doc("first block\n\nsecond");
        let chars: Vec<char> = doc.text.chars().collect();
        let paragraphs = [CanonicalSpan { from: 0, to: 5 }, CanonicalSpan { from: 13, to: 19 }];
        assert_eq!(paragraph_coverage(&doc, &chars, &paragraphs), (1, 2));
    }

    #[test]
    fn synthetic_blocks_are_not_expected() {
        let mut doc = sourced_doc("one\n\ntwo");
        for src in &mut doc.char_sources[5..] {
            *src = None;
        }
        let chars: Vec<char> = doc.text.chars().collect();
        assert_eq!(paragraph_coverage(&doc, &chars, &[CanonicalSpan { from: 0, to: 3 }]), (1, 1));
    }

    #[test]
    fn empty_document_has_no_anchors() {
        let (_, set) = build("<p>   </p>");
        assert!(set.anchors.is_empty());
        assert_eq!(set.paragraph_coverage, 1.0);
    }
}
