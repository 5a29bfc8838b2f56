//! Single-document pipeline: raw bytes → canonical text → table grids → anchors.

use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use filingprep_anchoring::{build_anchors, AnchorSet};
use filingprep_canonical::{canonicalize, CanonicalizeOptions};
use filingprep_shared::{CanonicalDocument, PrepConfig, PrepError, Result, TableLayout};
use filingprep_tables::{resolve_table, ResolvedTable};

/// Output of [`prepare_document`]. Immutable once built.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub document: CanonicalDocument,
    pub tables: Vec<ResolvedTable>,
    pub anchors: AnchorSet,
    pub report: PrepReport,
}

/// What happened to the document's tables, and how long it took.
#[derive(Debug, Clone, Default)]
pub struct PrepReport {
    pub structured_tables: usize,
    pub preserved_tables: usize,
    pub dropped_tables: usize,
    /// Tables that produced a grid (and therefore cell anchors).
    pub resolved_tables: usize,
    /// Tables that failed grid resolution and were re-emitted verbatim.
    pub fallback_tables: Vec<usize>,
    pub elapsed: Duration,
}

/// Canonicalize, resolve tables and build anchors for one document.
///
/// A table that cannot be resolved into a grid is re-canonicalized verbatim
/// between table markers instead of failing the document. Decode, coverage
/// and offset errors are fatal for the document.
#[instrument(skip(raw, config), fields(bytes = raw.len()))]
pub fn prepare_document(raw: &[u8], source_id: &str, config: &PrepConfig) -> Result<PreparedDocument> {
    let start = Instant::now();
    let mut options = CanonicalizeOptions::from_config(&config.canonical);
    let mut fallback_tables: Vec<usize> = Vec::new();

    let (document, tables) = loop {
        let document = canonicalize(raw, source_id, &options)?;
        let source = std::str::from_utf8(raw)
            .map_err(|e| PrepError::decode(source_id, e.to_string()))?;

        let mut tables = Vec::new();
        let mut malformed = Vec::new();
        for block in &document.tables {
            let Some(fragment) = source.get(block.byte_range.clone()) else {
                return Err(PrepError::out_of_bounds(format!(
                    "table {} byte range {:?} outside source of {} bytes",
                    block.index,
                    block.byte_range,
                    raw.len()
                )));
            };
            match (block.layout, block.has_row_markup) {
                (TableLayout::Structured, true) => match resolve_table(fragment, block.index) {
                    Ok(resolved) => tables.push(resolved),
                    Err(err @ PrepError::MalformedTable { .. }) => {
                        warn!(table = block.index, error = %err, "falling back to verbatim table");
                        malformed.push(block.index);
                    }
                    Err(err) => return Err(err),
                },
                // Verbatim block without row markup: try the column-marker grid.
                (TableLayout::Preserved, false) => match resolve_table(fragment, block.index) {
                    Ok(resolved) => tables.push(resolved),
                    Err(err) if !err.is_document_fatal() => {
                        debug!(table = block.index, error = %err, "verbatim table has no grid");
                    }
                    Err(err) => return Err(err),
                },
                _ => {}
            }
        }

        if malformed.is_empty() {
            break (document, tables);
        }
        // Forcing only ever grows, so this terminates once every
        // malformed table is verbatim.
        if malformed.iter().all(|i| options.force_raw_tables.contains(i)) {
            return Err(PrepError::validation(format!(
                "tables {malformed:?} still malformed after verbatim fallback"
            )));
        }
        fallback_tables.extend(malformed.iter().copied());
        options = options.with_forced_raw(malformed);
    };

    let anchors = build_anchors(&document, &tables, &config.anchors)?;

    let mut report = PrepReport {
        resolved_tables: tables.len(),
        fallback_tables,
        ..PrepReport::default()
    };
    for block in &document.tables {
        match block.layout {
            TableLayout::Structured => report.structured_tables += 1,
            TableLayout::Preserved => report.preserved_tables += 1,
            TableLayout::Dropped => report.dropped_tables += 1,
        }
    }
    report.elapsed = start.elapsed();

    info!(
        chars = document.char_len(),
        anchors = anchors.anchors.len(),
        tables = document.tables.len(),
        resolved = report.resolved_tables,
        fallback = report.fallback_tables.len(),
        elapsed_ms = report.elapsed.as_millis(),
        "document prepared"
    );

    Ok(PreparedDocument {
        document,
        tables,
        anchors,
        report,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use filingprep_shared::{Anchor, AnchorKind, TextIndex};

    use super::*;

    fn fixture(name: &str) -> Vec<u8> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures")
            .join(name);
        std::fs::read(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
    }

    fn prepare_sample() -> PreparedDocument {
        prepare_document(&fixture("sample_filing.html"), "0000950170-24-000001", &PrepConfig::default())
            .expect("prepare")
    }

    fn anchor<'p>(prepared: &'p PreparedDocument, id: &str) -> &'p Anchor {
        prepared
            .anchors
            .anchors
            .iter()
            .find(|a| a.id == id)
            .unwrap_or_else(|| panic!("no anchor {id}"))
    }

    fn text_of<'p>(prepared: &'p PreparedDocument, a: &Anchor) -> &'p str {
        let text = &prepared.document.text;
        TextIndex::new(text).slice(text, a.span.range())
    }

    #[test]
    fn sample_filing_canonical_text() {
        let prepared = prepare_sample();
        let doc = &prepared.document;
        assert!(doc.verify().is_ok());
        assert_eq!(doc.text.chars().count(), doc.char_sources.len());
        assert!(doc.text.starts_with("ANNUAL REPORT PURSUANT TO SECTION 13\n\n"));
        assert!(doc.text.contains("The Company's principal executive offices"));
        assert!(!doc.text.contains("internal tracking"));
        assert!(!doc.text.contains("not text"));
        assert!(!doc.text.contains("Form 10-K"));
        assert!(doc.text.contains("[TABLE]\nBacklog at year end"));
    }

    #[test]
    fn malformed_table_falls_back_to_verbatim() {
        let prepared = prepare_sample();
        let report = &prepared.report;
        assert_eq!(report.fallback_tables, vec![4]);
        assert_eq!(report.structured_tables, 3);
        assert_eq!(report.preserved_tables, 2);
        assert_eq!(report.resolved_tables, 3);

        let block = &prepared.document.tables[4];
        assert_eq!(block.layout, TableLayout::Preserved);
        let range = block.canonical_range.clone().expect("range");
        let text = TextIndex::new(&prepared.document.text)
            .slice(&prepared.document.text, range)
            .to_string();
        assert!(text.contains("Segment"));
        assert!(text.contains("Gadgets"));
        // no cell anchors for a verbatim fallback table
        assert!(!prepared.anchors.anchors.iter().any(|a| a.id.starts_with("t05")));
    }

    #[test]
    fn cover_page_value_is_labeled_with_its_caption() {
        let prepared = prepare_sample();
        let cell = anchor(&prepared, "t01r01c01");
        assert_eq!(text_of(&prepared, cell), "Delaware");
        let address = cell.cell.as_ref().expect("address");
        assert_eq!(
            address.label,
            "Delaware (State or other jurisdiction of incorporation)"
        );
    }

    #[test]
    fn checkbox_cells_render_as_their_description() {
        let prepared = prepare_sample();
        let unchecked = anchor(&prepared, "t02r01c01");
        let checked = anchor(&prepared, "t02r01c03");
        assert_eq!(text_of(&prepared, checked), "\u{2612}");
        assert_eq!(
            unchecked.cell.as_ref().map(|c| c.label.as_str()),
            Some("Large accelerated filer")
        );
        assert_eq!(
            checked.cell.as_ref().map(|c| c.label.as_str()),
            Some("Accelerated Filer")
        );
    }

    #[test]
    fn financial_cells_carry_header_trails() {
        let prepared = prepare_sample();
        let cell = anchor(&prepared, "t03r02c03");
        assert_eq!(text_of(&prepared, cell), "900");
        let address = cell.cell.as_ref().expect("address");
        assert_eq!(address.col_header_trail, "2022");
        assert_eq!(address.row_header_trail, "Revenue");
        assert!(cell.hints.table_like);
    }

    #[test]
    fn anchors_cover_paragraphs_and_stay_in_bounds() {
        let prepared = prepare_sample();
        let len = prepared.document.char_len();
        assert!(prepared.anchors.paragraph_coverage >= 0.98);
        assert!(prepared
            .anchors
            .anchors
            .iter()
            .all(|a| a.span.from < a.span.to && a.span.to <= len));

        let xref = prepared
            .anchors
            .anchors
            .iter()
            .find(|a| a.kind == AnchorKind::Paragraph && text_of(&prepared, a).starts_with("Acme Widgets"))
            .expect("business paragraph");
        assert!(xref.hints.xref_like);
        assert!(anchor(&prepared, "s000001").hints.heading_like);
    }

    #[test]
    fn preparation_is_idempotent() {
        let a = prepare_sample();
        let b = prepare_sample();
        assert_eq!(a.document.text, b.document.text);
        assert_eq!(a.document.char_sources, b.document.char_sources);
        assert_eq!(a.anchors.anchors, b.anchors.anchors);
    }

    #[test]
    fn legacy_plain_text_table_gets_cell_anchors() {
        let mut raw = b"Results of operations follow.\n\n".to_vec();
        raw.extend(fixture("legacy_table.txt"));
        let mut config = PrepConfig::default();
        config.canonical.treat_as_markup = false;
        let prepared = prepare_document(&raw, "legacy", &config).expect("prepare");

        assert_eq!(prepared.document.tables[0].layout, TableLayout::Preserved);
        assert_eq!(prepared.report.resolved_tables, 1);
        let cell = prepared
            .anchors
            .anchors
            .iter()
            .filter(|a| a.kind == AnchorKind::TableCell)
            .find(|a| text_of(&prepared, a) == "1,100")
            .expect("legacy cell");
        let address = cell.cell.as_ref().expect("address");
        assert_eq!(address.col_header_trail, "2022");
        assert_eq!(address.row_header_trail, "Net sales");
    }

    #[test]
    fn undecodable_input_is_fatal() {
        let err = prepare_document(b"<p>caf\xe9</p>", "bad", &PrepConfig::default()).unwrap_err();
        assert!(matches!(err, PrepError::Decode { .. }));
        assert!(err.is_document_fatal());
    }
}
