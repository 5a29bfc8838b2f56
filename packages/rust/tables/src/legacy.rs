//! Legacy SGML tables: fixed-width text laid out under a `<S> <C> <C>` marker
//! line. Lines above the marker are column captions, lines below are data.
//! A caption phrase that runs across a column start becomes one cell spanning
//! those columns.

use std::sync::LazyLock;

use regex::Regex;

use filingprep_canonical::normalize_inline;
use filingprep_shared::{PrepError, Result};

use crate::grid::{RawCell, RawRow};

static COLUMN_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<[SC]>").expect("valid regex"));

static LEGACY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:table|caption|s|c|fn|page)>").expect("valid regex")
});

static FOOTNOTE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<fn>").expect("valid regex"));

static DOT_LEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\.{2,}[\s.]*$").expect("valid regex"));

/// Whether `fragment` carries a legacy column-marker line.
pub(crate) fn has_column_markers(fragment: &str) -> bool {
    fragment.lines().any(is_marker_line)
}

fn is_marker_line(line: &str) -> bool {
    COLUMN_MARKER
        .find(line)
        .is_some_and(|m| m.as_str().eq_ignore_ascii_case("<s>"))
}

/// Parse a legacy table into caption rows followed by data rows.
pub(crate) fn parse(fragment: &str, table_index: usize) -> Result<Vec<RawRow>> {
    let lines: Vec<&str> = fragment.lines().collect();
    let marker_at = lines
        .iter()
        .position(|l| is_marker_line(l))
        .ok_or_else(|| {
            PrepError::malformed_table(table_index, "no row/cell markup and no column markers")
        })?;

    let marker_line = lines[marker_at];
    let starts: Vec<usize> = COLUMN_MARKER
        .find_iter(marker_line)
        .map(|m| marker_line[..m.start()].chars().count())
        .collect();

    let mut rows = Vec::new();
    for line in &lines[..marker_at] {
        if let Some(row) = split_line(line, &starts, true) {
            rows.push(row);
        }
    }
    for line in &lines[marker_at + 1..] {
        if FOOTNOTE_TAG.is_match(line) {
            break;
        }
        if let Some(row) = split_line(line, &starts, false) {
            rows.push(row);
        }
    }

    if rows.iter().all(|r| r.in_head) {
        return Err(PrepError::malformed_table(
            table_index,
            "no data lines under column markers",
        ));
    }
    Ok(rows)
}

/// Split one fixed-width line at the marker columns. Blank and rule lines yield `None`.
fn split_line(line: &str, starts: &[usize], caption: bool) -> Option<RawRow> {
    // Tags become spaces so the remaining text keeps its columns.
    let cleaned =
        LEGACY_TAG.replace_all(line, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()));
    let chars: Vec<char> = cleaned.chars().collect();
    if chars.iter().all(|c| c.is_whitespace() || matches!(c, '-' | '=' | '_')) {
        return None;
    }

    if caption {
        return Some(RawRow {
            cells: caption_cells(&chars, starts),
            in_head: true,
        });
    }

    let mut bounds = Vec::with_capacity(starts.len());
    let mut floor = 0;
    for (k, &start) in starts.iter().enumerate() {
        let snapped = if k == 0 { 0 } else { snap_left(&chars, start, floor) };
        bounds.push(snapped);
        floor = snapped;
    }

    let cells = bounds
        .iter()
        .enumerate()
        .map(|(k, &from)| {
            let to = bounds.get(k + 1).copied().unwrap_or(chars.len()).min(chars.len());
            let from = from.min(to);
            let segment: String = chars[from..to].iter().collect();
            let mut text = normalize_inline(&segment);
            if k == 0 {
                text = DOT_LEADER.replace(&text, "").into_owned();
            }
            RawCell {
                text,
                is_header: false,
                styled: false,
                row_span: 1,
                col_span: 1,
            }
        })
        .collect();

    Some(RawRow {
        cells,
        in_head: false,
    })
}

/// Caption line cells: each phrase goes to the column its first character
/// falls in and spans through the column of its last character. Phrases that
/// land in an already-claimed column join that cell.
fn caption_cells(chars: &[char], starts: &[usize]) -> Vec<RawCell> {
    let column_of = |pos: usize| starts.iter().rposition(|&s| s <= pos).unwrap_or(0);

    // (first column, last column, text)
    let mut groups: Vec<(usize, usize, String)> = Vec::new();
    for (from, to) in phrases(chars) {
        let (first, last) = (column_of(from), column_of(to - 1));
        let text: String = chars[from..to].iter().collect();
        match groups.last_mut() {
            Some(prev) if prev.1 >= first => {
                prev.1 = prev.1.max(last);
                prev.2.push(' ');
                prev.2.push_str(&text);
            }
            _ => groups.push((first, last, text)),
        }
    }

    let caption_cell = |text: String, col_span: usize| RawCell {
        text,
        is_header: true,
        styled: false,
        row_span: 1,
        col_span,
    };
    let mut cells = Vec::with_capacity(starts.len());
    let mut col = 0;
    for (first, last, text) in groups {
        while col < first {
            cells.push(caption_cell(String::new(), 1));
            col += 1;
        }
        let mut text = normalize_inline(&text);
        if first == 0 {
            text = DOT_LEADER.replace(&text, "").into_owned();
        }
        cells.push(caption_cell(text, last - first + 1));
        col = last + 1;
    }
    while col < starts.len() {
        cells.push(caption_cell(String::new(), 1));
        col += 1;
    }
    cells
}

/// Character ranges of phrases: text separated by two or more blanks.
fn phrases(chars: &[char]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i;
        while i < chars.len() {
            if !chars[i].is_whitespace() {
                i += 1;
                end = i;
            } else if chars.get(i + 1).is_some_and(|c| !c.is_whitespace()) {
                i += 1;
            } else {
                break;
            }
        }
        out.push((start, end));
    }
    out
}

/// Move a column start left so it never cuts through a token.
///
/// Prefers the start of a phrase (text preceded by two spaces, so `$ 1,234`
/// stays whole), then the start of a word, never crossing `floor`.
fn snap_left(chars: &[char], start: usize, floor: usize) -> usize {
    if start >= chars.len() || chars[start] == ' ' {
        return start;
    }
    let phrase_start = (floor + 1..=start)
        .rev()
        .find(|&i| chars[i] != ' ' && chars[i - 1] == ' ' && (i < 2 || chars[i - 2] == ' '));
    if let Some(i) = phrase_start {
        return i;
    }
    (floor + 1..=start)
        .rev()
        .find(|&i| chars[i] != ' ' && chars[i - 1] == ' ')
        .unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "<TABLE>
<CAPTION>
                                        Year Ended December 31,
                                          2023         2022
<S>                                     <C>          <C>
Net sales..........................  $ 1,234      $ 1,100
Cost of sales......................      800          750
                                       -------      -------
Gross profit                             434          350
<FN>
(1) Restated.
</TABLE>";

    fn texts(rows: &[RawRow]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.cells.iter().map(|c| c.text.clone()).collect())
            .collect()
    }

    #[test]
    fn splits_columns_at_markers() {
        let rows = parse(TABLE, 0).expect("parse");
        assert_eq!(
            texts(&rows),
            vec![
                vec!["", "Year Ended December 31,"],
                vec!["", "2023", "2022"],
                vec!["Net sales", "$ 1,234", "$ 1,100"],
                vec!["Cost of sales", "800", "750"],
                vec!["Gross profit", "434", "350"],
            ]
        );
        assert!(rows[0].in_head && rows[1].in_head);
        assert!(rows[2].cells.iter().all(|c| !c.is_header));
    }

    #[test]
    fn caption_across_columns_is_one_spanning_cell() {
        let rows = parse(TABLE, 0).expect("parse");
        let spans: Vec<usize> = rows[0].cells.iter().map(|c| c.col_span).collect();
        assert_eq!(spans, vec![1, 2]);
        assert!(rows[0].cells.iter().all(|c| c.is_header));
        assert!(rows[1].cells.iter().all(|c| c.col_span == 1));
    }

    #[test]
    fn phrases_break_on_double_blanks() {
        let chars: Vec<char> = "  Year Ended 31,   2023  ".chars().collect();
        assert_eq!(phrases(&chars), vec![(2, 16), (19, 23)]);
    }

    #[test]
    fn footnotes_are_not_rows() {
        let rows = parse(TABLE, 0).expect("parse");
        assert!(rows.iter().all(|r| r.cells.iter().all(|c| !c.text.contains("Restated"))));
    }

    #[test]
    fn missing_markers_are_malformed() {
        let err = parse("<TABLE>\nJust some text\n</TABLE>", 2).unwrap_err();
        assert!(matches!(err, PrepError::MalformedTable { table_index: 2, .. }));
        assert!(!has_column_markers("<TABLE>\nJust some text\n</TABLE>"));
        assert!(has_column_markers(TABLE));
    }

    #[test]
    fn snapping_keeps_tokens_whole() {
        let chars: Vec<char> = "Net sales....  $ 1,234".chars().collect();
        // marker lands on the '1'
        assert_eq!(snap_left(&chars, 17, 0), 15);
        let chars: Vec<char> = "Total revenue".chars().collect();
        assert_eq!(snap_left(&chars, 9, 0), 6);
    }
}
