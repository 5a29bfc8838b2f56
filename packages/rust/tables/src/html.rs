//! Provisional rows from an HTML table fragment via `scraper`.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

use filingprep_canonical::{is_hidden, normalize_inline};
use filingprep_shared::{PrepError, Result};

use crate::grid::{RawCell, RawRow};

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));

/// Elements whose boundaries separate words in rendered text.
const BREAK_ELEMENTS: &[&str] = &[
    "br", "div", "p", "li", "tr", "td", "th", "table", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "pre", "ul", "ol", "dl", "dt", "dd", "caption", "hr",
];

/// Parse the outermost table in `fragment` into rows of declared cells.
///
/// Returns the rows and the column count declared by `<col>`/`<colgroup>`.
pub(crate) fn parse(fragment: &str, table_index: usize) -> Result<(Vec<RawRow>, Option<usize>)> {
    let doc = Html::parse_fragment(fragment);
    let table = doc
        .select(&TABLE_SEL)
        .next()
        .ok_or_else(|| PrepError::malformed_table(table_index, "no table element"))?;

    let mut rows = Vec::new();
    let mut declared = 0usize;

    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "thead" => collect_rows(child, true, &mut rows),
            "tbody" | "tfoot" => collect_rows(child, false, &mut rows),
            "tr" => rows.push(parse_row(child, false)),
            "colgroup" => declared += colgroup_width(child),
            "col" => declared += span_attr(child, "span").unwrap_or(1).max(1),
            _ => {}
        }
    }

    Ok((rows, (declared > 0).then_some(declared)))
}

fn collect_rows(section: ElementRef<'_>, in_head: bool, rows: &mut Vec<RawRow>) {
    for tr in section
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "tr")
    {
        rows.push(parse_row(tr, in_head));
    }
}

fn parse_row(tr: ElementRef<'_>, in_head: bool) -> RawRow {
    let cells = tr
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(parse_cell)
        .collect();
    RawRow { cells, in_head }
}

fn parse_cell(cell: ElementRef<'_>) -> RawCell {
    let el = cell.value();
    let row_span = span_attr(cell, "rowspan").unwrap_or(1);
    let col_span = span_attr(cell, "colspan").unwrap_or(1);

    let mut text = CellText::default();
    if !is_hidden(el.name(), |k| el.attr(k)) {
        text.collect(cell, is_emphasis(el.name(), el.attr("style")));
    }

    RawCell {
        styled: text.emphasized > 0 && text.plain == 0,
        text: normalize_inline(&text.buf),
        is_header: el.name() == "th",
        row_span,
        col_span,
    }
}

fn colgroup_width(colgroup: ElementRef<'_>) -> usize {
    let cols: usize = colgroup
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "col")
        .map(|col| span_attr(col, "span").unwrap_or(1).max(1))
        .sum();
    if cols > 0 {
        cols
    } else {
        span_attr(colgroup, "span").unwrap_or(1).max(1)
    }
}

/// Leading digits of a span attribute; junk yields `None`.
fn span_attr(el: ElementRef<'_>, name: &str) -> Option<usize> {
    let value = el.value().attr(name)?.trim();
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn is_emphasis(name: &str, style: Option<&str>) -> bool {
    if matches!(name, "b" | "strong" | "u") {
        return true;
    }
    style.is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        ["font-weight:bold", "font-weight:700", "font-weight:800", "font-weight:900"]
            .iter()
            .any(|p| compact.contains(p))
            || compact.contains("text-decoration:underline")
    })
}

/// Visible text of a cell plus how much of it is emphasized.
#[derive(Default)]
struct CellText {
    buf: String,
    emphasized: usize,
    plain: usize,
}

impl CellText {
    fn collect(&mut self, el: ElementRef<'_>, emphasized: bool) {
        for child in el.children() {
            match child.value() {
                Node::Text(t) => {
                    let visible = t.chars().filter(|c| !c.is_whitespace()).count();
                    if emphasized {
                        self.emphasized += visible;
                    } else {
                        self.plain += visible;
                    }
                    self.buf.push_str(t);
                }
                Node::Element(e) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let name = e.name();
                    if is_hidden(name, |k| e.attr(k)) {
                        continue;
                    }
                    let breaks = BREAK_ELEMENTS.contains(&name);
                    if breaks {
                        self.buf.push(' ');
                    }
                    self.collect(child_el, emphasized || is_emphasis(name, e.attr("style")));
                    if breaks {
                        self.buf.push(' ');
                    }
                }
                _ => {}
            }
        }
    }
}
