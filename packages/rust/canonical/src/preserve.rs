//! Verbatim rendering of table blocks that carry no row/cell structure.
//!
//! Tags are stripped but the line layout and intra-line spacing survive, so
//! column alignment in legacy ASCII tables stays readable. In plain-text
//! input the `<S>`/`<C>` column markers become dash rulers of the same width,
//! so the marker line keeps its place and column positions. Blank lines and
//! trailing spaces are dropped.

use std::ops::Range;
use std::sync::Arc;

use filingprep_shared::SourceSpan;

use crate::markup::{self, Markup, Tag};
use crate::{entities, text};

pub(crate) type Line = Vec<(char, Option<SourceSpan>)>;

/// Tags that end the current line inside a preserved block.
const LINE_BREAK_TAGS: &[&str] = &["br", "caption", "div", "li", "p", "tr"];

struct LineBuffer {
    lines: Vec<Line>,
}

impl LineBuffer {
    fn current(&mut self) -> &mut Line {
        if self.lines.is_empty() {
            self.lines.push(Vec::new());
        }
        let last = self.lines.len() - 1;
        &mut self.lines[last]
    }

    fn push(&mut self, c: char, src: &SourceSpan) {
        if c == '\n' || c == '\r' {
            self.break_line();
        } else if c.is_whitespace() {
            self.current().push((' ', Some(src.clone())));
        } else {
            self.current().push((c, Some(src.clone())));
        }
    }

    /// One `-` per marker byte, each backed by the whole marker.
    fn ruler(&mut self, marker: Range<usize>, source_id: &Arc<str>) {
        let src = SourceSpan::new(source_id.clone(), marker.start, marker.end);
        for _ in marker {
            self.current().push(('-', Some(src.clone())));
        }
    }

    fn break_line(&mut self) {
        self.lines.push(Vec::new());
    }

    fn cell_gap(&mut self) {
        let line = self.current();
        if line.last().is_some_and(|(c, _)| *c != ' ') {
            line.push((' ', None));
        }
    }

    fn finish(self) -> Vec<Line> {
        self.lines
            .into_iter()
            .filter_map(|mut line| {
                while line.last().is_some_and(|(c, _)| *c == ' ') {
                    line.pop();
                }
                (!line.is_empty()).then_some(line)
            })
            .collect()
    }
}

fn is_column_marker(tag: &Tag<'_>) -> bool {
    !tag.is_end && (tag.name.eq_ignore_ascii_case("s") || tag.name.eq_ignore_ascii_case("c"))
}

/// Collect the visible lines of the table body at `range` in `raw`.
pub(crate) fn collect_lines(
    raw: &str,
    range: Range<usize>,
    treat_as_markup: bool,
    source_id: &Arc<str>,
) -> Vec<Line> {
    let body = &raw[..range.end];
    let bytes = body.as_bytes();
    let mut buf = LineBuffer { lines: Vec::new() };
    let mut i = range.start;

    while i < body.len() {
        match bytes[i] {
            b'<' => {
                if let Some(lexed) = markup::lex(body, i, treat_as_markup) {
                    i = match &lexed.markup {
                        Markup::Tag(tag) if !treat_as_markup && is_column_marker(tag) => {
                            buf.ruler(i..lexed.end, source_id);
                            lexed.end
                        }
                        Markup::Tag(tag) => {
                            match markup::skip_extent(body, tag, lexed.end, treat_as_markup) {
                                Some(resume) => resume,
                                None => {
                                    if LINE_BREAK_TAGS.contains(&tag.name.as_str()) {
                                        buf.break_line();
                                    } else if matches!(tag.name.as_str(), "td" | "th") {
                                        buf.cell_gap();
                                    }
                                    lexed.end
                                }
                            }
                        }
                        Markup::Ignorable => lexed.end,
                    };
                    continue;
                }
            }
            b'&' if treat_as_markup => {
                if let Some((c, end)) = entities::decode_at(body, i) {
                    let src = SourceSpan::new(source_id.clone(), i, end);
                    text::normalize_char(c, |n| buf.push(n, &src));
                    i = end;
                    continue;
                }
            }
            b'\r' => {
                buf.break_line();
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                continue;
            }
            _ => {}
        }

        let Some(c) = body[i..].chars().next() else {
            break;
        };
        let end = i + c.len_utf8();
        let src = SourceSpan::new(source_id.clone(), i, end);
        text::normalize_char(c, |n| buf.push(n, &src));
        i = end;
    }

    buf.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(raw: &str, markup: bool) -> Vec<String> {
        let id: Arc<str> = Arc::from("doc");
        collect_lines(raw, 0..raw.len(), markup, &id)
            .into_iter()
            .map(|line| line.into_iter().map(|(c, _)| c).collect())
            .collect()
    }

    #[test]
    fn keeps_alignment_and_drops_blank_lines() {
        let lines = render("\nNet sales     1,200  \n\n   Cost        800\n", false);
        assert_eq!(lines, vec!["Net sales     1,200", "   Cost        800"]);
    }

    #[test]
    fn column_marker_line_becomes_a_ruler() {
        let lines = render("<CAPTION>\nItem    2020\n<S>     <C>\nSales   10\n", false);
        assert_eq!(lines, vec!["Item    2020", "---     ---", "Sales   10"]);
    }

    #[test]
    fn ruler_points_at_marker_bytes() {
        let id: Arc<str> = Arc::from("doc");
        let raw = "A\n<S> <C>\n";
        let lines = collect_lines(raw, 0..raw.len(), false, &id);
        let (c, src) = &lines[1][4];
        assert_eq!(*c, '-');
        let src = src.as_ref().expect("source");
        assert_eq!(&raw[src.byte_start..src.byte_end], "<C>");
    }

    #[test]
    fn markup_tags_become_line_and_cell_breaks() {
        let lines = render("<font>Total&nbsp;assets</font><br>1,000<td>2,000", true);
        assert_eq!(lines, vec!["Total assets", "1,000 2,000"]);
    }

    #[test]
    fn characters_keep_their_source_bytes() {
        let id: Arc<str> = Arc::from("doc");
        let raw = "<b>A&amp;B</b>";
        let lines = collect_lines(raw, 0..raw.len(), true, &id);
        let amp = &lines[0][1];
        assert_eq!(amp.0, '&');
        let src = amp.1.as_ref().expect("source");
        assert_eq!(&raw[src.byte_start..src.byte_end], "&amp;");
    }
}
