//! Single-pass state machine producing canonical text and provenance.
//!
//! Breaks are applied lazily: block elements only *request* a paragraph
//! break, which materializes as `"\n\n"` right before the next visible
//! character. That keeps runs of empty containers from stacking blank lines
//! and guarantees the text never ends with layout whitespace.

use std::ops::Range;
use std::sync::Arc;

use filingprep_shared::{CanonicalDocument, PrepError, SourceSpan, TableBlock, TableLayout};
use tracing::{debug, warn};

use crate::markup::{self, Markup, Tag, BLOCK_TAGS};
use crate::{entities, preserve, text, CanonicalizeOptions, TABLE_CLOSE_MARKER, TABLE_OPEN_MARKER};

/// A structured top-level table currently flowing through the text.
struct OpenTable {
    slot: usize,
    /// Nesting depth of `<table>` elements, the top-level one included.
    depth: usize,
    first_char: Option<usize>,
}

pub(crate) struct Canonicalizer<'a> {
    raw: &'a str,
    source_id: Arc<str>,
    options: &'a CanonicalizeOptions,

    text: String,
    sources: Vec<Option<SourceSpan>>,
    last_was_space: bool,

    pending_block: bool,
    pending_gap: bool,
    /// Source newlines seen since the last visible character (plain text and `<pre>`).
    pending_newlines: Option<(usize, SourceSpan)>,
    pre_depth: usize,

    heading_depth: usize,
    heading_first: Option<usize>,
    heading_ranges: Vec<Range<usize>>,

    tables: Vec<TableBlock>,
    open_table: Option<OpenTable>,
}

impl<'a> Canonicalizer<'a> {
    pub(crate) fn new(raw: &'a str, source_id: Arc<str>, options: &'a CanonicalizeOptions) -> Self {
        Self {
            raw,
            source_id,
            options,
            text: String::with_capacity(raw.len() / 2),
            sources: Vec::with_capacity(raw.len() / 2),
            last_was_space: false,
            pending_block: false,
            pending_gap: false,
            pending_newlines: None,
            pre_depth: 0,
            heading_depth: 0,
            heading_first: None,
            heading_ranges: Vec::new(),
            tables: Vec::new(),
            open_table: None,
        }
    }

    pub(crate) fn run(mut self) -> CanonicalDocument {
        let raw = self.raw;
        let bytes = raw.as_bytes();
        let markup = self.options.treat_as_markup;
        let mut i = 0;

        while i < raw.len() {
            match bytes[i] {
                b'<' => {
                    if let Some(lexed) = markup::lex(raw, i, markup) {
                        if !lexed.terminated {
                            warn!(offset = i, "unterminated markup runs to end of input");
                        }
                        let resume = match &lexed.markup {
                            Markup::Tag(tag) => self.handle_tag(tag, i, lexed.end),
                            Markup::Ignorable => None,
                        };
                        i = resume.unwrap_or(lexed.end);
                        continue;
                    }
                }
                b'&' if markup => {
                    if let Some((c, end)) = entities::decode_at(raw, i) {
                        self.emit_char(c, i, end);
                        i = end;
                        continue;
                    }
                }
                b'\r' => {
                    let end = if bytes.get(i + 1) == Some(&b'\n') { i + 2 } else { i + 1 };
                    self.emit_char('\n', i, end);
                    i = end;
                    continue;
                }
                _ => {}
            }

            let Some(c) = raw[i..].chars().next() else {
                break;
            };
            let end = i + c.len_utf8();
            self.emit_char(c, i, end);
            i = end;
        }

        self.finish()
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    /// React to a tag. Returns a resume offset when the tag consumed more input.
    fn handle_tag(&mut self, tag: &Tag<'_>, start: usize, end: usize) -> Option<usize> {
        if let Some(resume) = markup::skip_extent(self.raw, tag, end, self.options.treat_as_markup)
        {
            debug!(tag = %tag.name, bytes = resume - start, "skipping non-rendering element");
            return Some(resume);
        }

        match tag.name.as_str() {
            "table" => return self.handle_table(tag, start, end),
            "br" => self.line_break(),
            "td" | "th" => self.pending_gap = true,
            "pre" => {
                if tag.is_end {
                    self.pre_depth = self.pre_depth.saturating_sub(1);
                } else if !tag.self_closing {
                    self.pre_depth += 1;
                }
                self.block_break();
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => self.heading(tag.is_end),
            name if BLOCK_TAGS.contains(&name) => self.block_break(),
            _ => {}
        }
        None
    }

    fn heading(&mut self, is_end: bool) {
        self.block_break();
        if !is_end {
            self.heading_depth += 1;
            return;
        }
        if self.heading_depth == 0 {
            return;
        }
        self.heading_depth -= 1;
        if self.heading_depth == 0 {
            self.close_heading();
        }
    }

    fn close_heading(&mut self) {
        if let Some(first) = self.heading_first.take() {
            let end = self.content_end();
            if end > first {
                self.heading_ranges.push(first..end);
            }
        }
    }

    fn handle_table(&mut self, tag: &Tag<'_>, start: usize, end: usize) -> Option<usize> {
        if tag.is_end {
            let closed = match self.open_table.as_mut() {
                Some(open) => {
                    open.depth -= 1;
                    open.depth == 0
                }
                None => false,
            };
            if closed {
                self.close_table();
            }
            self.block_break();
            return None;
        }

        if let Some(open) = self.open_table.as_mut() {
            open.depth += 1;
            self.block_break();
            return None;
        }

        let markup = self.options.treat_as_markup;
        let (inner_end, outer_end) = markup::find_closing(self.raw, end, "table", markup)
            .unwrap_or((self.raw.len(), self.raw.len()));
        let has_row_markup = markup && markup::has_row_markup(&self.raw[end..inner_end]);
        let index = self.tables.len();

        let forced = self.options.force_raw_tables.contains(&index);
        if forced || (!has_row_markup && self.options.preserve_raw_tables) {
            self.preserve_table(index, start..outer_end, end..inner_end, has_row_markup);
            return Some(outer_end);
        }

        self.tables.push(TableBlock {
            index,
            byte_range: start..outer_end,
            has_row_markup,
            layout: TableLayout::Structured,
            canonical_range: None,
        });
        self.open_table = Some(OpenTable {
            slot: index,
            depth: 1,
            first_char: None,
        });
        self.block_break();
        None
    }

    fn close_table(&mut self) {
        let Some(open) = self.open_table.take() else {
            return;
        };
        let end = self.content_end();
        let block = &mut self.tables[open.slot];
        match open.first_char {
            Some(first) if end > first => block.canonical_range = Some(first..end),
            _ => {
                block.layout = TableLayout::Dropped;
                debug!(error = %PrepError::EmptyTable { table_index: block.index }, "dropping table block");
            }
        }
    }

    fn preserve_table(
        &mut self,
        index: usize,
        outer: Range<usize>,
        inner: Range<usize>,
        has_row_markup: bool,
    ) {
        let lines = preserve::collect_lines(
            self.raw,
            inner,
            self.options.treat_as_markup,
            &self.source_id,
        );

        if lines.is_empty() {
            debug!(error = %PrepError::EmptyTable { table_index: index }, "dropping table block");
            self.tables.push(TableBlock {
                index,
                byte_range: outer,
                has_row_markup,
                layout: TableLayout::Dropped,
                canonical_range: None,
            });
            return;
        }

        self.block_break();
        self.apply_breaks();
        let first = self.sources.len();

        self.push_synthetic(TABLE_OPEN_MARKER);
        self.push('\n', None);
        for (k, line) in lines.into_iter().enumerate() {
            if k > 0 {
                self.push('\n', None);
            }
            for (c, src) in line {
                self.push(c, src);
            }
        }
        self.push('\n', None);
        self.push_synthetic(TABLE_CLOSE_MARKER);

        debug!(table = index, chars = self.sources.len() - first, "preserved raw table");
        self.tables.push(TableBlock {
            index,
            byte_range: outer,
            has_row_markup,
            layout: TableLayout::Preserved,
            canonical_range: Some(first..self.sources.len()),
        });
        self.block_break();
    }

    // -----------------------------------------------------------------------
    // Characters and whitespace
    // -----------------------------------------------------------------------

    fn emit_char(&mut self, c: char, start: usize, end: usize) {
        let src = SourceSpan::new(self.source_id.clone(), start, end);
        text::normalize_char(c, |n| self.emit_normalized(n, &src));
    }

    fn emit_normalized(&mut self, c: char, src: &SourceSpan) {
        if c == '\n' || c == '\r' {
            if self.options.treat_as_markup && self.pre_depth == 0 {
                self.space(src);
            } else {
                self.source_newline(src);
            }
            return;
        }
        if c.is_whitespace() {
            self.space(src);
            return;
        }

        self.flush_newlines();
        self.apply_breaks();
        self.record_first_char();
        self.push(c, Some(src.clone()));
    }

    fn space(&mut self, src: &SourceSpan) {
        if self.pending_block
            || self.pending_gap
            || self.pending_newlines.is_some()
            || self.last_was_space
        {
            return;
        }
        if matches!(self.text.chars().next_back(), None | Some('\n')) {
            return;
        }
        self.push(' ', Some(src.clone()));
    }

    fn source_newline(&mut self, src: &SourceSpan) {
        match &mut self.pending_newlines {
            Some((count, _)) => *count += 1,
            None => self.pending_newlines = Some((1, src.clone())),
        }
    }

    /// One source newline is kept as a line break; two or more form a paragraph break.
    fn flush_newlines(&mut self) {
        let Some((count, src)) = self.pending_newlines.take() else {
            return;
        };
        if count >= 2 {
            self.pending_block = true;
        } else if !self.pending_block {
            self.newline(Some(src));
        }
    }

    fn line_break(&mut self) {
        self.flush_newlines();
        self.apply_breaks();
        self.newline(None);
    }

    fn newline(&mut self, src: Option<SourceSpan>) {
        self.strip_trailing_spaces();
        if !matches!(self.text.chars().next_back(), None | Some('\n')) {
            self.push('\n', src);
        }
    }

    fn block_break(&mut self) {
        self.pending_newlines = None;
        self.pending_block = true;
    }

    fn apply_breaks(&mut self) {
        if self.pending_block {
            self.pending_block = false;
            self.pending_gap = false;
            self.strip_trailing_spaces();
            if self.text.is_empty() {
                return;
            }
            let trailing = self
                .text
                .chars()
                .rev()
                .take(2)
                .take_while(|c| *c == '\n')
                .count();
            for _ in trailing..2 {
                self.push('\n', None);
            }
        } else if self.pending_gap {
            self.pending_gap = false;
            if !matches!(self.text.chars().next_back(), None | Some('\n') | Some(' ')) {
                self.push(' ', None);
            }
        }
    }

    fn record_first_char(&mut self) {
        let at = self.sources.len();
        if self.heading_depth > 0 && self.heading_first.is_none() {
            self.heading_first = Some(at);
        }
        if let Some(open) = self.open_table.as_mut() {
            open.first_char.get_or_insert(at);
        }
    }

    fn push(&mut self, c: char, src: Option<SourceSpan>) {
        self.text.push(c);
        self.sources.push(src);
        self.last_was_space = c == ' ';
    }

    fn push_synthetic(&mut self, s: &str) {
        for c in s.chars() {
            self.push(c, None);
        }
    }

    fn strip_trailing_spaces(&mut self) {
        while self.text.ends_with(' ') {
            self.text.pop();
            self.sources.pop();
        }
        self.last_was_space = false;
    }

    /// End of the last visible character, ignoring trailing layout whitespace.
    fn content_end(&self) -> usize {
        let trailing = self
            .text
            .chars()
            .rev()
            .take_while(|c| *c == ' ' || *c == '\n')
            .count();
        self.sources.len() - trailing
    }

    fn finish(mut self) -> CanonicalDocument {
        self.pending_newlines = None;
        if self.open_table.is_some() {
            warn!("table never closed, ending it at end of input");
            self.close_table();
        }
        if self.heading_depth > 0 {
            self.close_heading();
        }
        while self.text.ends_with([' ', '\n']) {
            self.text.pop();
            self.sources.pop();
        }

        CanonicalDocument {
            source_id: self.source_id,
            text: self.text,
            char_sources: self.sources,
            treat_as_markup: self.options.treat_as_markup,
            tables: self.tables,
            heading_ranges: self.heading_ranges,
        }
    }
}
