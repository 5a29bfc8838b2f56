//! Table Structure Resolver: a raw table fragment to a logical grid.
//!
//! HTML fragments are parsed with `scraper`; legacy SGML fragments are split
//! on their `<S>`/`<C>` column markers. Both paths end in the same span
//! expansion and header resolution, so every coordinate of the grid maps to
//! exactly one owner cell carrying its header trails and effective label.

mod grid;
mod headers;
mod html;
mod legacy;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use filingprep_shared::{PrepError, Result};

pub use headers::{is_caption_like, is_glyph_only, TRAIL_SEPARATOR};

static ROW_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<t[rdh][\s>/]").expect("valid regex"));

// ---------------------------------------------------------------------------
// Grid model
// ---------------------------------------------------------------------------

/// What a cell contributes after header resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRole {
    Header,
    /// Caption row text paired with the value above it.
    Caption,
    Value,
    /// Only placeholder glyphs (checkbox renderings).
    Glyph,
    Empty,
}

/// How header rows or columns were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// `<th>` cells or a `<thead>` section (caption lines for legacy tables).
    Explicit,
    /// Leading bold/underlined rows followed by a data row.
    Styled,
    /// First row / first column.
    Default,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridOrigin {
    Html,
    LegacyAscii,
}

/// An owner cell: the top-left cell of its (possibly 1×1) spanning block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCell {
    /// Zero-based grid row.
    pub row: usize,
    /// Zero-based grid column.
    pub col: usize,
    pub row_span: usize,
    pub col_span: usize,
    /// Normalized cell text.
    pub text: String,
    pub is_header: bool,
    pub styled: bool,
    /// Synthetic owner filling a hole left by a short row.
    pub padding: bool,
    pub role: CellRole,
    pub row_header_trail: String,
    pub col_header_trail: String,
    /// Effective label: `value (caption)` when paired, promoted text for glyphs.
    pub label: String,
    /// Whether this value was paired with a caption below it.
    pub paired: bool,
}

impl TableCell {
    pub(crate) fn padding(row: usize, col: usize) -> Self {
        Self {
            row,
            col,
            row_span: 1,
            col_span: 1,
            text: String::new(),
            is_header: false,
            styled: false,
            padding: true,
            role: CellRole::Empty,
            row_header_trail: String::new(),
            col_header_trail: String::new(),
            label: String::new(),
            paired: false,
        }
    }
}

/// Logical rows × columns after span expansion.
///
/// `slots` holds one owner index per coordinate, row-major; `cells` holds the
/// owners in reading order.
#[derive(Debug, Clone)]
pub struct TableGrid {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<TableCell>,
    slots: Vec<usize>,
    pub header_rows: usize,
    pub header_cols: usize,
    pub row_header_mode: HeaderMode,
    pub col_header_mode: HeaderMode,
    pub origin: GridOrigin,
}

impl TableGrid {
    /// Index into `cells` of the owner of `(row, col)`.
    pub fn owner_index(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.slots.get(row * self.cols + col).copied()
    }

    pub fn owner_at(&self, row: usize, col: usize) -> Option<&TableCell> {
        self.owner_index(row, col).and_then(|i| self.cells.get(i))
    }

    /// Owners that carry text, in reading order.
    pub fn text_owners(&self) -> impl Iterator<Item = &TableCell> {
        self.cells.iter().filter(|c| !c.padding && !c.text.is_empty())
    }
}

/// A grid tied to its top-level table index in the document.
#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub table_index: usize,
    pub grid: TableGrid,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Whether a fragment declares `<tr>`/`<td>`/`<th>` structure.
pub fn has_row_markup(fragment: &str) -> bool {
    ROW_MARKUP.is_match(fragment)
}

/// Resolve one raw table block (opening through closing tag) into a grid.
///
/// Fails with [`PrepError::MalformedTable`] when the block has no usable
/// structure or declares spans outside the grid; the caller then keeps the
/// block verbatim instead.
#[instrument(skip(fragment), fields(bytes = fragment.len()))]
pub fn resolve_table(fragment: &str, table_index: usize) -> Result<ResolvedTable> {
    let (rows, declared_cols, origin) = if has_row_markup(fragment) {
        let (rows, declared) = html::parse(fragment, table_index)?;
        (rows, declared, GridOrigin::Html)
    } else if legacy::has_column_markers(fragment) {
        (legacy::parse(fragment, table_index)?, None, GridOrigin::LegacyAscii)
    } else {
        return Err(PrepError::malformed_table(
            table_index,
            "no row/cell markup and no column markers",
        ));
    };

    let (mut grid, head_rows) = grid::place(table_index, rows, declared_cols, origin)?;
    headers::resolve(&mut grid, &head_rows);

    debug!(
        rows = grid.rows,
        cols = grid.cols,
        owners = grid.cells.len(),
        header_rows = grid.header_rows,
        header_cols = grid.header_cols,
        row_mode = ?grid.row_header_mode,
        col_mode = ?grid.col_header_mode,
        "resolved table"
    );

    Ok(ResolvedTable { table_index, grid })
}
