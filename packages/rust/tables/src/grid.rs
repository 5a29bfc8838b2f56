//! Span expansion: provisional rows of declared cells to an index-based grid.

use filingprep_shared::{PrepError, Result};

use crate::{CellRole, GridOrigin, HeaderMode, TableCell, TableGrid};

/// Spans beyond this are treated as malformed rather than allocated.
pub(crate) const MAX_SPAN: usize = 1000;

/// A cell as declared in the source, before placement.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawCell {
    pub text: String,
    pub is_header: bool,
    pub styled: bool,
    /// 0 means "to the last row", as in HTML.
    pub row_span: usize,
    pub col_span: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RawRow {
    pub cells: Vec<RawCell>,
    /// Row declared inside a header section (`<thead>` or legacy caption lines).
    pub in_head: bool,
}

/// Place declared cells on a grid, expanding spans and padding ragged rows.
///
/// Every coordinate ends up owned by exactly one cell: spanning cells own
/// their whole block, and holes are filled with empty padding owners.
pub(crate) fn place(
    table_index: usize,
    rows: Vec<RawRow>,
    declared_cols: Option<usize>,
    origin: GridOrigin,
) -> Result<(TableGrid, Vec<bool>)> {
    let n_rows = rows.len();
    if n_rows == 0 {
        return Err(PrepError::malformed_table(table_index, "no rows"));
    }

    let head_rows: Vec<bool> = rows.iter().map(|r| r.in_head).collect();
    let mut occupancy: Vec<Vec<Option<usize>>> = vec![Vec::new(); n_rows];
    let mut cells: Vec<TableCell> = Vec::new();

    for (r, row) in rows.into_iter().enumerate() {
        let mut c = 0;
        for raw in row.cells {
            while occupancy[r].get(c).is_some_and(Option::is_some) {
                c += 1;
            }

            let row_span = if raw.row_span == 0 { n_rows - r } else { raw.row_span };
            let col_span = raw.col_span.max(1);
            if row_span > MAX_SPAN || col_span > MAX_SPAN {
                return Err(PrepError::malformed_table(
                    table_index,
                    format!("span {row_span}x{col_span} at row {} exceeds {MAX_SPAN}", r + 1),
                ));
            }
            if r + row_span > n_rows {
                return Err(PrepError::malformed_table(
                    table_index,
                    format!(
                        "rowspan {row_span} at row {} extends past last row {n_rows}",
                        r + 1
                    ),
                ));
            }

            let idx = cells.len();
            for line in &mut occupancy[r..r + row_span] {
                if line.len() < c + col_span {
                    line.resize(c + col_span, None);
                }
                for slot in &mut line[c..c + col_span] {
                    if slot.is_some() {
                        return Err(PrepError::malformed_table(
                            table_index,
                            format!("overlapping spans at row {} col {}", r + 1, c + 1),
                        ));
                    }
                    *slot = Some(idx);
                }
            }

            cells.push(TableCell {
                row: r,
                col: c,
                row_span,
                col_span,
                text: raw.text,
                is_header: raw.is_header,
                styled: raw.styled,
                padding: false,
                role: CellRole::Empty,
                row_header_trail: String::new(),
                col_header_trail: String::new(),
                label: String::new(),
                paired: false,
            });
            c += col_span;
        }
    }

    let cols = occupancy.iter().map(Vec::len).max().unwrap_or(0);
    if cols == 0 {
        return Err(PrepError::malformed_table(table_index, "no cells"));
    }
    if let Some(declared) = declared_cols.filter(|d| *d > 0) {
        if cols > declared {
            return Err(PrepError::malformed_table(
                table_index,
                format!("cells extend to column {cols} but only {declared} declared"),
            ));
        }
    }

    for (r, line) in occupancy.iter_mut().enumerate() {
        line.resize(cols, None);
        for (c, slot) in line.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(cells.len());
                cells.push(TableCell::padding(r, c));
            }
        }
    }

    // Owners in reading order, so that owner order matches canonical order.
    let mut order: Vec<usize> = (0..cells.len()).collect();
    order.sort_by_key(|&i| (cells[i].row, cells[i].col));
    let mut remap = vec![0; cells.len()];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new;
    }
    let mut slotted: Vec<Option<TableCell>> = cells.into_iter().map(Some).collect();
    let cells: Vec<TableCell> = order.iter().filter_map(|&old| slotted[old].take()).collect();

    let slots = occupancy
        .into_iter()
        .flatten()
        .map(|slot| slot.map_or(0, |old| remap[old]))
        .collect();

    let grid = TableGrid {
        rows: n_rows,
        cols,
        cells,
        slots,
        header_rows: 0,
        header_cols: 0,
        row_header_mode: HeaderMode::None,
        col_header_mode: HeaderMode::None,
        origin,
    };
    Ok((grid, head_rows))
}
