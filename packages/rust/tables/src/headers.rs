//! Header detection, caption/value pairing, glyph filtering and trail/label
//! derivation over a placed grid.

use tracing::debug;

use crate::{CellRole, HeaderMode, TableGrid};

/// Checkbox and bullet glyphs that stand in for form controls.
const PLACEHOLDER_GLYPHS: &[char] = &[
    '■', '□', '☐', '☑', '☒', '¨', 'þ', 'ý', '✓', '✔', '✗', '✘', '•', '▪', '◻', '◼', '❑', 'o',
];

/// Lowercase words allowed inside an otherwise title-cased caption.
const SMALL_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "in", "of", "on", "or", "per", "the", "to", "with",
];

/// Joins successive headers along one axis.
pub const TRAIL_SEPARATOR: &str = " / ";

const MAX_CAPTION_CHARS: usize = 80;

/// A cell consisting solely of one to three placeholder glyphs.
pub fn is_glyph_only(text: &str) -> bool {
    let glyphs: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    // A bare 'o' is a glyph only next to other glyphs.
    !glyphs.is_empty()
        && glyphs.len() <= 3
        && glyphs.iter().all(|c| PLACEHOLDER_GLYPHS.contains(c))
        && glyphs.iter().any(|c| *c != 'o')
}

/// Short, digit-free text that is parenthetical or title-cased.
pub fn is_caption_like(text: &str) -> bool {
    let t = text.trim();
    if t.is_empty() || t.chars().count() > MAX_CAPTION_CHARS || t.chars().any(|c| c.is_ascii_digit())
    {
        return false;
    }
    if is_parenthetical(t) {
        return true;
    }
    let words: Vec<&str> = t.split_whitespace().collect();
    words.len() >= 2
        && words.iter().all(|word| {
            let w = word.trim_matches(|c: char| !c.is_alphanumeric());
            w.is_empty()
                || SMALL_WORDS.contains(&w.to_lowercase().as_str())
                || w.chars().next().is_some_and(char::is_uppercase)
        })
}

fn is_parenthetical(text: &str) -> bool {
    text.len() > 2 && text.starts_with('(') && text.ends_with(')')
}

fn strip_parens(text: &str) -> &str {
    if is_parenthetical(text) {
        text[1..text.len() - 1].trim()
    } else {
        text
    }
}

/// Fill in header rows/columns, roles, trails and labels.
pub(crate) fn resolve(grid: &mut TableGrid, head_rows: &[bool]) {
    for cell in &mut grid.cells {
        cell.role = if cell.text.is_empty() {
            CellRole::Empty
        } else if is_glyph_only(&cell.text) {
            CellRole::Glyph
        } else {
            CellRole::Value
        };
    }

    detect_header_rows(grid, head_rows);
    detect_header_cols(grid);

    let paired = pair_captions(grid);
    if paired > 0 {
        debug!(pairs = paired, "paired value rows with caption rows");
    } else {
        if grid.row_header_mode == HeaderMode::None && grid.rows >= 2 {
            grid.header_rows = 1;
            grid.row_header_mode = HeaderMode::Default;
        }
        if grid.col_header_mode == HeaderMode::None && grid.cols >= 2 {
            grid.header_cols = 1;
            grid.col_header_mode = HeaderMode::Default;
        }
    }

    for cell in &mut grid.cells {
        let in_header = cell.row < grid.header_rows || cell.col < grid.header_cols;
        if in_header && cell.role == CellRole::Value {
            cell.role = CellRole::Header;
        }
    }

    derive_trails(grid);
    derive_labels(grid);
}

/// Indexes of the non-padding cells whose top-left corner is in row `r`.
fn origins_in_row(grid: &TableGrid, r: usize) -> Vec<usize> {
    grid.cells
        .iter()
        .enumerate()
        .filter(|(_, c)| c.row == r && !c.padding)
        .map(|(i, _)| i)
        .collect()
}

fn detect_header_rows(grid: &mut TableGrid, head_rows: &[bool]) {
    let explicit = (0..grid.rows)
        .take_while(|&r| {
            let origins = origins_in_row(grid, r);
            head_rows.get(r).copied().unwrap_or(false)
                || (!origins.is_empty() && origins.iter().all(|&i| grid.cells[i].is_header))
        })
        .count();
    if explicit > 0 {
        grid.header_rows = explicit;
        grid.row_header_mode = HeaderMode::Explicit;
        return;
    }

    let styled = (0..grid.rows)
        .take_while(|&r| {
            let filled: Vec<usize> = origins_in_row(grid, r)
                .into_iter()
                .filter(|&i| !grid.cells[i].text.is_empty())
                .collect();
            !filled.is_empty() && filled.iter().all(|&i| grid.cells[i].styled)
        })
        .count();
    // A styled caption row only counts when a data row follows it.
    if styled > 0 && styled < grid.rows {
        grid.header_rows = styled;
        grid.row_header_mode = HeaderMode::Styled;
    }
}

fn detect_header_cols(grid: &mut TableGrid) {
    if grid.header_rows >= grid.rows {
        return;
    }
    let explicit = (0..grid.cols)
        .take_while(|&c| {
            (grid.header_rows..grid.rows).all(|r| {
                grid.owner_at(r, c)
                    .is_some_and(|cell| cell.is_header && !cell.padding)
            })
        })
        .count();
    if explicit > 0 && explicit < grid.cols {
        grid.header_cols = explicit;
        grid.col_header_mode = HeaderMode::Explicit;
    }
}

/// Pair rows of bare values with a caption row directly below them.
/// Returns the number of values relabeled.
fn pair_captions(grid: &mut TableGrid) -> usize {
    let mut pairs = 0;
    let mut r = grid.header_rows;

    while r + 1 < grid.rows {
        let values: Vec<usize> = origins_in_row(grid, r)
            .into_iter()
            .filter(|&i| grid.cells[i].role != CellRole::Empty)
            .collect();
        let captions: Vec<usize> = origins_in_row(grid, r + 1)
            .into_iter()
            .filter(|&i| grid.cells[i].role != CellRole::Empty)
            .collect();

        let captions_ok = !captions.is_empty()
            && captions.iter().all(|&i| {
                grid.cells[i].role == CellRole::Value && is_caption_like(&grid.cells[i].text)
            });
        let all_parenthetical = captions.iter().all(|&i| is_parenthetical(&grid.cells[i].text));
        let values_ok = !values.is_empty()
            && values.iter().all(|&i| {
                let cell = &grid.cells[i];
                cell.role == CellRole::Value
                    && !is_parenthetical(&cell.text)
                    && (all_parenthetical || !is_caption_like(&cell.text))
            });

        if !(captions_ok && values_ok) {
            r += 1;
            continue;
        }

        let mut matched = Vec::new();
        for &v in &values {
            let col = grid.cells[v].col;
            if let Some(c) = grid.owner_index(r + 1, col) {
                if grid.cells[c].row == r + 1 && captions.contains(&c) {
                    matched.push((v, c));
                }
            }
        }
        if matched.is_empty() {
            r += 1;
            continue;
        }

        for &c in &captions {
            grid.cells[c].role = CellRole::Caption;
            grid.cells[c].label = strip_parens(&grid.cells[c].text).to_string();
        }
        for (v, c) in matched {
            let caption = strip_parens(&grid.cells[c].text).to_string();
            let value = &mut grid.cells[v];
            value.label = format!("{} ({caption})", value.text);
            value.col_header_trail = caption;
            value.paired = true;
            pairs += 1;
        }
        r += 2;
    }
    pairs
}

/// Text a cell contributes to a header trail, if any.
fn trail_text(grid: &TableGrid, idx: usize) -> Option<&str> {
    let cell = &grid.cells[idx];
    match cell.role {
        CellRole::Empty | CellRole::Glyph => None,
        _ => Some(cell.text.as_str()),
    }
}

fn join_trail<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in parts {
        if out.last() != Some(&part) {
            out.push(part);
        }
    }
    out.join(TRAIL_SEPARATOR)
}

fn derive_trails(grid: &mut TableGrid) {
    let mut trails = Vec::with_capacity(grid.cells.len());
    for (idx, cell) in grid.cells.iter().enumerate() {
        if cell.padding {
            trails.push((String::new(), None));
            continue;
        }

        // Owners above the cell within the header rows, deduplicated by owner.
        let mut owners: Vec<usize> = Vec::new();
        for hr in 0..grid.header_rows.min(cell.row) {
            if let Some(o) = grid.owner_index(hr, cell.col) {
                if o != idx && !owners.contains(&o) {
                    owners.push(o);
                }
            }
        }
        let col_trail = join_trail(owners.iter().filter_map(|&o| trail_text(grid, o)));

        let row_trail = if cell.row < grid.header_rows {
            String::new()
        } else {
            let mut owners: Vec<usize> = Vec::new();
            for hc in 0..grid.header_cols.min(cell.col) {
                if let Some(o) = grid.owner_index(cell.row, hc) {
                    if o != idx && !owners.contains(&o) {
                        owners.push(o);
                    }
                }
            }
            join_trail(owners.iter().filter_map(|&o| trail_text(grid, o)))
        };

        trails.push((row_trail, (!cell.paired).then_some(col_trail)));
    }

    for (cell, (row_trail, col_trail)) in grid.cells.iter_mut().zip(trails) {
        cell.row_header_trail = row_trail;
        if let Some(col_trail) = col_trail {
            cell.col_header_trail = col_trail;
        }
    }
}

fn derive_labels(grid: &mut TableGrid) {
    let mut labels = Vec::with_capacity(grid.cells.len());
    for (idx, cell) in grid.cells.iter().enumerate() {
        let label = match cell.role {
            CellRole::Empty => String::new(),
            CellRole::Glyph => promote_label(grid, idx),
            _ if !cell.label.is_empty() => cell.label.clone(),
            _ => cell.text.clone(),
        };
        labels.push(label);
    }
    for (cell, label) in grid.cells.iter_mut().zip(labels) {
        cell.label = label;
    }
}

/// Nearest descriptive text for a glyph cell: same row to the right, then to
/// the left, then the row header trail.
fn promote_label(grid: &TableGrid, idx: usize) -> String {
    let cell = &grid.cells[idx];
    let descriptive = |c: usize| -> Option<String> {
        let o = grid.owner_index(cell.row, c)?;
        let owner = &grid.cells[o];
        matches!(owner.role, CellRole::Value | CellRole::Header | CellRole::Caption)
            .then(|| owner.text.clone())
    };

    (cell.col + cell.col_span..grid.cols)
        .find_map(descriptive)
        .or_else(|| (0..cell.col).rev().find_map(descriptive))
        .unwrap_or_else(|| cell.row_header_trail.clone())
}
