//! Flat, column-friendly anchor rows for `anchors.jsonl`.

use serde::{Deserialize, Serialize};

use filingprep_shared::{
    Anchor, AnchorKind, CanonicalSpan, CellAddress, HintFlags, PrepError, Result, SourceSpan,
};

/// One anchor as a flat row. Table-cell columns are absent for other kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: String,
    pub kind: AnchorKind,
    pub from: usize,
    pub to: usize,
    pub source_spans: Vec<SourceSpan>,
    pub context_hash_before: String,
    pub context_hash_after: String,
    pub text_hash: String,
    #[serde(default)]
    pub hint_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_header_trail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_header_trail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl From<&Anchor> for AnchorRecord {
    fn from(anchor: &Anchor) -> Self {
        let cell = anchor.cell.as_ref();
        Self {
            id: anchor.id.clone(),
            kind: anchor.kind,
            from: anchor.span.from,
            to: anchor.span.to,
            source_spans: anchor.source_spans.clone(),
            context_hash_before: anchor.context_hash_before.clone(),
            context_hash_after: anchor.context_hash_after.clone(),
            text_hash: anchor.text_hash.clone(),
            hint_flags: anchor.hints.names().into_iter().map(String::from).collect(),
            table: cell.map(|c| c.table),
            row: cell.map(|c| c.row),
            col: cell.map(|c| c.col),
            row_header_trail: cell.map(|c| c.row_header_trail.clone()),
            col_header_trail: cell.map(|c| c.col_header_trail.clone()),
            label: cell.map(|c| c.label.clone()),
        }
    }
}

impl AnchorRecord {
    /// Rebuild the anchor, rejecting unknown hint names and half-filled cell columns.
    pub fn into_anchor(self) -> Result<Anchor> {
        let mut hints = HintFlags::default();
        for name in &self.hint_flags {
            match name.as_str() {
                "heading_like" => hints.heading_like = true,
                "table_like" => hints.table_like = true,
                "xref_like" => hints.xref_like = true,
                other => {
                    return Err(PrepError::validation(format!(
                        "anchor {}: unknown hint flag {other:?}",
                        self.id
                    )));
                }
            }
        }

        let cell = match (self.kind, self.table, self.row, self.col) {
            (AnchorKind::TableCell, Some(table), Some(row), Some(col)) => Some(CellAddress {
                table,
                row,
                col,
                row_header_trail: self.row_header_trail.unwrap_or_default(),
                col_header_trail: self.col_header_trail.unwrap_or_default(),
                label: self.label.unwrap_or_default(),
            }),
            (AnchorKind::TableCell, ..) => {
                return Err(PrepError::validation(format!(
                    "table cell anchor {} is missing its grid address",
                    self.id
                )));
            }
            _ => None,
        };

        Ok(Anchor {
            id: self.id,
            kind: self.kind,
            span: CanonicalSpan {
                from: self.from,
                to: self.to,
            },
            source_spans: self.source_spans,
            context_hash_before: self.context_hash_before,
            context_hash_after: self.context_hash_after,
            text_hash: self.text_hash,
            hints,
            cell,
        })
    }
}
