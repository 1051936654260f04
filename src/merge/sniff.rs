// src/merge/sniff.rs
//! Identifier-column detection.
//!
//! Headers are not reliably labelled across data sources, so the identifier is
//! found from the content of the first data row. Scanning left to right, the first
//! value that qualifies marks the identifier column:
//!
//! - a text value (anything that does not parse as a number), or
//! - a number with exactly [`TRACT_CODE_DIGITS`] digits when rendered as an integer
//!   (a census tract code). An all-digit value with that many characters also
//!   counts, so zero-padded codes such as `06075010100` are not lost.
//!
//! Empty cells never qualify. When nothing qualifies the table is rejected with
//! [`SniffError::NoIdentifierColumn`].

use thiserror::Error;

use crate::raw_table::RawTable;

/// Digit count of a full census tract code (state + county + tract).
pub const TRACT_CODE_DIGITS: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SniffError {
    #[error("table has no data rows")]
    NoDataRows,
    #[error("no identifier column: first row has no text value and no {digits}-digit code")]
    NoIdentifierColumn { digits: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Text,
    TractCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierColumn {
    pub index: usize,
    pub name: String,
    pub kind: IdentifierKind,
}

/// Whether a single first-row value marks its column as the identifier.
pub fn classify(value: &str) -> Option<IdentifierKind> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if v.len() == TRACT_CODE_DIGITS && v.bytes().all(|b| b.is_ascii_digit()) {
        return Some(IdentifierKind::TractCode);
    }
    match v.parse::<f64>() {
        Ok(n) if n.is_finite() => {
            let digits = (n.trunc() as i128).unsigned_abs().to_string().len();
            (digits == TRACT_CODE_DIGITS).then_some(IdentifierKind::TractCode)
        }
        // NaN / inf are missing numbers, not labels
        Ok(_) => None,
        Err(_) => Some(IdentifierKind::Text),
    }
}

/// Locate the identifier column of `table` from its first data row.
pub fn sniff_identifier(table: &RawTable) -> Result<IdentifierColumn, SniffError> {
    let first = table.rows.first().ok_or(SniffError::NoDataRows)?;
    first
        .iter()
        .enumerate()
        .find_map(|(index, value)| {
            classify(value).map(|kind| IdentifierColumn {
                index,
                name: table.headers[index].clone(),
                kind,
            })
        })
        .ok_or(SniffError::NoIdentifierColumn {
            digits: TRACT_CODE_DIGITS,
        })
}
