// src/raw_table.rs
use csv::ReaderBuilder;
use std::{fs::File, io::Read, path::Path};
use tracing::trace;

/// An untyped CSV table: one header row, every field kept as text.
///
/// Both the downloaded AQI archives and the joiner's input files pass through this
/// shape before any column is coerced to a type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column names from the header row, in file order.
    pub headers: Vec<String>,
    /// Data rows, padded or truncated to `headers.len()` fields.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Parse delimited text with a header row.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // ragged rows are padded below
            .from_reader(reader);

        let mut headers: Vec<String> = rdr
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).to_string())
            .collect();
        if let Some(first) = headers.first_mut() {
            if let Some(stripped) = first.strip_prefix('\u{feff}') {
                *first = stripped.to_string();
            }
        }

        let width = headers.len();
        let mut rows = Vec::new();
        for record in rdr.byte_records() {
            let record = record?;
            let mut row: Vec<String> = record
                .iter()
                .take(width)
                .map(|f| String::from_utf8_lossy(f).to_string())
                .collect();
            row.resize(width, String::new());
            rows.push(row);
        }
        trace!(columns = width, rows = rows.len(), "parsed CSV table");

        Ok(Self { headers, rows })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, csv::Error> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// True when the table carries no data rows (a header alone counts as empty).
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}
