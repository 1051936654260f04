// src/merge/mod.rs
pub mod sniff;
pub mod utils;

use arrow::{
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
    record_batch::RecordBatch,
};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::raw_table::RawTable;
pub use sniff::{sniff_identifier, IdentifierColumn, IdentifierKind, SniffError};
use utils::{build_array, canonical_key, clean_str, infer_arrow_dtype};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("no usable tables among {0} input file(s)")]
    NoUsableTables(usize),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// What one input contributed to the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub path: PathBuf,
    pub identifier: IdentifierColumn,
    pub rows: usize,
    /// Output names of the non-identifier columns this file added.
    pub fields: Vec<String>,
    /// Seed rows that found a match in this file.
    pub matched: usize,
}

/// An input left out of the merge, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: SniffError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub sources: Vec<SourceSummary>,
    pub skipped: Vec<SkippedSource>,
}

#[derive(Debug, Clone)]
pub struct MergedTable {
    pub batch: RecordBatch,
    pub report: MergeReport,
}

/// Column name not yet taken: `name`, else `name_{stem}`, else `name_{stem}_{n}`.
fn unique_name(name: &str, stem: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 1;
    while taken.contains(&candidate) {
        candidate = if n == 1 {
            format!("{name}_{stem}")
        } else {
            format!("{name}_{stem}_{n}")
        };
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

fn present(cell: &str) -> Option<String> {
    let v = clean_str(cell);
    (!v.is_empty()).then_some(v)
}

/// Left-join CSV tables on their detected identifier columns.
///
/// The first usable file fixes the row set and its identifier values, which become
/// the `identifier_name` column. Every usable file (that one included) then
/// contributes its other columns, matched on [`canonical_key`]; keys missing from
/// a file leave nulls, keys only a later file has are dropped, and a duplicated key
/// in a later file matches its first occurrence. Clashing column names get a
/// `_{file stem}` suffix. Files with no rows or no identifier column are skipped
/// and listed in the report.
#[instrument(level = "info", skip(files), fields(files = files.len()))]
pub fn merge_tables<P: AsRef<Path>>(
    files: &[P],
    identifier_name: &str,
) -> Result<MergedTable, MergeError> {
    let mut report = MergeReport::default();
    let mut seed: Option<(Vec<Option<String>>, Vec<String>)> = None;
    let mut taken: HashSet<String> = HashSet::from([identifier_name.to_string()]);
    let mut columns: Vec<(String, Vec<Option<String>>)> = Vec::new();

    for path in files {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());

        let table = RawTable::from_path(path).map_err(|source| MergeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let id = match sniff_identifier(&table) {
            Ok(id) => id,
            Err(reason) => {
                warn!(file = %file_name, error = %reason, "skipping table");
                report.skipped.push(SkippedSource {
                    path: path.to_path_buf(),
                    reason,
                });
                continue;
            }
        };
        info!(file = %file_name, id_field = %id.name, index = id.index, "found identifier column");

        let matches: Vec<Option<usize>> = match &seed {
            Some((_, seed_keys)) => {
                let mut index: HashMap<String, usize> = HashMap::new();
                for (i, row) in table.rows.iter().enumerate() {
                    let key = canonical_key(&row[id.index]);
                    if !key.is_empty() {
                        index.entry(key).or_insert(i);
                    }
                }
                seed_keys.iter().map(|k| index.get(k).copied()).collect()
            }
            None => {
                // the seed file lines up with itself row for row
                let values = table.rows.iter().map(|r| present(&r[id.index])).collect();
                let keys = table.rows.iter().map(|r| canonical_key(&r[id.index])).collect();
                seed = Some((values, keys));
                (0..table.rows.len()).map(Some).collect()
            }
        };

        let mut fields = Vec::new();
        for (col, header) in table.headers.iter().enumerate() {
            if col == id.index {
                continue;
            }
            let name = unique_name(header, &stem, &mut taken);
            let values = matches
                .iter()
                .map(|m| m.and_then(|r| present(&table.rows[r][col])))
                .collect();
            fields.push(name.clone());
            columns.push((name, values));
        }

        let matched = matches.iter().filter(|m| m.is_some()).count();
        info!(
            file = %file_name,
            rows = table.rows.len(),
            fields = fields.len(),
            matched,
            "joined table"
        );
        report.sources.push(SourceSummary {
            path: path.to_path_buf(),
            identifier: id,
            rows: table.rows.len(),
            fields,
            matched,
        });
    }

    let Some((seed_values, _)) = seed else {
        return Err(MergeError::NoUsableTables(files.len()));
    };

    let mut schema_fields = vec![Field::new(identifier_name, DataType::Utf8, true)];
    let mut arrays = vec![build_array(&seed_values, &DataType::Utf8)];
    for (name, values) in &columns {
        let dtype = infer_arrow_dtype(values.iter().map(|v| v.as_deref()));
        arrays.push(build_array(values, &dtype));
        schema_fields.push(Field::new(name.as_str(), dtype, true));
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(schema_fields)), arrays)?;

    info!(
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        skipped = report.skipped.len(),
        "merged"
    );
    Ok(MergedTable { batch, report })
}
