// src/fetch/archive.rs
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;
use zip::ZipArchive;

use super::client::{LegacyClient, TransportError};
use crate::raw_table::RawTable;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("reading zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("zip archive has no entries")]
    Empty,
    #[error("parsing CSV entry {entry}: {source}")]
    Csv {
        entry: String,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("archive from {url}: {source}")]
    Archive {
        url: String,
        #[source]
        source: ArchiveError,
    },
}

/// Decompress the first entry listed in an in-memory zip and parse it as CSV.
///
/// EPA archives hold a single CSV; if there are more entries the rest are ignored.
pub fn table_from_zip_bytes(bytes: &[u8]) -> Result<RawTable, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() == 0 {
        return Err(ArchiveError::Empty);
    }
    let entry = archive.by_index(0)?;
    let name = entry.name().to_string();
    debug!(entry = %name, size = entry.size(), "reading first archive entry");
    RawTable::from_reader(entry).map_err(|source| ArchiveError::Csv {
        entry: name,
        source,
    })
}

/// Fetch a zipped CSV and parse its first entry.
///
/// A non-200 status means the period was never published: the result is an empty
/// table and a warning tagged with `context`, not an error.
#[instrument(level = "info", skip(client), fields(url = %url))]
pub async fn fetch_archive_table(
    client: &LegacyClient,
    url: &Url,
    context: &str,
) -> Result<RawTable, FetchError> {
    let resp = client.fetch_with_retry(url).await?;
    if !resp.is_ok() {
        warn!(context, status = %resp.status, "No data available");
        return Ok(RawTable::default());
    }
    table_from_zip_bytes(&resp.body).map_err(|source| FetchError::Archive {
        url: url.to_string(),
        source,
    })
}
