// src/fetch/mod.rs
pub mod archive;
pub mod client;

pub use archive::{fetch_archive_table, table_from_zip_bytes, ArchiveError, FetchError};
pub use client::{FetchResponse, LegacyClient, TransportError};
