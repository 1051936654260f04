// src/aqi/aggregate.rs
use arrow::{
    array::{BooleanArray, TimestampSecondArray},
    compute::{concat_batches, filter_record_batch},
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::{Datelike, NaiveDate};
use futures::{stream, StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use super::{
    aqi_schema, normalize::normalize, AqiRequest, AqiScale, AqiTimeFrame, NormalizeError,
};
use crate::fetch::{fetch_archive_table, FetchError, LegacyClient};

const DEFAULT_MAX_CONCURRENT_YEARS: usize = 3;

#[derive(Debug, Error)]
pub enum AqiError {
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid archive URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{year} archive: {source}")]
    Fetch {
        year: i32,
        #[source]
        source: FetchError,
    },
    #[error("{year} archive: {source}")]
    Normalize {
        year: i32,
        #[source]
        source: NormalizeError,
    },
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// `{base}/{timeFrame}_aqi_by_{county|cbsa}_{year}.zip`
pub fn archive_url(
    base: &Url,
    time_frame: AqiTimeFrame,
    scale: AqiScale,
    year: i32,
) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{}_aqi_by_{}_{}.zip",
        base.as_str().trim_end_matches('/'),
        time_frame,
        scale.archive_scale(),
        year
    ))
}

/// Keep rows whose `Date`, reduced to its calendar day, lies in `[start, end]`.
pub fn clip_to_range(
    batch: &RecordBatch,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RecordBatch, ArrowError> {
    let dates = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampSecondArray>()
        .ok_or_else(|| ArrowError::SchemaError("Date column is not Timestamp(Second)".into()))?;

    let lo = start.and_hms_opt(0, 0, 0).map(|d| d.and_utc().timestamp());
    let hi = end.and_hms_opt(23, 59, 59).map(|d| d.and_utc().timestamp());
    let (Some(lo), Some(hi)) = (lo, hi) else {
        return Ok(batch.slice(0, 0));
    };

    let mask: BooleanArray = dates
        .iter()
        .map(|v| v.map(|t| t >= lo && t <= hi))
        .collect();
    filter_record_batch(batch, &mask)
}

/// Retrieves and normalizes every yearly archive a request spans.
pub struct Aggregator<'a> {
    client: &'a LegacyClient,
    base_url: Url,
    max_concurrent_years: usize,
}

impl<'a> Aggregator<'a> {
    pub fn new(client: &'a LegacyClient, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            max_concurrent_years: DEFAULT_MAX_CONCURRENT_YEARS,
        }
    }

    /// Bound on in-flight yearly downloads; `1` fetches strictly one year at a time.
    pub fn with_max_concurrent_years(mut self, n: usize) -> Self {
        self.max_concurrent_years = n.max(1);
        self
    }

    /// One year's archive, filtered and normalized.
    ///
    /// Unpublished years (non-200) and transport failures that survive the retries
    /// both come back as an empty batch with a warning.
    pub async fn fetch_year(&self, req: &AqiRequest, year: i32) -> Result<RecordBatch, AqiError> {
        let url = archive_url(&self.base_url, req.time_frame, req.scale, year)?;
        let context = year.to_string();
        let raw = match fetch_archive_table(self.client, &url, &context).await {
            Ok(raw) => raw,
            Err(FetchError::Transport(e)) => {
                warn!(year, url = %url, error = %e, "skipping year after transport failure");
                return Ok(RecordBatch::new_empty(aqi_schema()));
            }
            Err(source) => return Err(AqiError::Fetch { year, source }),
        };
        if raw.is_empty() {
            return Ok(RecordBatch::new_empty(aqi_schema()));
        }
        let batch = normalize(&raw, req.scale, &req.state, &req.location)
            .map_err(|source| AqiError::Normalize { year, source })?;
        info!(year, rows = batch.num_rows(), "normalized year");
        Ok(batch)
    }

    /// All records for `req`, in year order, clipped to `[req.start, req.end]`.
    ///
    /// An empty batch is a valid outcome and is logged as a warning.
    #[instrument(level = "info", skip(self, req), fields(
        time_frame = %req.time_frame,
        scale = %req.scale,
        state = %req.state,
        location = %req.location,
        start = %req.start,
        end = %req.end
    ))]
    pub async fn aggregate(&self, req: &AqiRequest) -> Result<RecordBatch, AqiError> {
        if req.start > req.end {
            return Err(AqiError::InvalidRange {
                start: req.start,
                end: req.end,
            });
        }

        // `buffered` yields in input order regardless of completion order
        let batches: Vec<RecordBatch> = stream::iter(req.start.year()..=req.end.year())
            .map(|year| self.fetch_year(req, year))
            .buffered(self.max_concurrent_years)
            .try_collect()
            .await?;

        let schema = aqi_schema();
        let combined = concat_batches(&schema, batches.iter().filter(|b| b.num_rows() > 0))?;
        let clipped = clip_to_range(&combined, req.start, req.end)?;

        if clipped.num_rows() == 0 {
            warn!("No data found");
        } else {
            info!(rows = clipped.num_rows(), "aggregated");
        }
        Ok(clipped)
    }
}
