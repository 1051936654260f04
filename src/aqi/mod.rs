// src/aqi/mod.rs
pub mod aggregate;
pub mod date_parser;
pub mod normalize;
pub mod states;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

pub use aggregate::{archive_url, clip_to_range, AqiError, Aggregator};
pub use normalize::{match_key, normalize, title_case, NormalizeError};

pub const DATE: &str = "Date";
pub const AQI: &str = "AQI";
pub const CATEGORY: &str = "Category";
pub const POLLUTANT: &str = "Pollutant";
pub const STATE: &str = "State";
pub const LOCATION: &str = "Location";

/// Archive column renamed to [`POLLUTANT`].
pub const DEFINING_PARAMETER: &str = "Defining Parameter";
/// County archives name the state in full.
pub const STATE_NAME: &str = "State Name";

static AQI_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new(DATE, DataType::Timestamp(TimeUnit::Second, None), false),
        Field::new(AQI, DataType::Int64, false),
        Field::new(CATEGORY, DataType::Utf8, false),
        Field::new(POLLUTANT, DataType::Utf8, false),
        Field::new(STATE, DataType::Utf8, false),
        Field::new(LOCATION, DataType::Utf8, false),
    ]))
});

/// Declared output schema for normalized AQI records.
pub fn aqi_schema() -> SchemaRef {
    Arc::clone(&AQI_SCHEMA)
}

/// Sampling frequency of the EPA archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AqiTimeFrame {
    Daily,
    Hourly,
}

impl AqiTimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            AqiTimeFrame::Daily => "daily",
            AqiTimeFrame::Hourly => "hourly",
        }
    }
}

impl fmt::Display for AqiTimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AqiTimeFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(AqiTimeFrame::Daily),
            "hourly" => Ok(AqiTimeFrame::Hourly),
            other => Err(format!("unknown time frame '{other}' (expected daily or hourly)")),
        }
    }
}

/// Geographic scale a request is filtered by.
///
/// City requests use the CBSA archives, keyed by `"City, ST"`; county requests use
/// the county archives, keyed by the bare county name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AqiScale {
    #[serde(alias = "cbsa")]
    City,
    County,
}

impl AqiScale {
    /// Scale segment of the archive file name.
    pub fn archive_scale(&self) -> &'static str {
        match self {
            AqiScale::City => "cbsa",
            AqiScale::County => "county",
        }
    }

    /// Archive column holding the geography key.
    pub fn filter_column(&self) -> &'static str {
        match self {
            AqiScale::City => "CBSA",
            AqiScale::County => "county Name",
        }
    }
}

impl fmt::Display for AqiScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AqiScale::City => f.write_str("city"),
            AqiScale::County => f.write_str("county"),
        }
    }
}

impl FromStr for AqiScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "city" | "cbsa" => Ok(AqiScale::City),
            "county" => Ok(AqiScale::County),
            other => Err(format!("unknown scale '{other}' (expected city or county)")),
        }
    }
}

/// A fully resolved AQI retrieval: every field is set and the range is date-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AqiRequest {
    pub time_frame: AqiTimeFrame,
    pub scale: AqiScale,
    pub state: String,
    pub location: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AqiRequest {
    /// Default output table name, `{location}_{startYear}_{timeFrame}_aqi`,
    /// lowercased with spaces replaced by underscores.
    pub fn output_name(&self) -> String {
        format!(
            "{}_{}_{}_aqi",
            self.location,
            self.start.year(),
            self.time_frame
        )
        .to_lowercase()
        .replace(' ', "_")
    }
}
