// src/config.rs
//! Job configuration.
//!
//! A YAML file describes the HTTP settings, the endpoints, and optionally an AQI
//! job and a merge job. An AQI job is checked by [`validate`], a pure function
//! returning diagnostics, and then turned into an [`AqiRequest`] by
//! [`AqiJob::resolve`], which fills unset parameters from the ones they depend on
//! (see [`DEPENDENCIES`]).

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use url::Url;

use crate::aqi::{date_parser::parse_date_only, AqiRequest, AqiScale, AqiTimeFrame};
use crate::zipcode::ZipLookup;

pub const DEFAULT_AQI_BASE_URL: &str = "https://aqs.epa.gov/aqsweb/airdata/";
pub const DEFAULT_ZIP_LOOKUP_URL: &str = "https://www.getzips.com/cgi-bin/ziplook.exe";
pub const DEFAULT_IDENTIFIER_NAME: &str = "TractID";

static ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5}$").expect("ZIP regex should be valid"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid URL '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("invalid AQI job: {}", summarize(.0))]
    Invalid(Vec<Diagnostic>),
    #[error("{0} could not be resolved from the ZIP lookup")]
    Unresolved(Param),
}

fn summarize(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 15,
            max_retries: 3,
            initial_backoff_ms: 500,
            user_agent: concat!("aqscraper/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub aqi_base_url: String,
    pub zip_lookup_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            aqi_base_url: DEFAULT_AQI_BASE_URL.to_string(),
            zip_lookup_url: DEFAULT_ZIP_LOOKUP_URL.to_string(),
        }
    }
}

impl Endpoints {
    pub fn aqi_base(&self) -> Result<Url, ConfigError> {
        parse_url(&self.aqi_base_url)
    }

    pub fn zip_lookup(&self) -> Result<Url, ConfigError> {
        parse_url(&self.zip_lookup_url)
    }
}

fn parse_url(s: &str) -> Result<Url, ConfigError> {
    Url::parse(s).map_err(|source| ConfigError::Url {
        url: s.to_string(),
        source,
    })
}

/// Accept `zip_code: 94105` as well as `zip_code: "02139"`.
fn de_zip<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ZipValue {
        Num(u64),
        Text(String),
    }
    Ok(Option::<ZipValue>::deserialize(d)?.map(|z| match z {
        ZipValue::Num(n) => format!("{:05}", n),
        ZipValue::Text(s) => s.trim().to_string(),
    }))
}

fn default_concurrency() -> usize {
    3
}

/// AQI retrieval parameters as written in the job file. Dates are kept as text
/// until validation so a bad date becomes a diagnostic, not a parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct AqiJob {
    pub time_frame: AqiTimeFrame,
    pub scale: AqiScale,
    #[serde(default, deserialize_with = "de_zip")]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_years: usize,
    /// Last year the EPA has published; later dates draw a diagnostic.
    #[serde(default)]
    pub latest_published_year: Option<i32>,
}

fn default_identifier_name() -> String {
    DEFAULT_IDENTIFIER_NAME.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeJob {
    /// CSV paths or glob patterns, merged in the listed order.
    pub files: Vec<String>,
    #[serde(default = "default_identifier_name")]
    pub identifier_name: String,
}

impl MergeJob {
    /// Expand patterns; matches of one pattern are sorted, literals kept as given.
    pub fn expand_files(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut out = Vec::new();
        for entry in &self.files {
            if !entry.contains(['*', '?', '[']) {
                out.push(PathBuf::from(entry));
                continue;
            }
            let mut matches: Vec<PathBuf> = glob::glob(entry)
                .map_err(|source| ConfigError::Pattern {
                    pattern: entry.clone(),
                    source,
                })?
                .filter_map(Result::ok)
                .collect();
            matches.sort();
            out.extend(matches);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub http: HttpConfig,
    pub endpoints: Endpoints,
    pub aqi: Option<AqiJob>,
    pub merge: Option<MergeJob>,
}

impl JobConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    ZipCode,
    State,
    Location,
    StartDate,
    EndDate,
    MaxConcurrentYears,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Param::ZipCode => "zip_code",
            Param::State => "state",
            Param::Location => "location",
            Param::StartDate => "start_date",
            Param::EndDate => "end_date",
            Param::MaxConcurrentYears => "max_concurrent_years",
        })
    }
}

/// `(child, parent)`: an unset child is derived from its parent.
///
/// `state` and `location` come from the ZIP lookup (`location` as city or county
/// per `scale`); `end_date` becomes December 31 of the start year.
pub const DEPENDENCIES: &[(Param, Param)] = &[
    (Param::State, Param::ZipCode),
    (Param::Location, Param::ZipCode),
    (Param::EndDate, Param::StartDate),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub param: Param,
    pub message: String,
}

impl Diagnostic {
    fn error(param: Param, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            param,
            message: message.into(),
        }
    }

    fn warning(param: Param, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            param,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.param, self.message)
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.severity == Severity::Error)
}

impl AqiJob {
    fn is_set(&self, p: Param) -> bool {
        let text = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match p {
            Param::MaxConcurrentYears => true,
            Param::ZipCode => text(&self.zip_code),
            Param::State => text(&self.state),
            Param::Location => text(&self.location),
            Param::StartDate => text(&self.start_date),
            Param::EndDate => text(&self.end_date),
        }
    }

    /// True when `resolve` will need a ZIP lookup.
    pub fn needs_zip_lookup(&self) -> bool {
        DEPENDENCIES
            .iter()
            .any(|&(child, parent)| parent == Param::ZipCode && !self.is_set(child))
    }

    /// Fill derived parameters and produce a request. Call after [`validate`]
    /// reports no errors; `lookup` is required when [`needs_zip_lookup`](Self::needs_zip_lookup).
    pub fn resolve(&self, lookup: Option<&ZipLookup>) -> Result<AqiRequest, ConfigError> {
        let diags = validate(self);
        if has_errors(&diags) {
            return Err(ConfigError::Invalid(diags));
        }

        let explicit = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let from_zip = |param: Param| -> Result<String, ConfigError> {
            let lookup = lookup.ok_or(ConfigError::Unresolved(param))?;
            let value = match param {
                Param::State => lookup.primary().map(|r| r.state.trim().to_uppercase()),
                _ => lookup.location_for(self.scale),
            };
            value.ok_or(ConfigError::Unresolved(param))
        };

        let state = match explicit(&self.state) {
            Some(s) => s,
            None => from_zip(Param::State)?,
        };
        let location = match explicit(&self.location) {
            Some(l) => l,
            None => from_zip(Param::Location)?,
        };
        let dates = parsed_dates(self);
        let (Some(start), Some(end)) = (dates.start, dates.end) else {
            return Err(ConfigError::Invalid(diags));
        };

        Ok(AqiRequest {
            time_frame: self.time_frame,
            scale: self.scale,
            state,
            location,
            start,
            end,
        })
    }
}

struct ParsedDates {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

/// Both bounds, date-only, with `end_date` defaulted from `start_date`.
fn parsed_dates(job: &AqiJob) -> ParsedDates {
    let start = job.start_date.as_deref().and_then(parse_date_only);
    let end = match job.end_date.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(s) => parse_date_only(s),
        None => start.and_then(|s| NaiveDate::from_ymd_opt(s.year(), 12, 31)),
    };
    ParsedDates { start, end }
}

/// Check an AQI job without touching the network.
pub fn validate(job: &AqiJob) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    if let Some(zip) = job.zip_code.as_deref().filter(|_| job.is_set(Param::ZipCode)) {
        if !ZIP_RE.is_match(zip) {
            diags.push(Diagnostic::error(Param::ZipCode, "Invalid zip code"));
        }
    }

    for &(child, parent) in DEPENDENCIES {
        if !job.is_set(child) && !job.is_set(parent) {
            diags.push(Diagnostic::error(
                child,
                format!("not set, and {parent} is not set to derive it from"),
            ));
        }
    }

    let unparseable = |v: &Option<String>| v.as_deref().and_then(parse_date_only).is_none();
    if !job.is_set(Param::StartDate) {
        diags.push(Diagnostic::error(Param::StartDate, "required"));
    } else if unparseable(&job.start_date) {
        diags.push(Diagnostic::error(Param::StartDate, "expected YYYY-MM-DD or YYYY/MM/DD"));
    }
    if job.is_set(Param::EndDate) && unparseable(&job.end_date) {
        diags.push(Diagnostic::error(Param::EndDate, "expected YYYY-MM-DD or YYYY/MM/DD"));
    }

    let dates = parsed_dates(job);
    if let (Some(start), Some(end)) = (dates.start, dates.end) {
        if end < start {
            diags.push(Diagnostic::error(
                Param::EndDate,
                format!("Invalid end date: {end} is before {start}"),
            ));
        }
        if let Some(latest) = job.latest_published_year {
            if start.year() > latest {
                diags.push(Diagnostic::error(Param::StartDate, "No data available"));
            } else if end.year() > latest {
                diags.push(Diagnostic::warning(
                    Param::EndDate,
                    format!("No data available after {latest}"),
                ));
            }
        }
    }

    if job.max_concurrent_years == 0 {
        diags.push(Diagnostic::error(Param::MaxConcurrentYears, "must be at least 1"));
    }

    diags
}
