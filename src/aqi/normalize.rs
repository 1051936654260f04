// src/aqi/normalize.rs
use arrow::{
    array::{ArrayRef, Int64Array, StringArray, TimestampSecondArray},
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{
    aqi_schema, date_parser::parse_aqi_timestamp, states::state_name, AqiScale, AQI, CATEGORY,
    DATE, DEFINING_PARAMETER, STATE_NAME,
};
use crate::raw_table::RawTable;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("archive table has no '{0}' column")]
    MissingColumn(String),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

struct AqiRow<'a> {
    date: NaiveDateTime,
    aqi: i64,
    category: &'a str,
    pollutant: &'a str,
}

/// Title-case every alphabetic run: `"san luis obispo-paso robles"` →
/// `"San Luis Obispo-Paso Robles"`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Geography key compared against the archive's filter column.
pub fn match_key(scale: AqiScale, state: &str, location: &str) -> String {
    match scale {
        AqiScale::City => format!("{}, {}", title_case(location), state.to_uppercase()),
        AqiScale::County => location.to_string(),
    }
}

fn parse_aqi_value(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

/// Filter a raw yearly archive to one geography and project it onto the
/// declared AQI schema, ordered by `Date`.
///
/// At county scale rows must also sit in `state` (postal code or full name)
/// when the archive has a `State Name` column; an unrecognised state keeps every
/// match and warns if they span several states.
/// Rows whose `Date` or `AQI` cannot be coerced are dropped and counted.
/// A geography that matches nothing yields an empty batch, not an error.
#[instrument(level = "debug", skip(raw), fields(rows = raw.rows.len()))]
pub fn normalize(
    raw: &RawTable,
    scale: AqiScale,
    state: &str,
    location: &str,
) -> Result<RecordBatch, NormalizeError> {
    if raw.headers.is_empty() {
        return Ok(RecordBatch::new_empty(aqi_schema()));
    }

    let col = |name: &str| {
        raw.column_index(name)
            .ok_or_else(|| NormalizeError::MissingColumn(name.to_string()))
    };
    let geo_idx = col(scale.filter_column())?;
    let date_idx = col(DATE)?;
    let aqi_idx = col(AQI)?;
    let category_idx = col(CATEGORY)?;
    let pollutant_idx = col(DEFINING_PARAMETER)?;

    let key = match_key(scale, state, location);

    // county names repeat across states; CBSA keys already carry the state
    let state_idx = match scale {
        AqiScale::County => raw.column_index(STATE_NAME),
        AqiScale::City => None,
    };
    let wanted_state = state_idx.and(state_name(state));
    let in_state = |r: &[String]| match (state_idx, wanted_state) {
        (Some(i), Some(name)) => r[i].trim().eq_ignore_ascii_case(name),
        _ => true,
    };

    let mut rejected = 0usize;
    let mut states_seen: Vec<&str> = Vec::new();
    let mut rows: Vec<AqiRow<'_>> = Vec::new();

    for row in raw.rows.iter().filter(|r| r[geo_idx] == key && in_state(r.as_slice())) {
        if let Some(i) = state_idx {
            if !states_seen.contains(&row[i].as_str()) {
                states_seen.push(row[i].as_str());
            }
        }
        match (
            parse_aqi_timestamp(&row[date_idx]),
            parse_aqi_value(&row[aqi_idx]),
        ) {
            (Some(date), Some(aqi)) => rows.push(AqiRow {
                date,
                aqi,
                category: row[category_idx].as_str(),
                pollutant: row[pollutant_idx].as_str(),
            }),
            _ => rejected += 1,
        }
    }

    if states_seen.len() > 1 {
        warn!(
            key = %key,
            state,
            states = ?states_seen,
            "county name matches rows from several states"
        );
    }
    if rejected > 0 {
        warn!(rejected, key = %key, "dropped rows with unparseable Date or AQI");
    }
    debug!(matched = rows.len(), key = %key, "filtered archive");

    // stable: equal timestamps keep archive order
    rows.sort_by_key(|r| r.date);

    let n = rows.len();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampSecondArray::from(
            rows.iter()
                .map(|r| r.date.and_utc().timestamp())
                .collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.aqi).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.category).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.pollutant).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(vec![state; n])),
        Arc::new(StringArray::from(vec![location; n])),
    ];

    Ok(RecordBatch::try_new(aqi_schema(), columns)?)
}
