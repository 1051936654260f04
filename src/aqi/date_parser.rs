use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Parse an archive `Date` cell into a timestamp.
///
/// Daily archives carry `YYYY-MM-DD`; hourly ones append `HH:MM` or `HH:MM:SS`.
/// `/` is accepted as the date separator, and a `T` may stand in for the space.
pub fn parse_aqi_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    // minimal length + separators check
    if s.len() < 10 || !s.as_bytes()[..10].is_ascii() {
        return None;
    }
    let sep = &s[4..5];
    if (sep != "-" && sep != "/") || &s[7..8] != sep {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[5..7].parse().ok()?;
    let day: u32 = s[8..10].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    let rest = s[10..].trim_start_matches(['T', ' ']);
    if rest.is_empty() {
        return date.and_hms_opt(0, 0, 0);
    }
    let time = NaiveTime::parse_from_str(rest, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(rest, "%H:%M"))
        .ok()?;
    Some(date.and_time(time))
}

/// Parse a user-supplied date, discarding any time-of-day suffix.
pub fn parse_date_only(s: &str) -> Option<NaiveDate> {
    parse_aqi_timestamp(s).map(|dt| dt.date())
}
