use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, StringArray},
    datatypes::DataType,
};
use std::sync::Arc;

/// 1) Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// 2) Narrowest Arrow dtype that holds every present value of a column.
///
/// Int64 if all parse as integers, Float64 if all parse as numbers, else Utf8.
/// A column with no present values is Utf8.
pub fn infer_arrow_dtype<'a, I>(values: I) -> DataType
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut dtype: Option<DataType> = None;
    for v in values.into_iter().flatten() {
        let this = if v.parse::<i64>().is_ok() {
            DataType::Int64
        } else if v.parse::<f64>().is_ok() {
            DataType::Float64
        } else {
            return DataType::Utf8;
        };
        dtype = Some(match (dtype, this) {
            (Some(DataType::Float64), _) | (_, DataType::Float64) => DataType::Float64,
            _ => DataType::Int64,
        });
    }
    dtype.unwrap_or(DataType::Utf8)
}

/// 3) Build a typed array from text cells; `None` becomes null.
pub fn build_array(values: &[Option<String>], dtype: &DataType) -> ArrayRef {
    match dtype {
        DataType::Int64 => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| v.as_deref().and_then(|s| s.parse::<i64>().ok()))
                .collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| v.as_deref().and_then(|s| s.parse::<f64>().ok()))
                .collect::<Vec<_>>(),
        )),
        _ => Arc::new(StringArray::from(
            values.iter().map(|v| v.as_deref()).collect::<Vec<_>>(),
        )),
    }
}

/// 4) Join key for an identifier value.
///
/// Census `GEO_ID`s (`1400000US36061000100`, digits on both sides of `US`) reduce
/// to their FIPS suffix, and
/// integer-valued numbers compare by integer rendering, so `06075010100`,
/// `6075010100` and `6075010100.0` are the same key.
pub fn canonical_key(raw: &str) -> String {
    let s = clean_str(raw);
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    // only the `{summary level}US{fips}` shape, e.g. not `BUS12`
    let s = match s.split_once("US") {
        Some((level, fips)) if all_digits(level) && all_digits(fips) => fips.to_string(),
        _ => s,
    };
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
            format!("{}", n as i64)
        }
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_str() {
        assert_eq!(clean_str("  \" 42 \" "), "42");
        assert_eq!(clean_str("plain"), "plain");
    }

    #[test]
    fn test_infer_arrow_dtype() {
        assert_eq!(infer_arrow_dtype([Some("1"), None, Some("-3")]), DataType::Int64);
        assert_eq!(infer_arrow_dtype([Some("1"), Some("2.5")]), DataType::Float64);
        assert_eq!(infer_arrow_dtype([Some("2.5"), Some("1")]), DataType::Float64);
        assert_eq!(infer_arrow_dtype([Some("1"), Some("n/a")]), DataType::Utf8);
        assert_eq!(infer_arrow_dtype([None, None]), DataType::Utf8);
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("1400000US06075010100"), "6075010100");
        assert_eq!(canonical_key("06075010100"), "6075010100");
        assert_eq!(canonical_key("6075010100.0"), "6075010100");
        assert_eq!(canonical_key(" Tract A "), "Tract A");
        assert_eq!(canonical_key("BUS12"), "BUS12");
        assert_ne!(canonical_key("BUS12"), canonical_key("12"));
        assert_eq!(canonical_key("US12"), "US12");
        assert_eq!(canonical_key("1400000US"), "1400000US");
    }
}
