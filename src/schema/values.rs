use chrono::NaiveDateTime;

/// Trim whitespace and strip one pair of outer quotes. Empty results become `None`.
pub fn clean_str(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unquoted = if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    };
    (!unquoted.is_empty()).then_some(unquoted)
}

/// Layouts used by the trip files over the years, most common first.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parse a wall-clock timestamp. No timezone is attached or converted.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = clean_str(raw)?;
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Microseconds since the epoch, reading the naive time as if it were UTC.
pub fn timestamp_micros(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}

/// Parse a duration in seconds, allowing thousands separators (`"1,062.0"`).
/// Negative, NaN and infinite values are rejected.
pub fn parse_duration_secs(raw: &str) -> Option<f64> {
    let s = clean_str(raw)?;
    let value: f64 = if s.contains(',') {
        s.replace(',', "").parse().ok()?
    } else {
        s.parse().ok()?
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Parse a birth year, accepting integral floats such as `1985.0`.
pub fn parse_birth_year(raw: &str) -> Option<i32> {
    let s = clean_str(raw)?;
    if let Ok(year) = s.parse::<i32>() {
        return Some(year);
    }
    let value: f64 = s.parse().ok()?;
    if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}
