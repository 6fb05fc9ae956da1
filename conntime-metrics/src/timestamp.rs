use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};

pub type Timestamp = DateTime<Utc>;

/// Format an instant as UTC ISO-8601 with a `Z` suffix. Fractional seconds are
/// printed in groups of 3, 6 or 9 digits, and only when non-zero.
pub fn format_instant(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_instant(s: &str) -> Result<Timestamp, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s.trim()).map(|t| t.with_timezone(&Utc))
}

/// Truncate an instant to the start of its minute.
pub fn truncate_to_minute(t: &Timestamp) -> Timestamp {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(*t)
}

/// Whole milliseconds of a duration, rounded towards negative infinity.
pub fn duration_millis(d: &Duration) -> i64 {
    match d.num_nanoseconds() {
        Some(n) => n.div_euclid(1_000_000),
        None => d.num_milliseconds(),
    }
}
