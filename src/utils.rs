//! Utility functions

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

/// Timestamp text format used by both exporters
/// (`yyyy-MM-dd'T'HH:mm:ss.SSSZ`, e.g. `2024-03-01T12:00:00.250+0000`)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Current time truncated to millisecond precision
///
/// Timestamps are persisted as epoch millis, so values compared after a
/// round-trip through the database must not carry sub-millisecond digits.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Epoch millis for persistence
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Epoch millis back to a UTC timestamp
///
/// Out-of-range values fall back to the Unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Render a timestamp in [`TIMESTAMP_FORMAT`] at the given offset
pub fn format_timestamp(time: DateTime<Utc>, offset: &FixedOffset) -> String {
    time.with_timezone(offset)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Render a 16-bit status code as four uppercase hex digits
///
/// Returns `None` for negative values (the "not terminal" sentinel).
pub fn status_code_hex(status_code: i32) -> Option<String> {
    if status_code < 0 {
        return None;
    }
    Some(format!("{:04X}", status_code & 0xFFFF))
}
