//! Shared utility functions for the teamboard crate.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Format used for every date stored on a feature. Fixed width, so stored
/// dates compare correctly as plain strings.
pub const ISO_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Render `at` in the stored date format (UTC, millisecond precision, no
/// offset suffix).
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.format(ISO_TIMESTAMP_FORMAT).to_string()
}

/// Normalize a source-system date into the stored format.
///
/// Accepts RFC 3339 (any offset, converted to UTC), Jira's colon-less
/// offsets such as `+0000`, and offset-less ISO date-times. Anything else is
/// returned trimmed but otherwise unchanged.
pub fn to_canonical_date(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return iso_timestamp(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return iso_timestamp(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return naive.format(ISO_TIMESTAMP_FORMAT).to_string();
        }
    }
    raw.to_string()
}

/// Clean a free-text value coming back from a source system: trims it,
/// drops control characters and maps a literal `null` to the empty string.
pub fn sanitize_response(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        return String::new();
    }
    trimmed.chars().filter(|c| !c.is_control()).collect()
}
