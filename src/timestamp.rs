//! Timestamp parsing for daemon logs and historic-op dumps.
//!
//! Daemon logs write `2017-03-23 10:45:22.129218`; newer dumps use an ISO form
//! with a `T` separator and a zone offset (`2020-07-04T12:39:19.590177+0000`).
//! Zoned values are normalized to UTC; naive values are taken as-is.

use chrono::{DateTime, NaiveDateTime};

/// Zoned formats, tried first.
const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
];

/// Naive formats. `%.f` also accepts a missing fractional part.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

/// Parse a timestamp string. Returns None when no known format matches.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    None
}

/// Signed duration `to - from` in seconds. Out-of-order input yields a
/// negative value; it is not clamped.
pub fn seconds_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
