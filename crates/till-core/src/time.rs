//! UTC ↔ business-local time conversion.
//!
//! Storage is always UTC; the business operates in a fixed UTC+8 offset.
//! Coupon windows and campaign windows are entered by operators as local
//! dates or timestamps and must land in storage as UTC. This module is the
//! single authoritative implementation of that conversion — call sites used
//! to each carry their own parsing heuristics, which drifted.
//!
//! Inputs that already carry `Z` or an explicit offset pass through
//! converted, never double-shifted.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use thiserror::Error;

/// The fixed business timezone offset, in seconds east of UTC.
pub const LOCAL_OFFSET_SECS: i32 = 8 * 3600;

/// Which end of a date-only input to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Local midnight (00:00:00).
    Start,
    /// Last second of the local day (23:59:59).
    End,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("unrecognized timestamp: {0:?}")]
    Unparseable(String),
}

/// The business-local offset (UTC+8).
pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(LOCAL_OFFSET_SECS).expect("UTC+8 is a valid fixed offset")
}

/// Parse an operator-supplied timestamp into the UTC instant to store.
///
/// Accepted forms, tried in order:
/// - `YYYY-MM-DD` — a local date, resolved to `boundary`;
/// - RFC 3339 with `Z` or an explicit offset — converted as-is;
/// - `YYYY-MM-DD HH:MM:SS` (space or `T` separator) — interpreted as local.
pub fn to_storage_time(input: &str, boundary: Boundary) -> Result<DateTime<Utc>, TimeError> {
    let input = input.trim();

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let time = match boundary {
            Boundary::Start => NaiveTime::MIN,
            Boundary::End => NaiveTime::from_hms_opt(23, 59, 59).expect("23:59:59 is in range"),
        };
        return Ok(local_to_utc(date.and_time(time)));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Ok(local_to_utc(naive));
        }
    }

    Err(TimeError::Unparseable(input.to_string()))
}

/// Render a stored UTC instant as a local timestamp string.
pub fn to_display_time(utc: DateTime<Utc>) -> String {
    utc.with_timezone(&local_offset())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Render a stored UTC instant as a local date string.
pub fn to_display_date(utc: DateTime<Utc>) -> String {
    utc.with_timezone(&local_offset()).format("%Y-%m-%d").to_string()
}

fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    // A fixed offset has no DST gaps or folds, so the mapping is total.
    Utc.from_utc_datetime(&(naive - local_offset()))
}
