//! Wall-clock timestamps in nanoseconds since the Unix epoch.

use chrono::{DateTime, Utc};

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    to_nanos(Utc::now())
}

/// Convert a timestamp to nanoseconds since the Unix epoch.
///
/// Times before the epoch clamp to `0`; times past year 2262 clamp to `u64::MAX`.
pub fn to_nanos(at: DateTime<Utc>) -> u64 {
    match at.timestamp_nanos_opt() {
        Some(n) => u64::try_from(n).unwrap_or(0),
        None if at.timestamp() > 0 => u64::MAX,
        None => 0,
    }
}
