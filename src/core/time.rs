//! Wall-clock helpers.
//!
//! Timestamps are truncated to milliseconds so a value broadcast live is
//! identical to the one read back from the log.

use chrono::{DateTime, Utc};

/// Current UTC time at millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    from_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Rebuild a timestamp from Unix milliseconds.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
