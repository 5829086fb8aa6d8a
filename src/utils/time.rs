//! Timestamp helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds. Clamps to 0 if the clock is before the
/// epoch rather than failing a send path over it.
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
