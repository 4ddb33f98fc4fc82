//! Event Timestamps
//!
//! Nanosecond UNIX timestamps for link events. Conversions saturate
//! instead of panicking so a misconfigured clock can never take the link
//! down.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Convert a duration to nanoseconds, saturating at `u64::MAX`
pub fn safe_duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Current system time in nanoseconds since the UNIX epoch
///
/// Returns 0 when the system clock is set before 1970.
pub fn safe_system_timestamp_ns() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => safe_duration_to_ns(duration),
        Err(e) => {
            warn!(error = %e, "System time before UNIX epoch");
            0
        }
    }
}

/// Milliseconds of a duration for error reporting
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
