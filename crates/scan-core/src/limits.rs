//! Shared timing constants for busy polling.
//!
//! Groups may override the poll interval through their settings; these are
//! the values used when nothing else is configured.

use crate::error::{MotionError, Result};
use std::time::Duration;

/// Interval between `is_busy()` polls while waiting for a move (100 ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest poll interval a configuration may request (1 ms).
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Convert a configured interval in milliseconds into a validated duration.
pub fn poll_interval_from_millis(millis: u64) -> Result<Duration> {
    let interval = Duration::from_millis(millis);
    if interval < MIN_POLL_INTERVAL {
        return Err(MotionError::Configuration(format!(
            "poll interval must be at least {}ms, got {}ms",
            MIN_POLL_INTERVAL.as_millis(),
            millis
        )));
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_validation() {
        assert_eq!(
            poll_interval_from_millis(250).unwrap(),
            Duration::from_millis(250)
        );
        assert!(poll_interval_from_millis(0).is_err());
    }
}
