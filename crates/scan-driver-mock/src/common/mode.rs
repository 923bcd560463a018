//! Operational modes for simulated axes.
//!
//! - **Instant**: moves complete inside `move_to`, deterministic for unit tests
//! - **Realistic**: moves take distance / speed seconds and report busy meanwhile
//! - **Chaos**: realistic timing plus a random failure rate on every operation

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Realistic timing with injected failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// True when moves should take simulated time.
    pub fn is_timed(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}
