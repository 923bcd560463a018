//! Group settings.
//!
//! Settings are read from a TOML file and may be overridden by environment
//! variables prefixed with `SCANGROUP_`, e.g. `SCANGROUP_POLL_INTERVAL_MS=20`.
//!
//! ```toml
//! poll_interval_ms = 50
//! stop_policy = "fail_fast"
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use scan_core::error::Result;
use scan_core::limits::{poll_interval_from_millis, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SCANGROUP_";

/// How `stop()` treats a member that fails to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Stop every member, then report all failures together.
    #[default]
    BestEffort,
    /// Abort at the first member that fails to stop.
    FailFast,
}

/// Runtime settings shared by every group flavour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSettings {
    /// Interval between `is_busy` polls while waiting for a move
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How `stop` treats member failures
    #[serde(default)]
    pub stop_policy: StopPolicy,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stop_policy: StopPolicy::default(),
        }
    }
}

impl GroupSettings {
    /// Load settings from a TOML file, then apply `SCANGROUP_` overrides.
    ///
    /// Missing keys (or a missing file) fall back to the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(GroupSettings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> Result<()> {
        poll_interval_from_millis(self.poll_interval_ms).map(|_| ())
    }

    /// Polling interval, or the default when the configured value is invalid.
    pub fn poll_interval(&self) -> Duration {
        poll_interval_from_millis(self.poll_interval_ms).unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}
