//! Simulation file for the `scangroup` CLI.
//!
//! ```toml
//! [group]
//! name = "sample"
//! kind = "deferred"
//!
//! [group.settings]
//! poll_interval_ms = 50
//!
//! [group.interlock]
//! protection_threshold = 3.0
//! companion_threshold = 10.0
//!
//! [[axes]]
//! name = "theta"
//! mode = "realistic"
//!
//! [[axes]]
//! name = "phi"
//! ```
//!
//! Any key can be overridden from the environment, nesting with `__`:
//! `SCANGROUP_GROUP__SETTINGS__POLL_INTERVAL_MS=20`.

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use scan_driver_mock::MockAxisConfig;
use scan_group::config::ENV_PREFIX;
use scan_group::{GroupSettings, ThresholdInterlock};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Which group flavour to build around the axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Plain,
    #[default]
    Coordinated,
    Deferred,
    Trajectory,
    Coupled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    #[serde(default)]
    pub kind: GroupKind,

    #[serde(default)]
    pub settings: GroupSettings,

    /// Validator for coordinated flavours; required pair rule for `coupled`
    #[serde(default)]
    pub interlock: Option<ThresholdInterlock>,

    /// Execution time of one simulated trajectory point
    #[serde(default = "default_point_duration_ms")]
    pub point_duration_ms: u64,
}

fn default_point_duration_ms() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub group: GroupConfig,

    #[serde(default)]
    pub axes: Vec<MockAxisConfig>,
}

impl SimulationConfig {
    /// Load a simulation file, then apply `SCANGROUP_` overrides.
    pub fn load(path: &Path) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("failed to load simulation file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() {
            bail!("group {} has no [[axes]]", self.group.name);
        }

        let mut seen = HashSet::new();
        for axis in &self.axes {
            if !seen.insert(axis.name.as_str()) {
                bail!("axis {} is defined more than once", axis.name);
            }
        }

        self.group
            .settings
            .validate()
            .context("invalid [group.settings]")?;

        if self.group.kind == GroupKind::Coupled && self.axes.len() < 2 {
            bail!("a coupled group needs at least two axes");
        }
        if self.group.point_duration_ms == 0 {
            bail!("point_duration_ms must be greater than 0");
        }
        Ok(())
    }
}
