//! `scangroup` - drive a simulated scannable group from the command line.
//!
//! Builds mock axes and one group from a TOML simulation file, then moves,
//! validates or reads the group and prints the result as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Move every axis and wait for arrival
//! scangroup --config config/scangroup.toml move 1.0,2.5,null
//!
//! # Stream the move to the trajectory controller (kind = "trajectory")
//! scangroup --config config/scangroup.toml move --continuous 1.0,2.5,0.0
//!
//! # Ask whether a position would be accepted
//! scangroup --config config/scangroup.toml check 2.0,12.0,0.0
//!
//! # Print the current position and any collision avoidance rules
//! scangroup --config config/scangroup.toml show
//! ```
//!
//! Logging follows `RUST_LOG` and defaults to `info`.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scan_core::{Position, Scannable};
use scan_driver_mock::{MockAxis, MockControlPoint, MockMode, MockTrajectoryController};
use scan_group::{
    CoordinatedParent, CoordinatedScannableGroup, CoupledAxisScannableGroup,
    DeferredAndTrajectoryScannableGroup, DeferredScannableGroup, ScannableGroup,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{GroupKind, SimulationConfig};

#[derive(Parser)]
#[command(name = "scangroup")]
#[command(about = "Drive a simulated coordinated scannable group", long_about = None)]
struct Cli {
    /// Simulation file (TOML)
    #[arg(long, default_value = "config/scangroup.toml")]
    config: PathBuf,

    /// Build this kind of group instead of the one in the file
    #[arg(long, value_enum)]
    kind: Option<GroupKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move the group and wait until it is idle
    Move {
        /// Comma-separated target per input field; `null` leaves a field alone
        position: String,

        /// Return once the move is dispatched
        #[arg(long)]
        no_wait: bool,

        /// Stream the move to the trajectory controller
        #[arg(long)]
        continuous: bool,
    },

    /// Check whether a position would be accepted
    Check {
        /// Comma-separated target per input field
        position: String,
    },

    /// Print the current position and validator rules
    Show,
}

/// A constructed group and the handles the CLI needs beyond `Scannable`.
struct BuiltGroup {
    group: Arc<dyn Scannable>,
    trajectory: Option<Arc<DeferredAndTrajectoryScannableGroup>>,
    describe: Option<Arc<dyn CoordinatedParent>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut simulation = SimulationConfig::load(&cli.config)?;
    if let Some(kind) = cli.kind {
        simulation.group.kind = kind;
    }
    simulation.validate()?;

    let built = build_group(&simulation);
    built
        .group
        .configure()
        .await
        .with_context(|| format!("failed to configure {}", built.group.name()))?;
    info!(
        "Built {:?} group {} with {} axes",
        simulation.group.kind,
        built.group.name(),
        simulation.axes.len()
    );

    match cli.command {
        Commands::Move {
            position,
            no_wait,
            continuous,
        } => {
            let target = parse_position(&position)?;
            if continuous {
                let Some(trajectory) = &built.trajectory else {
                    bail!("--continuous needs a group of kind \"trajectory\"");
                };
                trajectory.set_operating_continuously(true);
            }
            built.group.move_to(target.clone()).await?;
            if !no_wait {
                built.group.wait_while_busy().await?;
            }
            let position = built.group.position().await?;
            print_json(&serde_json::json!({
                "group": built.group.name(),
                "target": target,
                "position": position,
            }))?;
        }
        Commands::Check { position } => {
            let target = parse_position(&position)?;
            let reason = built.group.check_position_valid(&target).await?;
            print_json(&serde_json::json!({
                "group": built.group.name(),
                "position": target,
                "accepted": reason.is_none(),
                "reason": reason,
            }))?;
        }
        Commands::Show => {
            let position = built.group.position().await?;
            let rules = match &built.describe {
                Some(parent) => Some(parent.core().describe().await),
                None => None,
            };
            print_json(&serde_json::json!({
                "group": built.group.name(),
                "input_names": built.group.input_names(),
                "extra_names": built.group.extra_names(),
                "position": position,
                "rules": rules,
            }))?;
        }
    }
    Ok(())
}

fn build_group(simulation: &SimulationConfig) -> BuiltGroup {
    let cfg = &simulation.group;
    let members: Vec<Arc<dyn Scannable>> = simulation
        .axes
        .iter()
        .map(|axis| Arc::new(MockAxis::with_config(axis.clone())) as Arc<dyn Scannable>)
        .collect();
    let settings = cfg.settings.clone();
    let defer = || Arc::new(MockControlPoint::new(format!("{}_defer", cfg.name)));

    let (group, trajectory, parent): (
        Arc<dyn Scannable>,
        Option<Arc<DeferredAndTrajectoryScannableGroup>>,
        Option<Arc<dyn CoordinatedParent>>,
    ) = match cfg.kind {
        GroupKind::Plain => (
            Arc::new(ScannableGroup::with_settings(&cfg.name, members, settings)),
            None,
            None,
        ),
        GroupKind::Coordinated => {
            let group = CoordinatedScannableGroup::with_settings(&cfg.name, members, settings);
            (group.clone(), None, Some(group))
        }
        GroupKind::Deferred => {
            let group =
                DeferredScannableGroup::with_settings(&cfg.name, members, defer(), settings);
            (group.clone(), None, Some(group))
        }
        GroupKind::Trajectory => {
            let controller = MockTrajectoryController::new(
                format!("{}_trajectory", cfg.name),
                simulation.axes.len(),
            )
            .with_mode(
                MockMode::Realistic,
                Duration::from_millis(cfg.point_duration_ms),
            );
            let group = DeferredAndTrajectoryScannableGroup::with_settings(
                &cfg.name,
                members,
                defer(),
                Arc::new(controller),
                settings,
            );
            (group.clone(), Some(group.clone()), Some(group))
        }
        GroupKind::Coupled => (
            Arc::new(CoupledAxisScannableGroup::with_settings(
                &cfg.name,
                members,
                cfg.interlock.clone().unwrap_or_default(),
                settings,
            )),
            None,
            None,
        ),
    };

    if let (Some(parent), Some(interlock)) = (&parent, &cfg.interlock) {
        parent
            .core()
            .add_position_validator("interlock", Arc::new(interlock.clone()));
    }

    BuiltGroup {
        group,
        trajectory,
        describe: parent,
    }
}

/// Parse `1.0, null, 2` into a position with one field per entry.
fn parse_position(text: &str) -> Result<Position> {
    let fields = text
        .split(',')
        .map(str::trim)
        .map(|field| match field {
            "" | "null" | "none" | "-" => Ok(None),
            value => value
                .parse::<f64>()
                .map(Some)
                .with_context(|| format!("'{}' is not a number", value)),
        })
        .collect::<Result<Vec<_>>>()?;
    if fields.is_empty() {
        bail!("empty position");
    }
    Ok(Position::from(fields))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
