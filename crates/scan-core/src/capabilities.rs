//! Scannable Capabilities
//!
//! This module defines the capability traits that axes, groups and their
//! collaborators implement. A device implements the smallest set it supports:
//!
//! - Every movable unit implements [`Scannable`]
//! - Units with soft limits, offsets and scaling add [`ScannableMotion`]
//! - Units that also know their engineering units add [`ScannableMotionUnits`]
//!
//! Groups never inspect concrete types. They ask a member for its
//! [`CapabilityLevel`] once, when the member is added, and forward through
//! [`Scannable::as_motion`] / [`Scannable::as_motion_units`] afterwards.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async where it may touch hardware (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses [`crate::error::Result`] for errors
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park<S: Scannable + ?Sized>(axis: &S) -> Result<()> {
//!     if let Some(reason) = axis.check_position_valid(&Position::scalar(0.0)).await? {
//!         tracing::warn!("cannot park {}: {}", axis.name(), reason);
//!         return Ok(());
//!     }
//!     axis.move_and_wait(Position::scalar(0.0)).await
//! }
//! ```

use crate::error::{MotionError, Result};
use crate::limits::DEFAULT_POLL_INTERVAL;
use crate::position::Position;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default output format for a single field.
pub const DEFAULT_OUTPUT_FORMAT: &str = "%5.5g";

// =============================================================================
// Capability Level
// =============================================================================

/// Which optional capability traits a scannable exposes.
///
/// Ordered so that `MotionWithUnits > Motion > Plain`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityLevel {
    /// Only [`Scannable`]
    #[default]
    Plain,
    /// [`Scannable`] + [`ScannableMotion`]
    Motion,
    /// [`Scannable`] + [`ScannableMotion`] + [`ScannableMotionUnits`]
    MotionWithUnits,
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: a movable, readable unit (an axis, or a group of axes).
///
/// # Contract
/// - `move_to` starts motion and returns once the move has been dispatched,
///   not once it has arrived. Use `wait_while_busy` to wait for arrival.
/// - A position has `input_names().len()` movable fields followed by
///   `extra_names().len()` readback-only fields.
/// - `check_position_valid` returns `Ok(None)` to accept and `Ok(Some(reason))`
///   to reject; `Err` is reserved for failures while checking.
///
/// # Thread Safety
/// - All methods take `&self`; implementations use interior mutability.
#[async_trait]
pub trait Scannable: Send + Sync {
    /// Identity of this scannable.
    fn name(&self) -> &str;

    /// Names of the movable fields.
    fn input_names(&self) -> Vec<String>;

    /// Names of the readback-only fields.
    fn extra_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// One format string per field (inputs then extras).
    fn output_format(&self) -> Vec<String> {
        vec![
            DEFAULT_OUTPUT_FORMAT.to_string();
            self.input_names().len() + self.extra_names().len()
        ]
    }

    /// Start a move to `position`.
    async fn move_to(&self, position: Position) -> Result<()>;

    /// Start a move and block until the scannable is no longer busy.
    async fn move_and_wait(&self, position: Position) -> Result<()> {
        self.move_to(position).await?;
        self.wait_while_busy().await
    }

    /// Current position (inputs then extras).
    async fn position(&self) -> Result<Position>;

    /// True while a move is in progress.
    async fn is_busy(&self) -> Result<bool>;

    /// Halt any motion in progress.
    async fn stop(&self) -> Result<()>;

    /// Check whether `position` would be accepted by `move_to`.
    async fn check_position_valid(&self, _position: &Position) -> Result<Option<String>> {
        Ok(None)
    }

    /// Block until `is_busy` reports false.
    ///
    /// Polls every [`DEFAULT_POLL_INTERVAL`]. Must not be called from a UI thread.
    async fn wait_while_busy(&self) -> Result<()> {
        poll_until_idle(self, DEFAULT_POLL_INTERVAL).await
    }

    /// Called once when the owning framework configures devices.
    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    /// Called on every scannable at the start of a level's move in a scan point.
    async fn at_level_move_start(&self) -> Result<()> {
        Ok(())
    }

    /// Called when a scan command fails; implementations stop and reset.
    async fn at_command_failure(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable `name : position`, or `name : UNAVAILABLE` if unreadable.
    async fn to_formatted_string(&self) -> String {
        match self.position().await {
            Ok(position) => format!("{} : {}", self.name(), position),
            Err(_) => format!("{} : UNAVAILABLE", self.name()),
        }
    }

    /// The optional capabilities this scannable exposes.
    fn capability(&self) -> CapabilityLevel {
        if self.as_motion_units().is_some() {
            CapabilityLevel::MotionWithUnits
        } else if self.as_motion().is_some() {
            CapabilityLevel::Motion
        } else {
            CapabilityLevel::Plain
        }
    }

    /// Motion view of this scannable, if supported.
    fn as_motion(&self) -> Option<&dyn ScannableMotion> {
        None
    }

    /// Motion-with-units view of this scannable, if supported.
    fn as_motion_units(&self) -> Option<&dyn ScannableMotionUnits> {
        None
    }
}

/// Poll `is_busy` at `interval` until it reports false.
pub async fn poll_until_idle<S>(scannable: &S, interval: Duration) -> Result<()>
where
    S: Scannable + ?Sized,
{
    while scannable.is_busy().await? {
        tokio::time::sleep(interval).await;
    }
    Ok(())
}

/// Capability: soft limits, offsets, scaling and tolerances.
///
/// All vectors have one entry per input field. Limits and offsets are in
/// external (user) coordinates; `external_to_internal` removes the offset and
/// then the scaling factor.
pub trait ScannableMotion: Scannable {
    /// Lower soft limit per input, `None` for unlimited.
    fn lower_limits(&self) -> Vec<Option<f64>>;
    /// Upper soft limit per input, `None` for unlimited.
    fn upper_limits(&self) -> Vec<Option<f64>>;
    /// Replace the lower soft limits.
    fn set_lower_limits(&self, limits: Vec<Option<f64>>) -> Result<()>;
    /// Replace the upper soft limits.
    fn set_upper_limits(&self, limits: Vec<Option<f64>>) -> Result<()>;

    /// Deadband per input used when checking arrival.
    fn tolerances(&self) -> Vec<f64>;
    /// Replace the tolerances.
    fn set_tolerances(&self, tolerances: Vec<f64>) -> Result<()>;

    /// Offset per input in external units.
    fn offset(&self) -> Vec<Option<f64>>;
    /// Replace the offsets.
    fn set_offset(&self, offset: Vec<Option<f64>>);

    /// Scaling factor per input.
    fn scaling_factor(&self) -> Vec<Option<f64>>;
    /// Replace the scaling factors.
    fn set_scaling_factor(&self, scaling: Vec<Option<f64>>);

    /// Attempts made for each move before giving up.
    fn number_tries(&self) -> u32;
    /// Change the number of attempts.
    fn set_number_tries(&self, tries: u32);

    /// Check an external position against the soft limits.
    fn check_position_within_limits(&self, position: &Position) -> Result<Option<String>> {
        let values = position.to_f64_vec()?;
        let lower = self.lower_limits();
        let upper = self.upper_limits();
        let names = self.input_names();
        for (i, value) in values.iter().enumerate() {
            let Some(value) = value else { continue };
            let field = names.get(i).map(String::as_str).unwrap_or(self.name());
            if let Some(Some(lo)) = lower.get(i) {
                if value < lo {
                    return Ok(Some(format!(
                        "Scannable limit violation on {}: {} < {} (internal/hardware/dial values).",
                        field, value, lo
                    )));
                }
            }
            if let Some(Some(hi)) = upper.get(i) {
                if value > hi {
                    return Ok(Some(format!(
                        "Scannable limit violation on {}: {} > {} (internal/hardware/dial values).",
                        field, value, hi
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Convert a user position into hardware coordinates.
    fn external_to_internal(&self, position: &Position) -> Result<Position> {
        let offset = self.offset();
        let scaling = self.scaling_factor();
        map_numeric_fields(position, |i, value| {
            let shifted = value - offset.get(i).copied().flatten().unwrap_or(0.0);
            match scaling.get(i).copied().flatten() {
                Some(scale) if scale == 0.0 => Err(MotionError::Configuration(format!(
                    "{} has a zero scaling factor",
                    self.name()
                ))),
                Some(scale) => Ok(shifted / scale),
                None => Ok(shifted),
            }
        })
    }

    /// Convert a hardware position into user coordinates.
    fn internal_to_external(&self, position: &Position) -> Result<Position> {
        let offset = self.offset();
        let scaling = self.scaling_factor();
        map_numeric_fields(position, |i, value| {
            let scaled = value * scaling.get(i).copied().flatten().unwrap_or(1.0);
            Ok(scaled + offset.get(i).copied().flatten().unwrap_or(0.0))
        })
    }
}

/// Apply `f` to every present field, keeping the scalar/array shape.
fn map_numeric_fields<F>(position: &Position, f: F) -> Result<Position>
where
    F: Fn(usize, f64) -> Result<f64>,
{
    let values = position.to_f64_vec()?;
    let mapped = values
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.map(|v| f(i, v)).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok(match position {
        Position::Scalar(_) => match mapped.first().copied().flatten() {
            Some(v) => Position::scalar(v),
            None => Position::from_f64s(mapped),
        },
        Position::Array(_) => Position::from_f64s(mapped),
    })
}

/// Capability: engineering units.
pub trait ScannableMotionUnits: ScannableMotion {
    /// Units used for positions exchanged with callers.
    fn user_units(&self) -> String;

    /// Change the user units. Must be one of `acceptable_units()`.
    fn set_user_units(&self, units: &str) -> Result<()>;

    /// Units the hardware reports in.
    fn hardware_units(&self) -> String;
    /// Change the hardware units.
    fn set_hardware_units(&self, units: &str) -> Result<()>;

    /// Units `set_user_units` accepts.
    fn acceptable_units(&self) -> Vec<String>;
    /// Allow another user unit.
    fn add_acceptable_unit(&self, units: &str) -> Result<()>;
}

/// Capability: a settable integer register (e.g. a "defer moves" flag).
#[async_trait]
pub trait ControlPoint: Send + Sync {
    /// Write the register.
    async fn set_value(&self, value: i32) -> Result<()>;
    /// Read the register back.
    async fn value(&self) -> Result<i32>;
}

/// Capability: a streaming motion controller consuming trajectory points.
///
/// Points are in internal (hardware) coordinates with one entry per axis;
/// a missing entry means the axis is not commanded by that point.
#[async_trait]
pub trait TrajectoryController: Send + Sync {
    /// Append a point to the trajectory buffer.
    async fn add_point(&self, point: Vec<Option<f64>>) -> Result<()>;

    /// The most recently appended point, if any.
    async fn last_point_added(&self) -> Result<Option<Vec<Option<f64>>>>;

    /// True while the controller is executing buffered points.
    async fn is_moving(&self) -> Result<bool>;

    /// Block until the controller stops moving.
    async fn wait_while_moving(&self) -> Result<()>;

    /// Halt motion and discard buffered points.
    async fn stop_and_reset(&self) -> Result<()>;

    /// Number of axes each point must carry.
    fn number_axes(&self) -> usize;
}
