//! `scan-core`
//!
//! Core trait definitions and types for coordinated scannable motion.
//!
//! This crate provides the vocabulary shared by axis drivers, the simulated
//! drivers in `scan-driver-mock`, and the group controllers in `scan-group`:
//!
//! - [`capabilities`]: the [`Scannable`] trait and its optional capability
//!   extensions, plus the defer [`ControlPoint`] and streaming
//!   [`TrajectoryController`] collaborators
//! - [`position`]: loosely typed [`Position`] values and their conversions
//! - [`error`]: the [`MotionError`] taxonomy
//! - [`limits`]: shared polling constants

pub mod capabilities;
pub mod error;
pub mod limits;
pub mod position;

pub use capabilities::{
    poll_until_idle, CapabilityLevel, ControlPoint, Scannable, ScannableMotion,
    ScannableMotionUnits, TrajectoryController, DEFAULT_OUTPUT_FORMAT,
};
pub use error::{DriverError, DriverErrorKind, MotionError, Result};
pub use position::{Position, Value};
