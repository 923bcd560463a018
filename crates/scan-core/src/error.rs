//! Error types for scannables and scannable groups.
//!
//! This module defines the primary error type, `MotionError`, shared by every
//! scannable, group and collaborator in the workspace. Using the `thiserror`
//! crate, it gives each failure in the motion subsystem a distinct variant so
//! callers can react to the kind of failure rather than parse messages.
//!
//! ## Error Taxonomy
//!
//! - **Validation** (`InvalidFieldCount`, `MoveRejected`, `Interlock`,
//!   `InvalidPosition`): detected before any hardware action. Nothing moved.
//! - **Hardware** (`CommandFailed`, `Hardware`, `Device`, `StopFailed`): a
//!   member's move or stop failed. Already-dispatched motion keeps running;
//!   the group has stopped what it could before reporting.
//! - **State** (`GroupBusy`, `Targeting`, `Detached`): the request conflicts with
//!   the group's current state machine.
//! - **Runtime** (`Interrupted`, `Configuration`): waits that were cut short
//!   and configuration that failed validation.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Lost or garbled link to the device.
    Communication,
    /// The device reported a fault.
    Hardware,
    /// The device did not answer in time.
    Timeout,
    /// The device rejected a parameter.
    InvalidParameter,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Fault reported by an axis driver or another external collaborator.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver}' {kind} error: {message}")]
pub struct DriverError {
    /// Name of the reporting driver.
    pub driver: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Driver-specific detail.
    pub message: String,
}

impl DriverError {
    /// Build a driver error.
    pub fn new(driver: impl Into<String>, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the motion error type.
pub type Result<T> = std::result::Result<T, MotionError>;

/// Primary error type for scannables and groups.
#[derive(Error, Debug)]
pub enum MotionError {
    /// A position vector did not match the group's input field count.
    ///
    /// Raised before any member is touched.
    #[error(
        "Position does not have correct number of fields. Expected = {expected} actual = {actual} position= {position}"
    )]
    InvalidFieldCount {
        /// Fields the group expects.
        expected: usize,
        /// Fields supplied.
        actual: usize,
        /// The offending position, formatted.
        position: String,
    },

    /// A member's own validity check (or an additional group validator)
    /// rejected the requested position.
    #[error("Did not move {scannable} to {position} because:\n{reason}")]
    MoveRejected {
        /// Name of the group or member that refused.
        scannable: String,
        /// The refused position, formatted.
        position: String,
        /// Why it was refused.
        reason: String,
    },

    /// A member's underlying move failed while the group was dispatching.
    ///
    /// The group has already run its command-failure handling (stop members,
    /// clear coordination and defer state) by the time this is returned.
    #[error("Exception while moving {scannable} to {position}: {source}")]
    CommandFailed {
        /// Name of the group.
        scannable: String,
        /// The attempted position, formatted.
        position: String,
        /// The member failure.
        #[source]
        source: Box<MotionError>,
    },

    /// A safety precondition spanning several members' targets failed.
    #[error("{scannable} interlock violated: {rule}")]
    Interlock {
        /// Name of the group.
        scannable: String,
        /// The rule that was broken.
        rule: String,
    },

    /// A wait for completion was interrupted.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Generic hardware failure reported by a collaborator.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Structured driver error with category.
    #[error("{0}")]
    Device(#[from] DriverError),

    /// A position value could not be converted (e.g. non-numeric text).
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// Configuration failed validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The targeting state machine was driven out of order.
    #[error("Targeting error: {0}")]
    Targeting(String),

    /// The group already holds its motion token, or is collecting targets.
    #[error("{group} is busy: another move or a targeting sequence is in progress")]
    GroupBusy {
        /// Name of the busy group.
        group: String,
    },

    /// A coordinated member wrapper outlived the group it belonged to.
    #[error("{0} is no longer attached to a group")]
    Detached(String),

    /// One or more members failed to stop.
    #[error("Failed to stop {scannable}: {}", failures.join("; "))]
    StopFailed {
        /// Name of the group.
        scannable: String,
        /// One message per member that could not be stopped.
        failures: Vec<String>,
    },
}

impl MotionError {
    /// Wrap a hardware failure with the group name and attempted position.
    pub fn command_failed(
        scannable: impl Into<String>,
        position: impl std::fmt::Display,
        source: MotionError,
    ) -> Self {
        MotionError::CommandFailed {
            scannable: scannable.into(),
            position: position.to_string(),
            source: Box::new(source),
        }
    }

    /// True for errors detected before any hardware action.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MotionError::InvalidFieldCount { .. }
                | MotionError::MoveRejected { .. }
                | MotionError::Interlock { .. }
                | MotionError::InvalidPosition(_)
        )
    }
}
