//! Simulated hardware for scannable groups.
//!
//! This crate provides stand-ins for the devices a group coordinates, so
//! groups can be exercised without physical hardware. All timing uses
//! `tokio::time`, never `std::thread::sleep`.
//!
//! # Available Mocks
//!
//! - [`MockAxis`] - Multi-field axis with limits, units and optional motion timing
//! - [`MockControlPoint`] - Integer register used as a controller's defer flag
//! - [`MockTrajectoryController`] - Streaming controller that buffers points
//!
//! Every mock records what was asked of it (moves, stops, register writes,
//! trajectory points) and can inject failures through [`ErrorConfig`].

pub mod common;
mod mock_axis;
mod mock_control_point;
mod mock_trajectory;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng};

pub use mock_axis::{MockAxis, MockAxisBuilder, MockAxisConfig};
pub use mock_control_point::MockControlPoint;
pub use mock_trajectory::MockTrajectoryController;
