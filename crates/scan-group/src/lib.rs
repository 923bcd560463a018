//! Coordinated scannable groups.
//!
//! A group presents several scannables as one, moving them with a single
//! position whose fields are the members' inputs in order. The flavours
//! layer on top of each other:
//!
//! | Type | Adds |
//! |---|---|
//! | [`ScannableGroup`] | field splitting, aggregated readback and busy state |
//! | [`CoordinatedScannableGroup`] | member moves inside a scan point are combined into one group move |
//! | [`DeferredScannableGroup`] | moves bracketed by a controller "defer" flag so drives start together |
//! | [`DeferredAndTrajectoryScannableGroup`] | optional streaming of moves to a trajectory controller |
//! | [`CoupledAxisScannableGroup`] | interlocked leading pair driven sequentially in the background |
//!
//! # Example
//!
//! ```rust,ignore
//! use scan_group::{CoordinatedScannableGroup, ThresholdInterlock};
//!
//! let group = CoordinatedScannableGroup::new("sample", vec![theta, phi]);
//! group
//!     .core()
//!     .add_position_validator("interlock", Arc::new(ThresholdInterlock::default()));
//! group.move_and_wait(Position::from(vec![4.0, 12.0])).await?;
//! ```

pub mod child;
pub mod component;
pub mod config;
pub mod coordinated;
pub mod coupled;
pub mod deferred;
pub mod group;
pub mod trajectory;
pub mod validators;

pub use child::CoordinatedChild;
pub use component::{ChildId, CoordinatedParentComponent, TargetOutcome, TargetingState};
pub use config::{GroupSettings, StopPolicy};
pub use coordinated::{CoordinatedCore, CoordinatedParent, CoordinatedScannableGroup};
pub use coupled::CoupledAxisScannableGroup;
pub use deferred::{DeferGate, DeferredScannableGroup};
pub use group::{DispatchReport, MemberOutcome, ScannableGroup};
pub use trajectory::DeferredAndTrajectoryScannableGroup;
pub use validators::{PositionValidator, ThresholdInterlock};
