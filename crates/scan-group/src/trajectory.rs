//! Deferred groups that can stream to a trajectory controller.
//!
//! With continuous operation off, [`DeferredAndTrajectoryScannableGroup`]
//! behaves exactly like a deferred group. With it on, each move becomes one
//! point appended to the controller's buffer and the controller drives the
//! hardware:
//!
//! | Operation  | Discrete                     | Continuous                                |
//! |------------|------------------------------|-------------------------------------------|
//! | `move_to`  | deferred member dispatch     | validate, convert to internal, `add_point`|
//! | `position` | member readback              | last point added (gaps from readback)     |
//! | `is_busy`  | any member busy              | controller `is_moving`                    |
//! | `stop`     | stop members, clear defer    | ... then controller `stop_and_reset`      |
//!
//! Every member must have exactly one input and no extras, and the controller
//! must drive one axis per member. `configure` checks this.

use async_trait::async_trait;
use scan_core::capabilities::{ControlPoint, Scannable, TrajectoryController};
use scan_core::error::{MotionError, Result};
use scan_core::position::{Position, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::child::CoordinatedChild;
use crate::config::GroupSettings;
use crate::coordinated::{to_external, to_internal, CoordinatedCore, CoordinatedParent};
use crate::deferred::DeferGate;

/// Deferred coordinated group with an optional continuous (streaming) mode.
pub struct DeferredAndTrajectoryScannableGroup {
    core: CoordinatedCore,
    gate: DeferGate,
    controller: Arc<dyn TrajectoryController>,
    continuous: AtomicBool,
}

impl DeferredAndTrajectoryScannableGroup {
    /// Trajectory group with default settings.
    pub fn new(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        defer: Arc<dyn ControlPoint>,
        controller: Arc<dyn TrajectoryController>,
    ) -> Arc<Self> {
        Self::with_settings(name, members, defer, controller, GroupSettings::default())
    }

    /// Trajectory group with explicit settings.
    pub fn with_settings(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        defer: Arc<dyn ControlPoint>,
        controller: Arc<dyn TrajectoryController>,
        settings: GroupSettings,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let parent: Weak<dyn CoordinatedParent> = me.clone();
            Self {
                core: CoordinatedCore::new(name, members, settings, parent),
                gate: DeferGate::new(defer),
                controller,
                continuous: AtomicBool::new(false),
            }
        })
    }

    /// True when moves are streamed to the controller.
    pub fn is_operating_continuously(&self) -> bool {
        self.continuous.load(Ordering::SeqCst)
    }

    /// Switch between discrete and continuous operation.
    ///
    /// Only flips the mode. No move may be in flight when switching.
    pub fn set_operating_continuously(&self, continuous: bool) {
        if self.continuous.swap(continuous, Ordering::SeqCst) != continuous {
            info!(
                "{}: {} operation",
                self.core.name(),
                if continuous { "continuous" } else { "discrete" }
            );
        }
    }

    /// The controller points are streamed to.
    pub fn controller(&self) -> &Arc<dyn TrajectoryController> {
        &self.controller
    }

    /// One input and no extras per member, one controller axis per member.
    fn check_layout(&self) -> Result<()> {
        let children = self.core.children();
        for child in &children {
            let inputs = child.input_names().len();
            let extras = child.extra_names().len();
            if inputs != 1 || extras != 0 {
                return Err(MotionError::Configuration(format!(
                    "{}: member {} has {} inputs and {} extras, trajectory moves need 1 and 0",
                    self.core.name(),
                    child.name(),
                    inputs,
                    extras
                )));
            }
        }
        let axes = self.controller.number_axes();
        if axes != children.len() {
            return Err(MotionError::Configuration(format!(
                "{}: trajectory controller drives {} axes but the group has {} members",
                self.core.name(),
                axes,
                children.len()
            )));
        }
        Ok(())
    }

    /// Validate, convert to internal units and append one trajectory point.
    async fn add_trajectory_point(&self, position: &Position) -> Result<()> {
        let children = self.core.children();
        let values = position.to_f64_vec()?;
        if values.len() != children.len() {
            return Err(MotionError::InvalidFieldCount {
                expected: children.len(),
                actual: values.len(),
                position: position.to_string(),
            });
        }

        let mut point = Vec::with_capacity(values.len());
        for (child, value) in children.iter().zip(values) {
            let Some(value) = value else {
                point.push(None);
                continue;
            };
            let target = Position::scalar(value);
            if let Some(reason) = child.check_position_valid(&target).await? {
                return Err(MotionError::MoveRejected {
                    scannable: child.name().to_string(),
                    position: target.to_string(),
                    reason,
                });
            }
            point.push(Some(to_internal(child, value)?));
        }

        debug!("{}: trajectory point {:?}", self.core.name(), point);
        self.controller.add_point(point).await
    }

    /// Last point added in external units, gaps filled from member readback.
    async fn continuous_position(&self) -> Result<Position> {
        let Some(point) = self.controller.last_point_added().await? else {
            return Ok(self.core.physical_position().await);
        };

        let readback = if point.iter().any(Option::is_none) {
            self.core.physical_position().await.fields()
        } else {
            Vec::new()
        };

        let children = self.core.children();
        let mut fields = Vec::with_capacity(point.len());
        for (index, (child, internal)) in children.iter().zip(point).enumerate() {
            let field = match internal {
                Some(value) => Some(Value::Number(to_external(child, value)?)),
                None => readback.get(index).cloned().flatten(),
            };
            fields.push(field);
        }
        Ok(Position::Array(fields))
    }
}

#[async_trait]
impl CoordinatedParent for DeferredAndTrajectoryScannableGroup {
    fn core(&self) -> &CoordinatedCore {
        &self.core
    }

    /// While continuous, a member reads its field of the last point added.
    async fn position_of(&self, child: &CoordinatedChild) -> Result<Position> {
        if !self.is_operating_continuously() {
            return child.physical().position().await;
        }
        let index = self.core.children().iter().position(|c| c.id() == child.id());
        let field = match index {
            Some(index) => self.continuous_position().await?.fields().into_iter().nth(index),
            None => None,
        };
        match field.flatten() {
            Some(value) => Ok(Position::Scalar(value)),
            None => child.physical().position().await,
        }
    }
}

#[async_trait]
impl Scannable for DeferredAndTrajectoryScannableGroup {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn input_names(&self) -> Vec<String> {
        self.core.group().input_names()
    }

    fn extra_names(&self) -> Vec<String> {
        self.core.group().extra_names()
    }

    fn output_format(&self) -> Vec<String> {
        self.core.group().output_format()
    }

    async fn move_to(&self, position: Position) -> Result<()> {
        let _token = self.core.group().try_acquire_motion()?;
        if self.is_operating_continuously() {
            self.add_trajectory_point(&position).await
        } else {
            self.gate.move_deferred(&self.core, &position).await
        }
    }

    async fn position(&self) -> Result<Position> {
        if self.is_operating_continuously() {
            self.continuous_position().await
        } else {
            self.core.position().await
        }
    }

    async fn is_busy(&self) -> Result<bool> {
        if self.is_operating_continuously() {
            self.controller.is_moving().await
        } else {
            self.core.is_busy().await
        }
    }

    async fn stop(&self) -> Result<()> {
        let stopped = self.gate.stop(&self.core).await;
        if !self.is_operating_continuously() {
            return stopped;
        }
        let reset = self
            .controller
            .stop_and_reset()
            .await
            .map_err(|err| match err {
                MotionError::Interrupted(msg) => MotionError::Hardware(format!(
                    "{}: interrupted while stopping trajectory: {}",
                    self.core.name(),
                    msg
                )),
                other => other,
            });
        stopped.and(reset)
    }

    async fn check_position_valid(&self, position: &Position) -> Result<Option<String>> {
        self.core.check_position_valid(position).await
    }

    async fn wait_while_busy(&self) -> Result<()> {
        if self.is_operating_continuously() {
            self.controller.wait_while_moving().await
        } else {
            self.core.wait_until_idle(self).await
        }
    }

    async fn configure(&self) -> Result<()> {
        self.check_layout()?;
        self.core.group().configure().await
    }

    async fn at_level_move_start(&self) -> Result<()> {
        Ok(())
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.core.at_command_failure().await
    }
}
