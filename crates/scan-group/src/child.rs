//! Members of coordinated groups.
//!
//! A [`CoordinatedChild`] wraps one physical scannable and redirects three
//! behaviours to its parent group:
//!
//! - `at_level_move_start` registers the member with the parent's targeting
//!   state machine
//! - `move_to` supplies this member's target while the parent is targeting,
//!   and moves the physical scannable otherwise
//! - `position`, `is_busy` and `at_command_failure` report the parent's state
//!
//! Everything else forwards to the physical scannable. The capability level of
//! the physical scannable is resolved once, when it is wrapped, and decides
//! which capability views the wrapper exposes.

use async_trait::async_trait;
use scan_core::capabilities::{CapabilityLevel, Scannable, ScannableMotion, ScannableMotionUnits};
use scan_core::error::{MotionError, Result};
use scan_core::position::Position;
use std::sync::{Arc, Weak};

use crate::component::ChildId;
use crate::coordinated::CoordinatedParent;

/// A physical scannable as seen from inside a coordinated group.
pub struct CoordinatedChild {
    id: ChildId,
    delegate: Arc<dyn Scannable>,
    parent: Weak<dyn CoordinatedParent>,
    kind: CapabilityLevel,
}

impl CoordinatedChild {
    pub(crate) fn wrap(delegate: Arc<dyn Scannable>, parent: Weak<dyn CoordinatedParent>) -> Self {
        let kind = delegate.capability();
        Self {
            id: ChildId::next(),
            delegate,
            parent,
            kind,
        }
    }

    /// Identity used by the parent's targeting state.
    pub fn id(&self) -> ChildId {
        self.id
    }

    /// The wrapped scannable.
    pub fn physical(&self) -> &Arc<dyn Scannable> {
        &self.delegate
    }

    /// Busy state of the wrapped scannable itself.
    pub async fn physical_is_busy(&self) -> Result<bool> {
        self.delegate.is_busy().await
    }

    /// Move the wrapped scannable, bypassing coordination.
    pub async fn physical_move_to(&self, position: Position) -> Result<()> {
        self.delegate.move_to(position).await
    }

    /// True if this member has fields that can be moved.
    pub fn is_input_field(&self) -> bool {
        !self.delegate.input_names().is_empty()
    }

    fn parent(&self) -> Result<Arc<dyn CoordinatedParent>> {
        self.parent.upgrade().ok_or_else(|| {
            MotionError::Detached(format!("{} is no longer part of a group", self.name()))
        })
    }

    fn motion(&self) -> Option<&dyn ScannableMotion> {
        self.delegate.as_motion()
    }

    fn motion_units(&self) -> Option<&dyn ScannableMotionUnits> {
        self.delegate.as_motion_units()
    }

    fn unsupported(&self, what: &str) -> MotionError {
        MotionError::Configuration(format!("{} does not support {}", self.name(), what))
    }

    fn per_input<T: Clone>(&self, value: T) -> Vec<T> {
        vec![value; self.input_names().len()]
    }
}

#[async_trait]
impl Scannable for CoordinatedChild {
    fn name(&self) -> &str {
        self.delegate.name()
    }

    fn input_names(&self) -> Vec<String> {
        self.delegate.input_names()
    }

    fn extra_names(&self) -> Vec<String> {
        self.delegate.extra_names()
    }

    fn output_format(&self) -> Vec<String> {
        self.delegate.output_format()
    }

    async fn move_to(&self, position: Position) -> Result<()> {
        let parent = self.parent()?;
        if parent.is_targeting() {
            parent.set_child_target(self.id, position).await
        } else {
            self.delegate.move_to(position).await
        }
    }

    async fn position(&self) -> Result<Position> {
        self.parent()?.position_of(self).await
    }

    async fn is_busy(&self) -> Result<bool> {
        self.parent()?.is_busy().await
    }

    async fn stop(&self) -> Result<()> {
        self.delegate.stop().await
    }

    async fn check_position_valid(&self, position: &Position) -> Result<Option<String>> {
        self.delegate.check_position_valid(position).await
    }

    async fn configure(&self) -> Result<()> {
        self.delegate.configure().await
    }

    async fn at_level_move_start(&self) -> Result<()> {
        self.parent()?.add_child_to_move(self.id);
        Ok(())
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.parent()?.at_command_failure().await
    }

    fn capability(&self) -> CapabilityLevel {
        self.kind
    }

    fn as_motion(&self) -> Option<&dyn ScannableMotion> {
        (self.kind >= CapabilityLevel::Motion).then_some(self as &dyn ScannableMotion)
    }

    fn as_motion_units(&self) -> Option<&dyn ScannableMotionUnits> {
        (self.kind == CapabilityLevel::MotionWithUnits).then_some(self as &dyn ScannableMotionUnits)
    }
}

impl ScannableMotion for CoordinatedChild {
    fn lower_limits(&self) -> Vec<Option<f64>> {
        self.motion()
            .map(|m| m.lower_limits())
            .unwrap_or_else(|| self.per_input(None))
    }

    fn upper_limits(&self) -> Vec<Option<f64>> {
        self.motion()
            .map(|m| m.upper_limits())
            .unwrap_or_else(|| self.per_input(None))
    }

    fn set_lower_limits(&self, limits: Vec<Option<f64>>) -> Result<()> {
        self.motion()
            .ok_or_else(|| self.unsupported("limits"))?
            .set_lower_limits(limits)
    }

    fn set_upper_limits(&self, limits: Vec<Option<f64>>) -> Result<()> {
        self.motion()
            .ok_or_else(|| self.unsupported("limits"))?
            .set_upper_limits(limits)
    }

    fn tolerances(&self) -> Vec<f64> {
        self.motion()
            .map(|m| m.tolerances())
            .unwrap_or_else(|| self.per_input(0.0))
    }

    fn set_tolerances(&self, tolerances: Vec<f64>) -> Result<()> {
        self.motion()
            .ok_or_else(|| self.unsupported("tolerances"))?
            .set_tolerances(tolerances)
    }

    fn offset(&self) -> Vec<Option<f64>> {
        self.motion()
            .map(|m| m.offset())
            .unwrap_or_else(|| self.per_input(None))
    }

    fn set_offset(&self, offset: Vec<Option<f64>>) {
        if let Some(motion) = self.motion() {
            motion.set_offset(offset);
        }
    }

    fn scaling_factor(&self) -> Vec<Option<f64>> {
        self.motion()
            .map(|m| m.scaling_factor())
            .unwrap_or_else(|| self.per_input(None))
    }

    fn set_scaling_factor(&self, scaling: Vec<Option<f64>>) {
        if let Some(motion) = self.motion() {
            motion.set_scaling_factor(scaling);
        }
    }

    fn number_tries(&self) -> u32 {
        self.motion().map(|m| m.number_tries()).unwrap_or(1)
    }

    fn set_number_tries(&self, tries: u32) {
        if let Some(motion) = self.motion() {
            motion.set_number_tries(tries);
        }
    }

    fn check_position_within_limits(&self, position: &Position) -> Result<Option<String>> {
        match self.motion() {
            Some(motion) => motion.check_position_within_limits(position),
            None => Ok(None),
        }
    }

    fn external_to_internal(&self, position: &Position) -> Result<Position> {
        match self.motion() {
            Some(motion) => motion.external_to_internal(position),
            None => Ok(position.clone()),
        }
    }

    fn internal_to_external(&self, position: &Position) -> Result<Position> {
        match self.motion() {
            Some(motion) => motion.internal_to_external(position),
            None => Ok(position.clone()),
        }
    }
}

impl ScannableMotionUnits for CoordinatedChild {
    fn user_units(&self) -> String {
        self.motion_units()
            .map(|m| m.user_units())
            .unwrap_or_default()
    }

    fn set_user_units(&self, units: &str) -> Result<()> {
        self.motion_units()
            .ok_or_else(|| self.unsupported("units"))?
            .set_user_units(units)
    }

    fn hardware_units(&self) -> String {
        self.motion_units()
            .map(|m| m.hardware_units())
            .unwrap_or_default()
    }

    fn set_hardware_units(&self, units: &str) -> Result<()> {
        self.motion_units()
            .ok_or_else(|| self.unsupported("units"))?
            .set_hardware_units(units)
    }

    fn acceptable_units(&self) -> Vec<String> {
        self.motion_units()
            .map(|m| m.acceptable_units())
            .unwrap_or_default()
    }

    fn add_acceptable_unit(&self, units: &str) -> Result<()> {
        self.motion_units()
            .ok_or_else(|| self.unsupported("units"))?
            .add_acceptable_unit(units)
    }
}
