//! Coordinated scannable groups.
//!
//! Members of a coordinated group are wrapped in [`CoordinatedChild`]. When
//! the scan engine moves the members one by one inside a level move, their
//! requests are collected by the group's [`CoordinatedParentComponent`] and
//! sent as one move of the whole group once every member has a target.
//!
//! Moving the group itself (rather than its members) skips targeting
//! entirely: `at_level_move_start` on the group does nothing.

use async_trait::async_trait;
use parking_lot::RwLock;
use scan_core::capabilities::{poll_until_idle, Scannable};
use scan_core::error::{MotionError, Result};
use scan_core::position::Position;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::child::CoordinatedChild;
use crate::component::{ChildId, ChildSlot, CoordinatedParentComponent, TargetOutcome};
use crate::config::GroupSettings;
use crate::group::{combined_position, stop_members, ScannableGroup};
use crate::validators::PositionValidator;

// =============================================================================
// Parent Capability
// =============================================================================

/// A group that coordinates moves of its [`CoordinatedChild`] members.
///
/// Children hold a weak reference to the outermost group, so the combined
/// move goes through that group's own `move_to` (deferred, trajectory, ...).
#[async_trait]
pub trait CoordinatedParent: Scannable {
    /// Membership, targeting state and validators of this group.
    fn core(&self) -> &CoordinatedCore;

    /// True while member targets are being collected.
    fn is_targeting(&self) -> bool {
        self.core().coordination().is_targeting()
    }

    /// Register a member for the current level move.
    fn add_child_to_move(&self, child: ChildId) {
        self.core().coordination().add_child_to_move(child);
    }

    /// Readback of one member as the group sees it.
    ///
    /// Defaults to the physical scannable's own position.
    async fn position_of(&self, child: &CoordinatedChild) -> Result<Position> {
        child.physical().position().await
    }

    /// Record a child's target and fire the combined move once complete.
    ///
    /// If the combined move fails the group's command-failure handling runs
    /// before the error is returned.
    async fn set_child_target(&self, child: ChildId, position: Position) -> Result<()> {
        let target = match self.core().coordination().set_child_target(child, position)? {
            TargetOutcome::Pending => return Ok(()),
            TargetOutcome::Complete(target) => Position::from_f64s(target),
        };
        debug!("{}: all targets supplied, moving to {}", self.name(), target);
        if let Err(err) = self.move_to(target).await {
            if let Err(cleanup) = self.at_command_failure().await {
                warn!(
                    "{}: command failure handling also failed: {}",
                    self.name(),
                    cleanup
                );
            }
            return Err(err);
        }
        Ok(())
    }
}

// =============================================================================
// Shared Core
// =============================================================================

/// State shared by every coordinated group flavour.
pub struct CoordinatedCore {
    group: ScannableGroup,
    children: RwLock<Vec<Arc<CoordinatedChild>>>,
    component: CoordinatedParentComponent,
    validators: RwLock<Vec<(String, Arc<dyn PositionValidator>)>>,
    parent: Weak<dyn CoordinatedParent>,
}

impl CoordinatedCore {
    /// `parent` is the group that owns this core, usually from `Arc::new_cyclic`.
    pub fn new(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        settings: GroupSettings,
        parent: Weak<dyn CoordinatedParent>,
    ) -> Self {
        let children: Vec<Arc<CoordinatedChild>> = members
            .into_iter()
            .map(|m| Arc::new(CoordinatedChild::wrap(m, parent.clone())))
            .collect();
        let core = Self {
            group: ScannableGroup::with_settings(name, as_scannables(&children), settings),
            children: RwLock::new(Vec::new()),
            component: CoordinatedParentComponent::new(),
            validators: RwLock::new(Vec::new()),
            parent,
        };
        core.install(children);
        core
    }

    /// Group name.
    pub fn name(&self) -> &str {
        self.group.name()
    }

    /// Settings shared with the plain group.
    pub fn settings(&self) -> &GroupSettings {
        self.group.settings()
    }

    /// The plain group of wrapped members.
    pub fn group(&self) -> &ScannableGroup {
        &self.group
    }

    /// The targeting state machine.
    pub fn coordination(&self) -> &CoordinatedParentComponent {
        &self.component
    }

    /// Member wrappers, in order.
    pub fn children(&self) -> Vec<Arc<CoordinatedChild>> {
        self.children.read().clone()
    }

    /// Wrapped members, in order.
    pub fn members(&self) -> Vec<Arc<dyn Scannable>> {
        self.group.members()
    }

    /// Wrapped member called `name`.
    pub fn member(&self, name: &str) -> Option<Arc<dyn Scannable>> {
        self.group.member(name)
    }

    /// Replace the members. Each one is wrapped for coordination.
    pub fn set_members(&self, members: Vec<Arc<dyn Scannable>>) -> Result<()> {
        self.ensure_not_targeting()?;
        let children: Vec<Arc<CoordinatedChild>> =
            members.into_iter().map(|m| self.wrap(m)).collect();
        self.group.set_members(as_scannables(&children))?;
        self.install(children);
        Ok(())
    }

    /// Append a member, wrapping it for coordination.
    pub fn add_member(&self, member: Arc<dyn Scannable>) -> Result<()> {
        self.ensure_not_targeting()?;
        let child = self.wrap(member);
        self.group.add_member(child.clone())?;
        let mut children = self.children();
        children.push(child);
        self.install(children);
        Ok(())
    }

    /// Remove the member called `name` and return the physical scannable.
    pub fn remove_member(&self, name: &str) -> Result<Arc<dyn Scannable>> {
        self.ensure_not_targeting()?;
        self.group.remove_member(name)?;
        let mut children = self.children();
        let index = children
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| {
                MotionError::Configuration(format!("{} has no member called {}", self.name(), name))
            })?;
        let removed = children.remove(index);
        self.install(children);
        Ok(removed.physical().clone())
    }

    fn wrap(&self, member: Arc<dyn Scannable>) -> Arc<CoordinatedChild> {
        Arc::new(CoordinatedChild::wrap(member, self.parent.clone()))
    }

    fn install(&self, children: Vec<Arc<CoordinatedChild>>) {
        self.component.set_members(
            children
                .iter()
                .map(|c| ChildSlot {
                    id: c.id(),
                    inputs: c.input_names().len(),
                })
                .collect(),
        );
        *self.children.write() = children;
    }

    fn ensure_not_targeting(&self) -> Result<()> {
        if self.component.is_targeting() {
            return Err(MotionError::GroupBusy {
                group: self.name().to_string(),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Additional position validators
    // -------------------------------------------------------------------------

    /// Add a validator, replacing any existing one with the same name in place.
    ///
    /// Validators run in the order they were first added.
    pub fn add_position_validator(
        &self,
        name: impl Into<String>,
        validator: Arc<dyn PositionValidator>,
    ) {
        let name = name.into();
        let mut validators = self.validators.write();
        match validators.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = validator,
            None => validators.push((name, validator)),
        }
    }

    /// Replace every validator.
    pub fn set_position_validators(&self, validators: Vec<(String, Arc<dyn PositionValidator>)>) {
        *self.validators.write() = validators;
    }

    /// Validators with their names, in order.
    pub fn position_validators(&self) -> Vec<(String, Arc<dyn PositionValidator>)> {
        self.validators.read().clone()
    }

    /// Run the additional validators over `position`.
    ///
    /// Needs one field per member. Missing fields are replaced by the member's
    /// current position, then every field is converted to internal units.
    pub async fn check_additional_validators(&self, position: &Position) -> Result<Option<String>> {
        let validators = self.position_validators();
        if validators.is_empty() {
            return Ok(None);
        }

        let children = self.children();
        let values = position.to_f64_vec()?;
        if values.len() != children.len() {
            return Err(MotionError::InvalidFieldCount {
                expected: children.len(),
                actual: values.len(),
                position: position.to_string(),
            });
        }

        let mut internal = Vec::with_capacity(values.len());
        for (child, value) in children.iter().zip(values) {
            let external = match value {
                Some(value) => value,
                None => child.position().await?.as_f64()?.ok_or_else(|| {
                    MotionError::InvalidPosition(format!("{} has no current position", child.name()))
                })?,
            };
            internal.push(to_internal(child, external)?);
        }

        for (name, validator) in &validators {
            if let Some(reason) = validator.check_internal_position(&internal) {
                debug!("{}: validator {} rejected {:?}", self.name(), name, internal);
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    /// Member checks first, then the additional validators.
    pub async fn check_position_valid(&self, position: &Position) -> Result<Option<String>> {
        if let Some(reason) = self.group.check_position_valid(position).await? {
            return Ok(Some(reason));
        }
        self.check_additional_validators(position).await
    }

    /// `name = value,` for every requested input.
    fn describe_position(&self, values: &[Option<f64>]) -> String {
        let labels: Vec<String> = self
            .children()
            .iter()
            .flat_map(|child| match child.input_names().len() {
                1 => vec![child.name().to_string()],
                _ => child.input_names(),
            })
            .collect();
        labels
            .iter()
            .zip(values)
            .filter_map(|(label, value)| value.map(|v| format!("{} = {},", label, v)))
            .collect()
    }

    /// Human-readable summary of the validators and the current position.
    pub async fn describe(&self) -> String {
        let mut output = format!("{} :: (collision avoidance rules)\n", self.name());
        for (_, validator) in self.position_validators() {
            let rule = validator.to_string();
            if !rule.is_empty() {
                output.push_str(&format!("* {}\n", rule));
            }
        }
        output.push('\n');
        output.push_str(&self.group.to_formatted_string().await);
        output.trim().to_string()
    }

    // -------------------------------------------------------------------------
    // Motion
    // -------------------------------------------------------------------------

    /// Validate, then dispatch to every member. Does not take the motion token.
    pub async fn move_validated(&self, position: &Position) -> Result<()> {
        if let Some(reason) = self.check_position_valid(position).await? {
            let described = position
                .to_f64_vec()
                .map(|values| self.describe_position(&values))
                .unwrap_or_else(|_| position.to_string());
            warn!("{}: rejected move to {}: {}", self.name(), described, reason);
            return Err(MotionError::MoveRejected {
                scannable: self.name().to_string(),
                position: described,
                reason,
            });
        }
        self.group.move_unlocked(position).await?;
        info!("{}: dispatched move to {}", self.name(), position);
        Ok(())
    }

    /// Aggregate readback of the members.
    pub async fn position(&self) -> Result<Position> {
        self.group.position().await
    }

    /// Readback of the physical members, bypassing the parent's `position_of`.
    pub async fn physical_position(&self) -> Position {
        let physical: Vec<Arc<dyn Scannable>> = self
            .children()
            .iter()
            .map(|c| c.physical().clone())
            .collect();
        combined_position(self.name(), &physical).await
    }

    /// True if any physical member is busy.
    pub async fn is_busy(&self) -> Result<bool> {
        for child in self.children() {
            if child.physical_is_busy().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stop every member according to the stop policy.
    pub async fn stop_members(&self) -> Result<()> {
        stop_members(self.name(), &self.members(), self.settings().stop_policy).await
    }

    /// Stop every member and leave targeting.
    pub async fn at_command_failure(&self) -> Result<()> {
        let stopped = self.stop_members().await;
        self.component.reset_state();
        stopped
    }

    pub(crate) async fn wait_until_idle<S: Scannable + ?Sized>(&self, group: &S) -> Result<()> {
        poll_until_idle(group, self.settings().poll_interval()).await
    }
}

fn as_scannables(children: &[Arc<CoordinatedChild>]) -> Vec<Arc<dyn Scannable>> {
    children
        .iter()
        .map(|c| c.clone() as Arc<dyn Scannable>)
        .collect()
}

/// External to internal units for one single-input member.
pub(crate) fn to_internal(child: &CoordinatedChild, value: f64) -> Result<f64> {
    match child.as_motion() {
        Some(motion) => scalar_value(motion.external_to_internal(&Position::scalar(value))?),
        None => Ok(value),
    }
}

/// Internal to external units for one single-input member.
pub(crate) fn to_external(child: &CoordinatedChild, value: f64) -> Result<f64> {
    match child.as_motion() {
        Some(motion) => scalar_value(motion.internal_to_external(&Position::scalar(value))?),
        None => Ok(value),
    }
}

fn scalar_value(position: Position) -> Result<f64> {
    position
        .as_f64()?
        .ok_or_else(|| MotionError::InvalidPosition(format!("{} has no value", position)))
}

// =============================================================================
// CoordinatedScannableGroup
// =============================================================================

/// Group whose members' individual moves are combined into one group move.
pub struct CoordinatedScannableGroup {
    core: CoordinatedCore,
}

impl CoordinatedScannableGroup {
    /// Coordinated group with default settings.
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Scannable>>) -> Arc<Self> {
        Self::with_settings(name, members, GroupSettings::default())
    }

    /// Coordinated group built with `Arc::new_cyclic` so members can reach it.
    pub fn with_settings(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        settings: GroupSettings,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let parent: Weak<dyn CoordinatedParent> = me.clone();
            Self {
                core: CoordinatedCore::new(name, members, settings, parent),
            }
        })
    }
}

impl CoordinatedParent for CoordinatedScannableGroup {
    fn core(&self) -> &CoordinatedCore {
        &self.core
    }
}

#[async_trait]
impl Scannable for CoordinatedScannableGroup {
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
        self.core.move_validated(&position).await
    }

    async fn position(&self) -> Result<Position> {
        self.core.position().await
    }

    async fn is_busy(&self) -> Result<bool> {
        self.core.is_busy().await
    }

    async fn stop(&self) -> Result<()> {
        self.core.stop_members().await
    }

    async fn check_position_valid(&self, position: &Position) -> Result<Option<String>> {
        self.core.check_position_valid(position).await
    }

    async fn wait_while_busy(&self) -> Result<()> {
        self.core.wait_until_idle(self).await
    }

    async fn configure(&self) -> Result<()> {
        self.core.group().configure().await
    }

    async fn at_level_move_start(&self) -> Result<()> {
        Ok(())
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.core.at_command_failure().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::ThresholdInterlock;
    use scan_core::capabilities::CapabilityLevel;
    use scan_driver_mock::{ErrorConfig, ErrorScenario, MockAxis};

    fn group(axes: &[&MockAxis]) -> Arc<CoordinatedScannableGroup> {
        CoordinatedScannableGroup::new(
            "cg",
            axes.iter()
                .map(|a| Arc::new((*a).clone()) as Arc<dyn Scannable>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_member_moves_are_combined() {
        let (a, b, c) = (MockAxis::new("a"), MockAxis::new("b"), MockAxis::new("c"));
        let group = group(&[&a, &b, &c]);
        let children = group.core().children();

        for child in &children {
            child.at_level_move_start().await.unwrap();
        }
        children[0].move_to(Position::scalar(1.0)).await.unwrap();
        children[1].move_to(Position::scalar(2.0)).await.unwrap();
        assert!(group.is_targeting());
        assert_eq!(a.move_count() + b.move_count() + c.move_count(), 0);

        children[2].move_to(Position::scalar(3.0)).await.unwrap();
        assert!(!group.is_targeting());
        assert_eq!(a.moves(), vec![Position::scalar(1.0)]);
        assert_eq!(b.moves(), vec![Position::scalar(2.0)]);
        assert_eq!(c.moves(), vec![Position::scalar(3.0)]);
    }

    #[tokio::test]
    async fn test_member_moves_directly_when_not_targeting() {
        let a = MockAxis::new("a");
        let group = group(&[&a]);

        group.core().children()[0]
            .move_to(Position::scalar(4.0))
            .await
            .unwrap();
        assert_eq!(a.moves(), vec![Position::scalar(4.0)]);
    }

    #[tokio::test]
    async fn test_group_level_move_start_does_not_target() {
        let a = MockAxis::new("a");
        let group = group(&[&a]);

        group.at_level_move_start().await.unwrap();
        assert!(!group.is_targeting());
        assert_eq!(a.level_move_start_count(), 0);
    }

    #[tokio::test]
    async fn test_child_busy_reports_group() {
        let (a, b) = (MockAxis::new("a"), MockAxis::new("b"));
        let group = group(&[&a, &b]);
        let children = group.core().children();

        b.hold_busy(true);
        assert!(children[0].is_busy().await.unwrap());
        assert!(!children[0].physical_is_busy().await.unwrap());
        assert!(group.is_busy().await.unwrap());

        b.hold_busy(false);
        assert!(!children[0].is_busy().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_combined_move_resets_and_stops() {
        let a = MockAxis::new("a");
        let bad = MockAxis::builder("bad")
            .error_config(ErrorConfig::scenario(ErrorScenario::Fail { operation: "move" }))
            .build();
        let group = group(&[&a, &bad]);
        let children = group.core().children();

        for child in &children {
            child.at_level_move_start().await.unwrap();
        }
        children[0].move_to(Position::scalar(1.0)).await.unwrap();
        let err = children[1]
            .move_to(Position::scalar(2.0))
            .await
            .unwrap_err();

        assert!(matches!(err, MotionError::CommandFailed { .. }));
        assert!(!group.is_targeting());
        assert_eq!(a.stop_count(), 1);
        assert_eq!(bad.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_child_command_failure_goes_to_group() {
        let (a, b) = (MockAxis::new("a"), MockAxis::new("b"));
        let group = group(&[&a, &b]);
        let children = group.core().children();

        children[0].at_level_move_start().await.unwrap();
        children[0].at_command_failure().await.unwrap();

        assert!(!group.is_targeting());
        assert_eq!(a.stop_count(), 1);
        assert_eq!(b.stop_count(), 1);
        assert_eq!(a.command_failure_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_move_names_inputs() {
        let a = MockAxis::builder("a").limits(None, Some(5.0)).build();
        let b = MockAxis::new("b");
        let group = group(&[&a, &b]);

        let err = group
            .move_to(Position::from(vec![Some(6.0), None]))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Did not move cg to a = 6, because:\n\
             Scannable limit violation on a: 6 > 5 (internal/hardware/dial values)."
        );
        assert_eq!(a.move_count(), 0);
    }

    #[tokio::test]
    async fn test_additional_validators_use_internal_values() {
        let theta = MockAxis::builder("theta")
            .scaling_factor(Some(2.0))
            .initial_position(vec![1.0])
            .build();
        let phi = MockAxis::new("phi");
        let group = group(&[&theta, &phi]);
        group
            .core()
            .add_position_validator("interlock", Arc::new(ThresholdInterlock::default()));

        // theta external 8.0 is internal 4.0: allowed
        assert_eq!(
            group
                .check_position_valid(&Position::from(vec![8.0, 12.0]))
                .await
                .unwrap(),
            None
        );
        // theta missing: current external 1.0 is internal 0.5
        let reason = group
            .check_position_valid(&Position::from(vec![None, Some(12.0)]))
            .await
            .unwrap();
        assert_eq!(
            reason.as_deref(),
            Some("theta = 0.5 is below 3 while phi = 12 is above 10")
        );
        assert!(matches!(
            group.move_to(Position::from(vec![None, Some(12.0)])).await,
            Err(MotionError::MoveRejected { .. })
        ));
        assert_eq!(phi.move_count(), 0);
    }

    #[tokio::test]
    async fn test_validator_replaced_in_place() {
        let group = group(&[&MockAxis::new("theta"), &MockAxis::new("phi")]);
        group
            .core()
            .add_position_validator("first", Arc::new(ThresholdInterlock::default()));
        group
            .core()
            .add_position_validator("second", Arc::new(ThresholdInterlock::default()));
        group.core().add_position_validator(
            "first",
            Arc::new(ThresholdInterlock {
                protection_threshold: 1.0,
                ..ThresholdInterlock::default()
            }),
        );

        let validators = group.core().position_validators();
        let names: Vec<&str> = validators.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);

        let description = group.core().describe().await;
        assert!(description.starts_with("cg :: (collision avoidance rules)\n* theta must not be below 1"));
        assert!(description.ends_with("cg : [0, 0]"));
    }

    #[tokio::test]
    async fn test_validators_need_one_field_per_member() {
        let table = MockAxis::builder("table").input_names(["tx", "ty"]).build();
        let group = group(&[&table]);
        group
            .core()
            .add_position_validator("interlock", Arc::new(ThresholdInterlock::default()));

        assert!(matches!(
            group.check_position_valid(&Position::from(vec![1.0, 2.0])).await,
            Err(MotionError::InvalidFieldCount { expected: 1, actual: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_membership_changes_refused_while_targeting() {
        let a = MockAxis::new("a");
        let group = group(&[&a]);
        group.core().children()[0]
            .at_level_move_start()
            .await
            .unwrap();

        assert!(matches!(
            group.core().add_member(Arc::new(MockAxis::new("b"))),
            Err(MotionError::GroupBusy { .. })
        ));

        group.core().coordination().reset_state();
        group.core().add_member(Arc::new(MockAxis::new("b"))).unwrap();
        assert_eq!(group.input_names(), vec!["a", "b"]);

        let removed = group.core().remove_member("a").unwrap();
        assert_eq!(removed.name(), "a");
        assert_eq!(group.core().children().len(), 1);
    }

    #[test]
    fn test_wrappers_keep_capability_level() {
        let plain = MockAxis::builder("plain")
            .capability(CapabilityLevel::Plain)
            .build();
        let motion = MockAxis::builder("motion")
            .capability(CapabilityLevel::Motion)
            .build();
        let units = MockAxis::new("units");
        let group = group(&[&plain, &motion, &units]);

        let levels: Vec<CapabilityLevel> = group
            .core()
            .children()
            .iter()
            .map(|c| c.capability())
            .collect();
        assert_eq!(
            levels,
            vec![
                CapabilityLevel::Plain,
                CapabilityLevel::Motion,
                CapabilityLevel::MotionWithUnits
            ]
        );
        let children = group.core().children();
        assert!(children[0].as_motion().is_none());
        assert_eq!(
            children[2].as_motion_units().map(|u| u.user_units()),
            Some("mm".to_string())
        );
    }

    #[tokio::test]
    async fn test_detached_child() {
        let a = MockAxis::new("a");
        let group = group(&[&a]);
        let child = group.core().children()[0].clone();
        drop(group);

        assert!(matches!(
            child.is_busy().await,
            Err(MotionError::Detached(_))
        ));
    }
}
