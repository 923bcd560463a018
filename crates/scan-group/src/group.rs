//! Scannable groups.
//!
//! A [`ScannableGroup`] presents an ordered list of members as one scannable
//! whose position is the concatenation of theirs:
//!
//! ```text
//! members:   x [x]        table [tx, ty | temp]      z [z]
//! move:      [ x,           tx, ty,                   z ]
//! readback:  [ x,           tx, ty,                   z,    temp ]
//! ```
//!
//! Inputs of every member come first, in member order, followed by the extras
//! of every member. The field layout is recomputed from the current members
//! on every call, so membership edits take effect immediately.
//!
//! Moves are dispatched member by member and are not rolled back: if member K
//! fails, members before it keep moving. [`ScannableGroup::dispatch`] returns
//! a [`DispatchReport`] describing what happened to every member.

use async_trait::async_trait;
use parking_lot::RwLock;
use scan_core::capabilities::{poll_until_idle, Scannable};
use scan_core::error::{MotionError, Result};
use scan_core::position::{Position, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::{GroupSettings, StopPolicy};

// =============================================================================
// Dispatch Reports
// =============================================================================

/// What happened to one member during a group move.
#[derive(Debug)]
pub enum MemberOutcome {
    /// The member was told to move to this position.
    Dispatched(Position),
    /// No change was requested for this member.
    Skipped,
    /// The member's `move_to` failed.
    Failed(MotionError),
    /// An earlier member failed, so this one was never asked.
    NotAttempted,
}

/// Ordered per-member outcomes of one group move.
#[derive(Debug, Default)]
pub struct DispatchReport {
    outcomes: Vec<(String, MemberOutcome)>,
}

impl DispatchReport {
    /// `(member name, outcome)` in member order.
    pub fn outcomes(&self) -> &[(String, MemberOutcome)] {
        &self.outcomes
    }

    /// Names of members that were told to move.
    pub fn dispatched(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, MemberOutcome::Dispatched(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The member that failed and its error, if any.
    pub fn failure(&self) -> Option<(&str, &MotionError)> {
        self.outcomes.iter().find_map(|(name, outcome)| match outcome {
            MemberOutcome::Failed(err) => Some((name.as_str(), err)),
            _ => None,
        })
    }

    /// True if no member failed.
    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// The failing member's error, if any.
    pub fn into_result(self) -> Result<()> {
        for (_, outcome) in self.outcomes {
            if let MemberOutcome::Failed(err) = outcome {
                return Err(err);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Position Decomposition
// =============================================================================

/// Split a group position into one sub-position per member.
///
/// Members without inputs get `None`. A single-input member gets a scalar, or
/// `None` if its field is missing. A multi-input member gets an array, or
/// `None` if every one of its fields is missing.
pub fn split_position(
    members: &[Arc<dyn Scannable>],
    position: &Position,
) -> Result<Vec<Option<Position>>> {
    let fields = position.fields();
    let counts: Vec<usize> = members.iter().map(|m| m.input_names().len()).collect();
    let expected: usize = counts.iter().sum();
    if fields.len() != expected {
        return Err(MotionError::InvalidFieldCount {
            expected,
            actual: fields.len(),
            position: position.to_string(),
        });
    }

    let mut parts = Vec::with_capacity(members.len());
    let mut offset = 0;
    for count in counts {
        let slice = &fields[offset..offset + count];
        offset += count;
        let part = match slice {
            [] => None,
            [single] => single.clone().map(Position::Scalar),
            many if many.iter().all(Option::is_none) => None,
            many => Some(Position::Array(many.to_vec())),
        };
        parts.push(part);
    }
    Ok(parts)
}

/// Read every member and concatenate inputs, then extras.
///
/// A member whose readback fails contributes its formatted string in its
/// first slot and `None` elsewhere.
pub async fn combined_position(group: &str, members: &[Arc<dyn Scannable>]) -> Position {
    let mut inputs = Vec::new();
    let mut extras = Vec::new();
    for member in members {
        let n_inputs = member.input_names().len();
        let n_extras = member.extra_names().len();
        let mut fields = match member.position().await {
            Ok(position) => position.fields(),
            Err(err) => {
                warn!(
                    "{}: could not read {}, reporting its formatted string: {}",
                    group,
                    member.name(),
                    err
                );
                let mut fallback = vec![None; n_inputs + n_extras];
                if let Some(first) = fallback.first_mut() {
                    *first = Some(Value::Text(member.to_formatted_string().await));
                }
                fallback
            }
        };
        fields.resize(n_inputs + n_extras, None);
        let member_extras = fields.split_off(n_inputs);
        inputs.extend(fields);
        extras.extend(member_extras);
    }
    inputs.extend(extras);
    Position::Array(inputs)
}

/// Stop every member according to `policy`.
pub async fn stop_members(
    group: &str,
    members: &[Arc<dyn Scannable>],
    policy: StopPolicy,
) -> Result<()> {
    let mut failures = Vec::new();
    for member in members {
        if let Err(err) = member.stop().await {
            match policy {
                StopPolicy::FailFast => return Err(err),
                StopPolicy::BestEffort => {
                    warn!("{}: failed to stop {}: {}", group, member.name(), err);
                    failures.push(format!("{}: {}", member.name(), err));
                }
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(MotionError::StopFailed {
            scannable: group.to_string(),
            failures,
        })
    }
}

// =============================================================================
// ScannableGroup
// =============================================================================

/// An ordered group of scannables moved as one.
///
/// Holds one motion token: `move_to` fails with [`MotionError::GroupBusy`]
/// while another `move_to` on the same group is dispatching, and membership
/// can only change while the token is free.
pub struct ScannableGroup {
    name: String,
    members: RwLock<Vec<Arc<dyn Scannable>>>,
    motion: Mutex<()>,
    settings: GroupSettings,
}

impl ScannableGroup {
    /// Group with default settings.
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Scannable>>) -> Self {
        Self::with_settings(name, members, GroupSettings::default())
    }

    /// Group with explicit settings.
    pub fn with_settings(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        settings: GroupSettings,
    ) -> Self {
        Self {
            name: name.into(),
            members: RwLock::new(members),
            motion: Mutex::new(()),
            settings,
        }
    }

    /// Settings for polling and stopping.
    pub fn settings(&self) -> &GroupSettings {
        &self.settings
    }

    /// Snapshot of the current members, in order.
    pub fn members(&self) -> Vec<Arc<dyn Scannable>> {
        self.members.read().clone()
    }

    /// Member called `name`.
    pub fn member(&self, name: &str) -> Option<Arc<dyn Scannable>> {
        self.members.read().iter().find(|m| m.name() == name).cloned()
    }

    /// Replace the members. Refused while a move is in flight.
    pub fn set_members(&self, members: Vec<Arc<dyn Scannable>>) -> Result<()> {
        let _idle = self.try_acquire_motion()?;
        *self.members.write() = members;
        Ok(())
    }

    /// Append a member. Refused while a move is in flight.
    pub fn add_member(&self, member: Arc<dyn Scannable>) -> Result<()> {
        let _idle = self.try_acquire_motion()?;
        self.members.write().push(member);
        Ok(())
    }

    /// Remove the member called `name` and return it.
    pub fn remove_member(&self, name: &str) -> Result<Arc<dyn Scannable>> {
        let _idle = self.try_acquire_motion()?;
        let mut members = self.members.write();
        let index = members
            .iter()
            .position(|m| m.name() == name)
            .ok_or_else(|| {
                MotionError::Configuration(format!("{} has no member called {}", self.name, name))
            })?;
        Ok(members.remove(index))
    }

    /// Take the motion token, or fail if a move holds it.
    pub(crate) fn try_acquire_motion(&self) -> Result<MutexGuard<'_, ()>> {
        self.motion.try_lock().map_err(|_| MotionError::GroupBusy {
            group: self.name.clone(),
        })
    }

    /// Split `position` and tell each member to move, in member order.
    ///
    /// Fails with `InvalidFieldCount` before touching any member if the
    /// position has the wrong length. Stops at the first member that fails;
    /// the report records the failure and which members were never asked.
    /// Does not take the motion token.
    pub async fn dispatch(&self, position: &Position) -> Result<DispatchReport> {
        let members = self.members();
        let parts = split_position(&members, position)?;

        let mut report = DispatchReport::default();
        let mut failed = false;
        for (member, part) in members.iter().zip(parts) {
            let outcome = match part {
                _ if failed => MemberOutcome::NotAttempted,
                None => MemberOutcome::Skipped,
                Some(target) => {
                    debug!("{}: moving {} to {}", self.name, member.name(), target);
                    match member.move_to(target.clone()).await {
                        Ok(()) => MemberOutcome::Dispatched(target),
                        Err(err) => {
                            failed = true;
                            MemberOutcome::Failed(err)
                        }
                    }
                }
            };
            report.outcomes.push((member.name().to_string(), outcome));
        }
        Ok(report)
    }

    /// `move_to` without taking the motion token.
    pub(crate) async fn move_unlocked(&self, position: &Position) -> Result<()> {
        self.dispatch(position)
            .await?
            .into_result()
            .map_err(|err| MotionError::command_failed(&self.name, position, err))
    }
}

#[async_trait]
impl Scannable for ScannableGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_names(&self) -> Vec<String> {
        self.members().iter().flat_map(|m| m.input_names()).collect()
    }

    fn extra_names(&self) -> Vec<String> {
        self.members().iter().flat_map(|m| m.extra_names()).collect()
    }

    fn output_format(&self) -> Vec<String> {
        let mut inputs = Vec::new();
        let mut extras = Vec::new();
        for member in self.members() {
            let mut formats = member.output_format();
            let split = member.input_names().len().min(formats.len());
            extras.extend(formats.split_off(split));
            inputs.extend(formats);
        }
        inputs.extend(extras);
        inputs
    }

    async fn move_to(&self, position: Position) -> Result<()> {
        let _token = self.try_acquire_motion()?;
        self.move_unlocked(&position).await
    }

    async fn position(&self) -> Result<Position> {
        Ok(combined_position(&self.name, &self.members()).await)
    }

    async fn is_busy(&self) -> Result<bool> {
        for member in self.members() {
            if member.is_busy().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn stop(&self) -> Result<()> {
        stop_members(&self.name, &self.members(), self.settings.stop_policy).await
    }

    async fn check_position_valid(&self, position: &Position) -> Result<Option<String>> {
        let members = self.members();
        let parts = split_position(&members, position)?;
        for (member, part) in members.iter().zip(parts) {
            let Some(target) = part else { continue };
            if let Some(reason) = member.check_position_valid(&target).await? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    async fn wait_while_busy(&self) -> Result<()> {
        poll_until_idle(self, self.settings.poll_interval()).await
    }

    async fn configure(&self) -> Result<()> {
        for member in self.members() {
            member.configure().await?;
        }
        Ok(())
    }

    async fn at_level_move_start(&self) -> Result<()> {
        for member in self.members() {
            member.at_level_move_start().await?;
        }
        Ok(())
    }

    async fn at_command_failure(&self) -> Result<()> {
        for member in self.members() {
            member.at_command_failure().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_driver_mock::{ErrorConfig, ErrorScenario, MockAxis};

    fn axes() -> (MockAxis, MockAxis, MockAxis) {
        let x = MockAxis::new("x");
        let table = MockAxis::builder("table")
            .input_names(["tx", "ty"])
            .extra_names(["temp"])
            .extra_values(vec![21.0])
            .build();
        let z = MockAxis::new("z");
        (x, table, z)
    }

    fn group_of(members: &[&MockAxis]) -> ScannableGroup {
        ScannableGroup::new(
            "g",
            members
                .iter()
                .map(|m| Arc::new((*m).clone()) as Arc<dyn Scannable>)
                .collect(),
        )
    }

    #[test]
    fn test_field_names_follow_members() {
        let (x, table, z) = axes();
        let group = group_of(&[&x, &table, &z]);

        assert_eq!(group.input_names(), vec!["x", "tx", "ty", "z"]);
        assert_eq!(group.extra_names(), vec!["temp"]);
        assert_eq!(group.output_format().len(), 5);

        group.remove_member("table").unwrap();
        assert_eq!(group.input_names(), vec!["x", "z"]);
        assert!(group.extra_names().is_empty());
    }

    #[tokio::test]
    async fn test_split_unwraps_single_inputs() {
        let (x, table, z) = axes();
        let group = group_of(&[&x, &table, &z]);

        group
            .move_to(Position::from(vec![Some(1.0), None, Some(3.0), None]))
            .await
            .unwrap();

        assert_eq!(x.last_move(), Some(Position::scalar(1.0)));
        assert_eq!(
            table.last_move(),
            Some(Position::from(vec![None, Some(3.0)]))
        );
        assert_eq!(z.move_count(), 0);
    }

    #[tokio::test]
    async fn test_fully_unset_member_is_skipped() {
        let (x, table, z) = axes();
        let group = group_of(&[&x, &table, &z]);

        let report = group
            .dispatch(&Position::from(vec![Some(1.0), None, None, Some(2.0)]))
            .await
            .unwrap();

        assert_eq!(report.dispatched(), vec!["x", "z"]);
        assert!(matches!(report.outcomes()[1].1, MemberOutcome::Skipped));
        assert_eq!(table.move_count(), 0);
    }

    #[tokio::test]
    async fn test_member_without_inputs_takes_no_slots() {
        let x = MockAxis::builder("x").initial_position(vec![1.0]).build();
        let thermometer = MockAxis::builder("thermometer")
            .input_names(Vec::<String>::new())
            .extra_names(["temp"])
            .extra_values(vec![19.5])
            .build();
        let marker = MockAxis::builder("marker")
            .input_names(Vec::<String>::new())
            .build();
        let z = MockAxis::builder("z").initial_position(vec![4.0]).build();
        let group = group_of(&[&x, &thermometer, &marker, &z]);

        assert_eq!(group.input_names(), vec!["x", "z"]);
        assert_eq!(group.extra_names(), vec!["temp"]);

        group
            .move_to(Position::from(vec![2.0, 3.0]))
            .await
            .unwrap();

        assert_eq!(x.moves(), vec![Position::scalar(2.0)]);
        assert_eq!(z.moves(), vec![Position::scalar(3.0)]);
        assert_eq!(thermometer.move_count() + marker.move_count(), 0);
        assert_eq!(
            group.position().await.unwrap(),
            Position::from(vec![2.0, 3.0, 19.5])
        );
    }

    #[tokio::test]
    async fn test_readback_puts_inputs_before_extras() {
        let (x, table, z) = axes();
        x.set_inputs(vec![1.0]);
        table.set_inputs(vec![2.0, 3.0]);
        z.set_inputs(vec![4.0]);
        let group = group_of(&[&x, &table, &z]);

        assert_eq!(
            group.position().await.unwrap(),
            Position::from(vec![1.0, 2.0, 3.0, 4.0, 21.0])
        );
    }

    #[tokio::test]
    async fn test_unreadable_member_falls_back_to_text() {
        let x = MockAxis::new("x");
        let broken = MockAxis::builder("broken")
            .error_config(ErrorConfig::scenario(ErrorScenario::Fail {
                operation: "position",
            }))
            .build();
        let group = group_of(&[&x, &broken]);

        let position = group.position().await.unwrap();
        assert_eq!(
            position,
            Position::Array(vec![
                Some(Value::Number(0.0)),
                Some(Value::Text("broken : UNAVAILABLE".to_string())),
            ])
        );
    }

    #[tokio::test]
    async fn test_failure_stops_dispatch() {
        let x = MockAxis::new("x");
        let bad = MockAxis::builder("bad")
            .error_config(ErrorConfig::scenario(ErrorScenario::Fail { operation: "move" }))
            .build();
        let z = MockAxis::new("z");
        let group = group_of(&[&x, &bad, &z]);

        let position = Position::from(vec![1.0, 2.0, 3.0]);
        let report = group.dispatch(&position).await.unwrap();
        assert_eq!(report.failure().map(|(name, _)| name), Some("bad"));
        assert!(matches!(report.outcomes()[2].1, MemberOutcome::NotAttempted));

        let err = group.move_to(position).await.unwrap_err();
        assert!(matches!(err, MotionError::CommandFailed { ref scannable, .. } if scannable == "g"));
        // No rollback of the member that already moved
        assert_eq!(x.move_count(), 2);
        assert_eq!(z.move_count(), 0);
    }

    #[tokio::test]
    async fn test_check_position_valid_returns_first_rejection() {
        let x = MockAxis::builder("x").limits(None, Some(1.0)).build();
        let z = MockAxis::builder("z").limits(None, Some(1.0)).build();
        let group = group_of(&[&x, &z]);

        assert_eq!(
            group
                .check_position_valid(&Position::from(vec![0.5, 0.5]))
                .await
                .unwrap(),
            None
        );
        let reason = group
            .check_position_valid(&Position::from(vec![5.0, 6.0]))
            .await
            .unwrap()
            .unwrap();
        assert!(reason.contains("on x"));
    }

    #[tokio::test]
    async fn test_best_effort_stop_reaches_every_member() {
        let x = MockAxis::builder("x")
            .error_config(ErrorConfig::scenario(ErrorScenario::Fail { operation: "stop" }))
            .build();
        let z = MockAxis::new("z");
        let group = group_of(&[&x, &z]);

        let err = group.stop().await.unwrap_err();
        assert!(matches!(err, MotionError::StopFailed { ref failures, .. } if failures.len() == 1));
        assert_eq!(z.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_stop_aborts_at_first_error() {
        let x = MockAxis::builder("x")
            .error_config(ErrorConfig::scenario(ErrorScenario::Fail { operation: "stop" }))
            .build();
        let z = MockAxis::new("z");
        let group = ScannableGroup::with_settings(
            "g",
            vec![Arc::new(x.clone()), Arc::new(z.clone())],
            GroupSettings {
                stop_policy: StopPolicy::FailFast,
                ..GroupSettings::default()
            },
        );

        assert!(matches!(
            group.stop().await,
            Err(MotionError::Device(_))
        ));
        assert_eq!(z.stop_count(), 0);
    }

    #[tokio::test]
    async fn test_membership_locked_while_moving() {
        let (x, _, z) = axes();
        let group = group_of(&[&x]);

        let token = group.try_acquire_motion().unwrap();
        assert!(matches!(
            group.add_member(Arc::new(z.clone())),
            Err(MotionError::GroupBusy { .. })
        ));
        assert!(matches!(
            group.move_to(Position::scalar(1.0)).await,
            Err(MotionError::GroupBusy { .. })
        ));
        drop(token);

        group.add_member(Arc::new(z)).unwrap();
        assert_eq!(group.input_names(), vec!["x", "z"]);
    }

    #[tokio::test]
    async fn test_hooks_relay_to_members() {
        let (x, table, _) = axes();
        let group = group_of(&[&x, &table]);

        group.configure().await.unwrap();
        group.at_level_move_start().await.unwrap();
        group.at_command_failure().await.unwrap();

        for axis in [&x, &table] {
            assert_eq!(axis.configure_count(), 1);
            assert_eq!(axis.level_move_start_count(), 1);
            assert_eq!(axis.command_failure_count(), 1);
        }
    }
}
