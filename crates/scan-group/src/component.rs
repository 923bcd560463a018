//! Targeting state machine for coordinated moves.
//!
//! A scan engine moves the members of a coordinated group one at a time. The
//! component collects those per-member requests and releases them as a single
//! combined move once every registered member has supplied a target:
//!
//! ```text
//!            add_child_to_move            set_child_target (last slot)
//!   Idle ─────────────────────► Targeting ──────────────────────────► Idle
//!     ▲                           │   ▲                       (Complete: fire move)
//!     │        reset_state        │   │ add_child_to_move /
//!     └───────────────────────────┘   └─ set_child_target (slots left)
//! ```

use parking_lot::Mutex;
use scan_core::error::{MotionError, Result};
use scan_core::position::Position;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHILD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one wrapped member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildId(u64);

impl ChildId {
    pub(crate) fn next() -> Self {
        ChildId(NEXT_CHILD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One member slot of the combined target vector.
#[derive(Debug, Clone, Copy)]
pub struct ChildSlot {
    /// The member this slot belongs to.
    pub id: ChildId,
    /// Number of input fields the member contributes.
    pub inputs: usize,
}

/// Coordination state. The map only exists while targeting.
#[derive(Debug, Default)]
pub enum TargetingState {
    /// Not collecting targets.
    #[default]
    Idle,
    /// Registered members and their targets, `None` until supplied.
    Targeting(HashMap<ChildId, Option<Vec<Option<f64>>>>),
}

/// Result of supplying one member's target.
#[derive(Debug, PartialEq)]
pub enum TargetOutcome {
    /// Other registered members have not supplied targets yet.
    Pending,
    /// Every registered member has a target. The component is Idle again and
    /// the caller must issue this combined move.
    Complete(Vec<Option<f64>>),
}

/// Collects member targets and assembles the combined move.
#[derive(Debug, Default)]
pub struct CoordinatedParentComponent {
    state: Mutex<TargetingState>,
    slots: Mutex<Vec<ChildSlot>>,
}

impl CoordinatedParentComponent {
    /// Idle component with no members.
    pub fn new() -> Self {
        Self::default()
    }

    /// Members in the order their fields appear in the combined vector.
    pub fn set_members(&self, slots: Vec<ChildSlot>) {
        *self.slots.lock() = slots;
    }

    /// True between the first registration and the combined move.
    pub fn is_targeting(&self) -> bool {
        matches!(*self.state.lock(), TargetingState::Targeting(_))
    }

    /// Register intent to move `child`, entering Targeting if Idle.
    pub fn add_child_to_move(&self, child: ChildId) {
        let mut state = self.state.lock();
        match &mut *state {
            TargetingState::Idle => {
                let mut targets = HashMap::new();
                targets.insert(child, None);
                *state = TargetingState::Targeting(targets);
            }
            TargetingState::Targeting(targets) => {
                targets.insert(child, None);
            }
        }
    }

    /// Supply the target of a registered member.
    ///
    /// The member must be registered and not yet have a target, and the
    /// position must carry at least one value. When this fills the last slot
    /// the component returns to Idle and hands back the combined vector:
    /// input members in member order, `None` for members never registered.
    pub fn set_child_target(&self, child: ChildId, position: Position) -> Result<TargetOutcome> {
        let slots = self.slots.lock().clone();
        let inputs = slots
            .iter()
            .find(|slot| slot.id == child)
            .map(|slot| slot.inputs)
            .ok_or_else(|| MotionError::Targeting("target from a non-member".to_string()))?;

        if position.is_unset() {
            return Err(MotionError::Targeting(format!(
                "target {} carries no value",
                position
            )));
        }
        let values = position.to_f64_vec()?;
        if values.len() != inputs {
            return Err(MotionError::InvalidFieldCount {
                expected: inputs,
                actual: values.len(),
                position: position.to_string(),
            });
        }

        let mut state = self.state.lock();
        let TargetingState::Targeting(targets) = &mut *state else {
            return Err(MotionError::Targeting(
                "target supplied while not targeting".to_string(),
            ));
        };
        match targets.get_mut(&child) {
            None => {
                return Err(MotionError::Targeting(
                    "target supplied for a member that was not registered to move".to_string(),
                ))
            }
            Some(Some(_)) => {
                return Err(MotionError::Targeting(
                    "target supplied twice for the same member".to_string(),
                ))
            }
            Some(slot) => *slot = Some(values),
        }

        if targets.values().any(Option::is_none) {
            return Ok(TargetOutcome::Pending);
        }

        let mut combined = Vec::new();
        for slot in slots.iter().filter(|slot| slot.inputs > 0) {
            match targets.get(&slot.id).cloned().flatten() {
                Some(values) => combined.extend(values),
                None => combined.extend(std::iter::repeat(None).take(slot.inputs)),
            }
        }
        *state = TargetingState::Idle;
        Ok(TargetOutcome::Complete(combined))
    }

    /// Abandon any targeting in progress.
    pub fn reset_state(&self) {
        *self.state.lock() = TargetingState::Idle;
    }

    /// Registered members still waiting for a target.
    pub fn pending_targets(&self) -> usize {
        match &*self.state.lock() {
            TargetingState::Idle => 0,
            TargetingState::Targeting(targets) => {
                targets.values().filter(|t| t.is_none()).count()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(inputs: &[usize]) -> (CoordinatedParentComponent, Vec<ChildId>) {
        let ids: Vec<ChildId> = inputs.iter().map(|_| ChildId::next()).collect();
        let component = CoordinatedParentComponent::new();
        component.set_members(
            ids.iter()
                .zip(inputs)
                .map(|(id, inputs)| ChildSlot {
                    id: *id,
                    inputs: *inputs,
                })
                .collect(),
        );
        (component, ids)
    }

    #[test]
    fn test_fires_once_all_targets_supplied() {
        let (component, ids) = component(&[1, 1, 1]);
        for id in &ids {
            component.add_child_to_move(*id);
        }
        assert!(component.is_targeting());

        // Supplied out of member order
        assert_eq!(
            component
                .set_child_target(ids[2], Position::scalar(3.0))
                .unwrap(),
            TargetOutcome::Pending
        );
        assert_eq!(
            component
                .set_child_target(ids[0], Position::scalar(1.0))
                .unwrap(),
            TargetOutcome::Pending
        );
        assert!(component.is_targeting());
        assert_eq!(component.pending_targets(), 1);

        let outcome = component
            .set_child_target(ids[1], Position::scalar(2.0))
            .unwrap();
        assert_eq!(
            outcome,
            TargetOutcome::Complete(vec![Some(1.0), Some(2.0), Some(3.0)])
        );
        assert!(!component.is_targeting());
    }

    #[test]
    fn test_unregistered_members_contribute_none() {
        let (component, ids) = component(&[1, 2, 1]);
        component.add_child_to_move(ids[0]);

        let outcome = component
            .set_child_target(ids[0], Position::scalar(5.0))
            .unwrap();
        assert_eq!(
            outcome,
            TargetOutcome::Complete(vec![Some(5.0), None, None, None])
        );
    }

    #[test]
    fn test_multi_input_member_is_flattened() {
        let (component, ids) = component(&[2, 0, 1]);
        component.add_child_to_move(ids[0]);
        component.add_child_to_move(ids[2]);

        component
            .set_child_target(ids[2], Position::scalar(9.0))
            .unwrap();
        let outcome = component
            .set_child_target(ids[0], Position::from(vec![Some(1.0), None]))
            .unwrap();
        assert_eq!(
            outcome,
            TargetOutcome::Complete(vec![Some(1.0), None, Some(9.0)])
        );
    }

    #[test]
    fn test_precondition_violations() {
        let (component, ids) = component(&[1, 1]);

        // Idle
        assert!(component
            .set_child_target(ids[0], Position::scalar(1.0))
            .is_err());

        component.add_child_to_move(ids[0]);
        component.add_child_to_move(ids[1]);

        // Unknown member
        assert!(component
            .set_child_target(ChildId::next(), Position::scalar(1.0))
            .is_err());
        // No value
        assert!(component
            .set_child_target(ids[0], Position::from(vec![None]))
            .is_err());

        component
            .set_child_target(ids[0], Position::scalar(1.0))
            .unwrap();
        // Twice
        assert!(matches!(
            component.set_child_target(ids[0], Position::scalar(2.0)),
            Err(MotionError::Targeting(_))
        ));
        assert!(component.is_targeting());
    }

    #[test]
    fn test_reset_discards_registrations() {
        let (component, ids) = component(&[1, 1]);
        component.add_child_to_move(ids[0]);
        component.add_child_to_move(ids[1]);

        component.reset_state();
        assert!(!component.is_targeting());
        assert_eq!(component.pending_targets(), 0);

        // After a reset the old registrations are gone
        component.add_child_to_move(ids[1]);
        assert_eq!(
            component
                .set_child_target(ids[1], Position::scalar(4.0))
                .unwrap(),
            TargetOutcome::Complete(vec![None, Some(4.0)])
        );
    }
}
