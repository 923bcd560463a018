//! Coupled-axis group with a two-axis interlock.
//!
//! The first two members form a coupled pair guarded by a
//! [`ThresholdInterlock`]. A move is rejected before anything moves if the
//! pair's targets violate the interlock. Otherwise the pair is driven one axis
//! after the other on a background task, while the remaining members are
//! dispatched straight away.
//!
//! ```text
//! move_to([theta, phi, z, ...])
//!   ├─ interlock(theta, phi)? ── violated ──► Err(Interlock), nothing moves
//!   ├─ spawn: theta ─► wait ─► phi ─► wait ─► done
//!   └─ z, ... dispatched immediately
//! ```
//!
//! The group stays busy until the background task has finished.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::capabilities::{poll_until_idle, Scannable};
use scan_core::error::{MotionError, Result};
use scan_core::position::Position;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::GroupSettings;
use crate::group::{split_position, stop_members, ScannableGroup};
use crate::validators::{PositionValidator, ThresholdInterlock};

/// Group whose first two members move sequentially behind an interlock.
///
/// Interlock indices refer to positions within the coupled pair, so the
/// default interlock protects member 0 against member 1.
pub struct CoupledAxisScannableGroup {
    group: ScannableGroup,
    interlock: ThresholdInterlock,
    task: Mutex<Option<SequentialMove>>,
}

/// Background task driving the coupled pair.
///
/// Each task owns its `running` flag. Only the stored task's flag counts.
struct SequentialMove {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl CoupledAxisScannableGroup {
    /// Coupled group with default settings.
    pub fn new(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        interlock: ThresholdInterlock,
    ) -> Self {
        Self::with_settings(name, members, interlock, GroupSettings::default())
    }

    /// Coupled group with explicit settings.
    pub fn with_settings(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        interlock: ThresholdInterlock,
        settings: GroupSettings,
    ) -> Self {
        Self {
            group: ScannableGroup::with_settings(name, members, settings),
            interlock,
            task: Mutex::new(None),
        }
    }

    /// The pair rule checked before every move.
    pub fn interlock(&self) -> &ThresholdInterlock {
        &self.interlock
    }

    /// The underlying plain group, for membership edits.
    pub fn group(&self) -> &ScannableGroup {
        &self.group
    }

    /// True while the coupled pair is still being driven.
    pub fn is_moving_sequentially(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| task.running.load(Ordering::SeqCst))
    }

    /// Abort the pair task, if any, and forget it.
    fn abandon_sequential(&self) {
        if let Some(task) = self.task.lock().take() {
            task.handle.abort();
        }
    }

    fn check_layout(&self, members: &[Arc<dyn Scannable>]) -> Result<()> {
        let pair_ok = members.len() >= 2
            && members[..2].iter().all(|m| m.input_names().len() == 1);
        if !pair_ok {
            return Err(MotionError::Configuration(format!(
                "{} needs at least two members and its first two must have one input each",
                self.group.name()
            )));
        }
        Ok(())
    }

    /// Requested value, or the member's current position when not requested.
    async fn target_or_current(member: &dyn Scannable, part: Option<&Position>) -> Result<f64> {
        let value = match part {
            Some(target) => target.as_f64()?,
            None => member.position().await?.as_f64()?,
        };
        value.ok_or_else(|| {
            MotionError::InvalidPosition(format!("{} has no current position", member.name()))
        })
    }

    /// Interlock verdict for the pair targets in `parts`.
    async fn check_interlock(
        &self,
        members: &[Arc<dyn Scannable>],
        parts: &[Option<Position>],
    ) -> Result<Option<String>> {
        let first = Self::target_or_current(members[0].as_ref(), parts[0].as_ref()).await?;
        let second = Self::target_or_current(members[1].as_ref(), parts[1].as_ref()).await?;
        Ok(self.interlock.check_internal_position(&[first, second]))
    }

    fn spawn_sequential(
        &self,
        members: Vec<Arc<dyn Scannable>>,
        pair: Vec<(Arc<dyn Scannable>, Position)>,
    ) {
        let name = self.group.name().to_string();
        let policy = self.group.settings().stop_policy;
        let interval = self.group.settings().poll_interval();
        let running = Arc::new(AtomicBool::new(true));
        let sequential = running.clone();

        let handle = tokio::spawn(async move {
            for (member, target) in pair {
                debug!("{}: moving {} to {}", name, member.name(), target);
                let moved = match member.move_to(target.clone()).await {
                    Ok(()) => poll_until_idle(member.as_ref(), interval).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = moved {
                    error!(
                        "{}: sequential move of {} to {} failed, stopping group: {}",
                        name,
                        member.name(),
                        target,
                        err
                    );
                    if let Err(stop_err) = stop_members(&name, &members, policy).await {
                        warn!("{}: {}", name, stop_err);
                    }
                    break;
                }
            }
            sequential.store(false, Ordering::SeqCst);
        });
        *self.task.lock() = Some(SequentialMove { handle, running });
    }
}

#[async_trait]
impl Scannable for CoupledAxisScannableGroup {
    fn name(&self) -> &str {
        self.group.name()
    }

    fn input_names(&self) -> Vec<String> {
        self.group.input_names()
    }

    fn extra_names(&self) -> Vec<String> {
        self.group.extra_names()
    }

    fn output_format(&self) -> Vec<String> {
        self.group.output_format()
    }

    async fn move_to(&self, position: Position) -> Result<()> {
        let _token = self.group.try_acquire_motion()?;
        let members = self.group.members();
        self.check_layout(&members)?;
        let parts = split_position(&members, &position)?;

        if let Some(rule) = self.check_interlock(&members, &parts).await? {
            error!("{}: interlock rejected move to {}: {}", self.name(), position, rule);
            return Err(MotionError::Interlock {
                scannable: self.name().to_string(),
                rule,
            });
        }
        if self.is_moving_sequentially() {
            return Err(MotionError::GroupBusy {
                group: self.name().to_string(),
            });
        }

        let mut parts = parts.into_iter();
        let pair: Vec<(Arc<dyn Scannable>, Position)> = members[..2]
            .iter()
            .cloned()
            .zip(parts.by_ref().take(2))
            .filter_map(|(member, part)| part.map(|target| (member, target)))
            .collect();
        self.spawn_sequential(members.clone(), pair);

        for (member, part) in members[2..].iter().zip(parts) {
            let Some(target) = part else { continue };
            debug!("{}: moving {} to {}", self.name(), member.name(), target);
            if let Err(err) = member.move_to(target).await {
                error!(
                    "{}: {} failed to move, stopping group: {}",
                    self.name(),
                    member.name(),
                    err
                );
                if let Err(stop_err) = self.stop().await {
                    warn!("{}: {}", self.name(), stop_err);
                }
                return Err(MotionError::command_failed(self.name(), &position, err));
            }
        }
        info!("{}: dispatched move to {}", self.name(), position);
        Ok(())
    }

    async fn position(&self) -> Result<Position> {
        self.group.position().await
    }

    /// Busy while the pair task runs or any of the other members is busy.
    async fn is_busy(&self) -> Result<bool> {
        if self.is_moving_sequentially() {
            return Ok(true);
        }
        for member in self.group.members().iter().skip(2) {
            if member.is_busy().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn stop(&self) -> Result<()> {
        self.abandon_sequential();
        self.group.stop().await
    }

    async fn check_position_valid(&self, position: &Position) -> Result<Option<String>> {
        if let Some(reason) = self.group.check_position_valid(position).await? {
            return Ok(Some(reason));
        }
        let members = self.group.members();
        self.check_layout(&members)?;
        let parts = split_position(&members, position)?;
        self.check_interlock(&members, &parts).await
    }

    async fn wait_while_busy(&self) -> Result<()> {
        poll_until_idle(self, self.group.settings().poll_interval()).await
    }

    async fn configure(&self) -> Result<()> {
        self.check_layout(&self.group.members())?;
        self.group.configure().await
    }

    async fn at_level_move_start(&self) -> Result<()> {
        self.group.at_level_move_start().await
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.stop().await
    }
}
