//! Deferred coordinated moves.
//!
//! Several independent drives can be made to start together by raising a
//! controller's "defer" register, commanding each drive, and lowering the
//! register again. [`DeferGate`] brackets a coordinated move that way:
//!
//! ```text
//! defer = 1 ─► move every member ─► defer = 0
//!                   │ error
//!                   └─► stop all members, leave targeting ─► defer = 0 ─► error
//! ```
//!
//! The register is lowered on every exit path.

use async_trait::async_trait;
use scan_core::capabilities::{ControlPoint, Scannable};
use scan_core::error::{MotionError, Result};
use scan_core::position::Position;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

use crate::config::GroupSettings;
use crate::coordinated::{CoordinatedCore, CoordinatedParent};

const DEFER_ON: i32 = 1;
const DEFER_OFF: i32 = 0;

/// Mirrors the defer flag onto a control point around coordinated moves.
pub struct DeferGate {
    defer: Arc<dyn ControlPoint>,
}

impl DeferGate {
    /// Gate over the given control point.
    pub fn new(defer: Arc<dyn ControlPoint>) -> Self {
        Self { defer }
    }

    /// Raise or clear the defer flag.
    pub async fn set(&self, on: bool) -> Result<()> {
        self.defer
            .set_value(if on { DEFER_ON } else { DEFER_OFF })
            .await
    }

    /// Run a validated coordinated move with the defer flag raised.
    ///
    /// On failure every member is stopped and targeting is abandoned. The
    /// flag is lowered afterwards in all cases; a failed move takes
    /// precedence over a failure to lower it. The caller holds the motion
    /// token.
    pub async fn move_deferred(&self, core: &CoordinatedCore, position: &Position) -> Result<()> {
        self.set(true).await?;
        debug!("{}: defer on", core.name());

        let moved = match core.move_validated(position).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(
                    "{}: deferred move to {} failed, stopping all members: {}",
                    core.name(),
                    position,
                    err
                );
                if let Err(stop_err) = core.stop_members().await {
                    warn!("{}: {}", core.name(), stop_err);
                }
                core.coordination().reset_state();
                Err(match err {
                    err @ MotionError::CommandFailed { .. } => err,
                    err if err.is_validation() => err,
                    err => MotionError::command_failed(core.name(), position, err),
                })
            }
        };

        let cleared = self.set(false).await;
        debug!("{}: defer off", core.name());
        match (moved, cleared) {
            (Err(err), Err(clear_err)) => {
                warn!("{}: could not clear defer flag: {}", core.name(), clear_err);
                Err(err)
            }
            (moved, cleared) => moved.and(cleared),
        }
    }

    /// Stop every member, then force the flag off.
    pub async fn stop(&self, core: &CoordinatedCore) -> Result<()> {
        let stopped = core.stop_members().await;
        let cleared = self.set(false).await;
        stopped.and(cleared)
    }
}

/// Coordinated group whose moves are bracketed by a defer flag.
pub struct DeferredScannableGroup {
    core: CoordinatedCore,
    gate: DeferGate,
}

impl DeferredScannableGroup {
    /// Deferred group with default settings.
    pub fn new(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        defer: Arc<dyn ControlPoint>,
    ) -> Arc<Self> {
        Self::with_settings(name, members, defer, GroupSettings::default())
    }

    /// Deferred group with explicit settings.
    pub fn with_settings(
        name: impl Into<String>,
        members: Vec<Arc<dyn Scannable>>,
        defer: Arc<dyn ControlPoint>,
        settings: GroupSettings,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let parent: Weak<dyn CoordinatedParent> = me.clone();
            Self {
                core: CoordinatedCore::new(name, members, settings, parent),
                gate: DeferGate::new(defer),
            }
        })
    }

    /// The defer flag wrapper.
    pub fn gate(&self) -> &DeferGate {
        &self.gate
    }
}

impl CoordinatedParent for DeferredScannableGroup {
    fn core(&self) -> &CoordinatedCore {
        &self.core
    }
}

#[async_trait]
impl Scannable for DeferredScannableGroup {
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
        self.gate.move_deferred(&self.core, &position).await
    }

    async fn position(&self) -> Result<Position> {
        self.core.position().await
    }

    async fn is_busy(&self) -> Result<bool> {
        self.core.is_busy().await
    }

    async fn stop(&self) -> Result<()> {
        self.gate.stop(&self.core).await
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

    /// Stops members and leaves targeting. The defer flag is left to the
    /// move's own cleanup.
    async fn at_command_failure(&self) -> Result<()> {
        self.core.at_command_failure().await
    }
}
