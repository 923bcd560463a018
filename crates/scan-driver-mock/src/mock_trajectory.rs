//! Mock streaming trajectory controller.
//!
//! Buffers points and reports "moving" while any are queued. In timed modes
//! each point takes `point_duration` to execute; in `Instant` mode the buffer
//! drains as soon as a point is added.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::capabilities::TrajectoryController;
use scan_core::error::{MotionError, Result};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::common::{ErrorConfig, MockMode};

#[derive(Debug, Default)]
struct TrajectoryState {
    points: Vec<Vec<Option<f64>>>,
    /// Points not yet executed
    pending: usize,
    /// Forced on by a test
    held_moving: bool,
    generation: u64,
    stop_resets: u32,
}

/// Simulated trajectory controller driving a fixed number of axes.
#[derive(Clone)]
pub struct MockTrajectoryController {
    name: String,
    number_axes: usize,
    mode: MockMode,
    point_duration: Duration,
    /// `stop_and_reset` reports `Interrupted` after resetting
    interrupt_on_stop: bool,
    poll_interval: Duration,
    error_config: ErrorConfig,
    state: Arc<Mutex<TrajectoryState>>,
}

impl MockTrajectoryController {
    /// Instant controller driving `number_axes` axes.
    pub fn new(name: impl Into<String>, number_axes: usize) -> Self {
        Self {
            name: name.into(),
            number_axes,
            mode: MockMode::Instant,
            point_duration: Duration::from_millis(20),
            interrupt_on_stop: false,
            poll_interval: Duration::from_millis(5),
            error_config: ErrorConfig::none(),
            state: Arc::new(Mutex::new(TrajectoryState::default())),
        }
    }

    /// Set the mode and, for Realistic, the execution time of each point.
    pub fn with_mode(mut self, mode: MockMode, point_duration: Duration) -> Self {
        self.mode = mode;
        self.point_duration = point_duration;
        self
    }

    /// Inject failures into controller operations.
    pub fn with_errors(mut self, error_config: ErrorConfig) -> Self {
        self.error_config = error_config;
        self
    }

    /// Make `stop_and_reset` report an interruption.
    pub fn interrupt_on_stop(mut self, interrupt: bool) -> Self {
        self.interrupt_on_stop = interrupt;
        self
    }

    /// Every point added since the last reset.
    pub fn points(&self) -> Vec<Vec<Option<f64>>> {
        self.state.lock().points.clone()
    }

    /// Number of `stop_and_reset` calls.
    pub fn stop_reset_count(&self) -> u32 {
        self.state.lock().stop_resets
    }

    /// Force `is_moving` on until released or reset.
    pub fn hold_moving(&self, moving: bool) {
        self.state.lock().held_moving = moving;
    }
}

#[async_trait]
impl TrajectoryController for MockTrajectoryController {
    async fn add_point(&self, point: Vec<Option<f64>>) -> Result<()> {
        self.error_config.check_operation(&self.name, "add_point")?;
        if point.len() != self.number_axes {
            return Err(MotionError::InvalidFieldCount {
                expected: self.number_axes,
                actual: point.len(),
                position: format!("{:?}", point),
            });
        }

        let generation = {
            let mut state = self.state.lock();
            tracing::debug!("MockTrajectoryController {}: point {:?}", self.name, point);
            state.points.push(point);
            if self.mode.is_timed() {
                state.pending += 1;
            }
            state.generation
        };

        if self.mode.is_timed() {
            let state = self.state.clone();
            let delay = self.point_duration;
            tokio::spawn(async move {
                sleep(delay).await;
                let mut state = state.lock();
                if state.generation == generation && state.pending > 0 {
                    state.pending -= 1;
                }
            });
        }
        Ok(())
    }

    async fn last_point_added(&self) -> Result<Option<Vec<Option<f64>>>> {
        self.error_config
            .check_operation(&self.name, "last_point_added")?;
        Ok(self.state.lock().points.last().cloned())
    }

    async fn is_moving(&self) -> Result<bool> {
        self.error_config.check_operation(&self.name, "is_moving")?;
        let state = self.state.lock();
        Ok(state.pending > 0 || state.held_moving)
    }

    async fn wait_while_moving(&self) -> Result<()> {
        while self.is_moving().await? {
            sleep(self.poll_interval).await;
        }
        Ok(())
    }

    async fn stop_and_reset(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.stop_resets += 1;
            state.points.clear();
            state.pending = 0;
            state.held_moving = false;
            state.generation += 1;
        }
        self.error_config
            .check_operation(&self.name, "stop_and_reset")?;
        if self.interrupt_on_stop {
            return Err(MotionError::Interrupted(format!(
                "{} interrupted while resetting",
                self.name
            )));
        }
        Ok(())
    }

    fn number_axes(&self) -> usize {
        self.number_axes
    }
}
