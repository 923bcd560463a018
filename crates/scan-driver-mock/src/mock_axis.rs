//! Mock axis implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::capabilities::{CapabilityLevel, Scannable, ScannableMotion, ScannableMotionUnits};
use scan_core::error::{MotionError, Result};
use scan_core::position::{Position, Value};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::common::{ErrorConfig, MockMode};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a [`MockAxis`], e.g. one `[[axes]]` table in a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct MockAxisConfig {
    /// Axis name
    pub name: String,

    /// Movable field names (default: the axis name)
    #[serde(default)]
    pub input_names: Vec<String>,

    /// Readback-only field names
    #[serde(default)]
    pub extra_names: Vec<String>,

    /// Initial value of each input field (default: 0.0)
    #[serde(default)]
    pub initial_position: Vec<f64>,

    /// Constant value of each extra field (default: 0.0)
    #[serde(default)]
    pub extra_values: Vec<f64>,

    /// Motion speed in units/sec (default: 10.0)
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Lower soft limit for every input
    #[serde(default)]
    pub lower_limit: Option<f64>,

    /// Upper soft limit for every input
    #[serde(default)]
    pub upper_limit: Option<f64>,

    /// Offset for every input
    #[serde(default)]
    pub offset: Option<f64>,

    /// Scaling factor for every input
    #[serde(default)]
    pub scaling_factor: Option<f64>,

    /// User units (default: "mm")
    #[serde(default = "default_units")]
    pub units: String,

    /// Capability traits the axis exposes (default: units)
    #[serde(default = "default_capability")]
    pub capability: CapabilityLevel,

    /// Instant, Realistic or Chaos (default: Instant)
    #[serde(default)]
    pub mode: MockMode,
}

fn default_speed() -> f64 {
    10.0
}

fn default_units() -> String {
    "mm".to_string()
}

fn default_capability() -> CapabilityLevel {
    CapabilityLevel::MotionWithUnits
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug)]
struct AxisState {
    inputs: Vec<f64>,
    extras: Vec<f64>,
    /// A timed move is in flight
    moving: bool,
    /// Busy forced on by a test
    held_busy: bool,
    /// Bumped on every move and stop so stale completions are discarded
    generation: u64,

    lower: Vec<Option<f64>>,
    upper: Vec<Option<f64>>,
    tolerances: Vec<f64>,
    offset: Vec<Option<f64>>,
    scaling: Vec<Option<f64>>,
    number_tries: u32,

    user_units: String,
    hardware_units: String,
    acceptable_units: Vec<String>,

    moves: Vec<Position>,
    stops: u32,
    level_move_starts: u32,
    command_failures: u32,
    configures: u32,
}

// =============================================================================
// MockAxis - Simulated Axis
// =============================================================================

/// Mock axis with optional realistic timing.
///
/// Simulates an axis with:
/// - Any number of input and extra fields
/// - Distance-based move duration (`Realistic`/`Chaos` modes)
/// - Soft limits, offset and scaling
/// - Engineering units
/// - Error injection for testing
/// - A history of move and stop requests for assertions
///
/// Clones share state, so a test can keep a handle to an axis it has given
/// to a group.
///
/// # Example
///
/// ```rust,ignore
/// let axis = MockAxis::builder("x")
///     .limits(Some(-10.0), Some(10.0))
///     .mode(MockMode::Realistic)
///     .build();
///
/// axis.move_to(Position::scalar(5.0)).await?;
/// axis.wait_while_busy().await?;
/// ```
#[derive(Clone)]
pub struct MockAxis {
    name: String,
    input_names: Vec<String>,
    extra_names: Vec<String>,
    capability: CapabilityLevel,
    speed: f64,
    mode: MockMode,
    error_config: ErrorConfig,
    state: Arc<Mutex<AxisState>>,
}

impl MockAxis {
    /// Single-field axis at 0.0 with instant moves.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    /// Create a builder for configuring a MockAxis
    pub fn builder(name: impl Into<String>) -> MockAxisBuilder {
        MockAxisBuilder::new(name)
    }

    /// Create a mock axis from configuration.
    pub fn with_config(config: MockAxisConfig) -> Self {
        let mut builder = Self::builder(config.name)
            .extra_names(config.extra_names)
            .speed(config.speed)
            .limits(config.lower_limit, config.upper_limit)
            .offset(config.offset)
            .scaling_factor(config.scaling_factor)
            .units(config.units)
            .capability(config.capability)
            .mode(config.mode);
        if !config.input_names.is_empty() {
            builder = builder.input_names(config.input_names);
        }
        if !config.initial_position.is_empty() {
            builder = builder.initial_position(config.initial_position);
        }
        if !config.extra_values.is_empty() {
            builder = builder.extra_values(config.extra_values);
        }
        builder.build()
    }

    /// Every position passed to `move_to`, in order.
    pub fn moves(&self) -> Vec<Position> {
        self.state.lock().moves.clone()
    }

    /// Number of `move_to` calls.
    pub fn move_count(&self) -> usize {
        self.state.lock().moves.len()
    }

    /// Most recent position passed to `move_to`.
    pub fn last_move(&self) -> Option<Position> {
        self.state.lock().moves.last().cloned()
    }

    /// Number of `stop` calls, including failed ones.
    pub fn stop_count(&self) -> u32 {
        self.state.lock().stops
    }

    /// Number of `at_level_move_start` calls.
    pub fn level_move_start_count(&self) -> u32 {
        self.state.lock().level_move_starts
    }

    /// Number of `at_command_failure` calls.
    pub fn command_failure_count(&self) -> u32 {
        self.state.lock().command_failures
    }

    /// Number of `configure` calls.
    pub fn configure_count(&self) -> u32 {
        self.state.lock().configures
    }

    /// Force `is_busy` on until released or the axis is stopped.
    pub fn hold_busy(&self, busy: bool) {
        self.state.lock().held_busy = busy;
    }

    /// Teleport the input fields without recording a move.
    pub fn set_inputs(&self, values: Vec<f64>) {
        self.state.lock().inputs = values;
    }

    /// Current input field values.
    pub fn inputs(&self) -> Vec<f64> {
        self.state.lock().inputs.clone()
    }

    /// Error injection applied to every operation
    pub fn error_config(&self) -> &ErrorConfig {
        &self.error_config
    }

    /// Time to travel `distance` at the configured speed.
    fn motion_duration(&self, distance: f64) -> Duration {
        if !self.mode.is_timed() || self.speed <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(distance.abs() / self.speed)
    }

    fn check_field_count(&self, position: &Position, requested: usize) -> Result<()> {
        if requested != self.input_names.len() {
            return Err(MotionError::InvalidFieldCount {
                expected: self.input_names.len(),
                actual: requested,
                position: position.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Scannable for MockAxis {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_names(&self) -> Vec<String> {
        self.input_names.clone()
    }

    fn extra_names(&self) -> Vec<String> {
        self.extra_names.clone()
    }

    async fn move_to(&self, position: Position) -> Result<()> {
        self.error_config.check_operation(&self.name, "move")?;

        let requested = position.to_f64_vec()?;
        self.check_field_count(&position, requested.len())?;

        if let Some(reason) = self.check_position_within_limits(&position)? {
            return Err(MotionError::MoveRejected {
                scannable: self.name.clone(),
                position: position.to_string(),
                reason,
            });
        }

        let (targets, generation, duration) = {
            let mut state = self.state.lock();
            state.moves.push(position.clone());

            let targets: Vec<f64> = requested
                .iter()
                .zip(state.inputs.iter())
                .map(|(target, current)| target.unwrap_or(*current))
                .collect();
            let distance = targets
                .iter()
                .zip(state.inputs.iter())
                .map(|(target, current)| (target - current).abs())
                .fold(0.0, f64::max);
            let duration = self.motion_duration(distance);

            tracing::debug!(
                "MockAxis {}: moving from {:?} to {:?} ({:?})",
                self.name,
                state.inputs,
                targets,
                duration
            );

            state.generation += 1;
            if duration.is_zero() {
                state.inputs = targets.clone();
                state.moving = false;
            } else {
                state.moving = true;
            }
            (targets, state.generation, duration)
        };

        if !duration.is_zero() {
            let state = self.state.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                sleep(duration).await;
                let mut state = state.lock();
                if state.generation == generation && state.moving {
                    state.inputs = targets;
                    state.moving = false;
                    tracing::debug!("MockAxis {}: reached {:?}", name, state.inputs);
                }
            });
        }

        Ok(())
    }

    async fn position(&self) -> Result<Position> {
        self.error_config.check_operation(&self.name, "position")?;
        let state = self.state.lock();
        let values: Vec<f64> = state
            .inputs
            .iter()
            .chain(state.extras.iter())
            .copied()
            .collect();
        Ok(match values.as_slice() {
            [single] => Position::Scalar(Value::Number(*single)),
            _ => Position::from(values),
        })
    }

    async fn is_busy(&self) -> Result<bool> {
        self.error_config.check_operation(&self.name, "is_busy")?;
        let state = self.state.lock();
        Ok(state.moving || state.held_busy)
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.stops += 1;
        self.error_config.check_operation(&self.name, "stop")?;
        state.moving = false;
        state.held_busy = false;
        state.generation += 1;
        tracing::debug!("MockAxis {}: stop", self.name);
        Ok(())
    }

    async fn check_position_valid(&self, position: &Position) -> Result<Option<String>> {
        let requested = position.to_f64_vec()?;
        if requested.len() != self.input_names.len() {
            return Ok(Some(format!(
                "{} expects {} field(s), got {}",
                self.name,
                self.input_names.len(),
                requested.len()
            )));
        }
        self.check_position_within_limits(position)
    }

    async fn configure(&self) -> Result<()> {
        self.state.lock().configures += 1;
        Ok(())
    }

    async fn at_level_move_start(&self) -> Result<()> {
        self.state.lock().level_move_starts += 1;
        Ok(())
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.state.lock().command_failures += 1;
        Ok(())
    }

    fn capability(&self) -> CapabilityLevel {
        self.capability
    }

    fn as_motion(&self) -> Option<&dyn ScannableMotion> {
        (self.capability >= CapabilityLevel::Motion).then_some(self as &dyn ScannableMotion)
    }

    fn as_motion_units(&self) -> Option<&dyn ScannableMotionUnits> {
        (self.capability == CapabilityLevel::MotionWithUnits)
            .then_some(self as &dyn ScannableMotionUnits)
    }
}

impl ScannableMotion for MockAxis {
    fn lower_limits(&self) -> Vec<Option<f64>> {
        self.state.lock().lower.clone()
    }

    fn upper_limits(&self) -> Vec<Option<f64>> {
        self.state.lock().upper.clone()
    }

    fn set_lower_limits(&self, limits: Vec<Option<f64>>) -> Result<()> {
        self.check_vector_len("lower limits", limits.len())?;
        self.state.lock().lower = limits;
        Ok(())
    }

    fn set_upper_limits(&self, limits: Vec<Option<f64>>) -> Result<()> {
        self.check_vector_len("upper limits", limits.len())?;
        self.state.lock().upper = limits;
        Ok(())
    }

    fn tolerances(&self) -> Vec<f64> {
        self.state.lock().tolerances.clone()
    }

    fn set_tolerances(&self, tolerances: Vec<f64>) -> Result<()> {
        self.check_vector_len("tolerances", tolerances.len())?;
        self.state.lock().tolerances = tolerances;
        Ok(())
    }

    fn offset(&self) -> Vec<Option<f64>> {
        self.state.lock().offset.clone()
    }

    fn set_offset(&self, offset: Vec<Option<f64>>) {
        self.state.lock().offset = offset;
    }

    fn scaling_factor(&self) -> Vec<Option<f64>> {
        self.state.lock().scaling.clone()
    }

    fn set_scaling_factor(&self, scaling: Vec<Option<f64>>) {
        self.state.lock().scaling = scaling;
    }

    fn number_tries(&self) -> u32 {
        self.state.lock().number_tries
    }

    fn set_number_tries(&self, tries: u32) {
        self.state.lock().number_tries = tries;
    }
}

impl MockAxis {
    fn check_vector_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.input_names.len() {
            return Err(MotionError::Configuration(format!(
                "{}: {} needs {} entries, got {}",
                self.name,
                what,
                self.input_names.len(),
                len
            )));
        }
        Ok(())
    }
}

impl ScannableMotionUnits for MockAxis {
    fn user_units(&self) -> String {
        self.state.lock().user_units.clone()
    }

    fn set_user_units(&self, units: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.acceptable_units.iter().any(|u| u == units) {
            return Err(MotionError::Configuration(format!(
                "{}: '{}' is not one of the acceptable units {:?}",
                self.name, units, state.acceptable_units
            )));
        }
        state.user_units = units.to_string();
        Ok(())
    }

    fn hardware_units(&self) -> String {
        self.state.lock().hardware_units.clone()
    }

    fn set_hardware_units(&self, units: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.hardware_units = units.to_string();
        if !state.acceptable_units.iter().any(|u| u == units) {
            state.acceptable_units.push(units.to_string());
        }
        Ok(())
    }

    fn acceptable_units(&self) -> Vec<String> {
        self.state.lock().acceptable_units.clone()
    }

    fn add_acceptable_unit(&self, units: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.acceptable_units.iter().any(|u| u == units) {
            state.acceptable_units.push(units.to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockAxis with fluent API
pub struct MockAxisBuilder {
    name: String,
    input_names: Option<Vec<String>>,
    extra_names: Vec<String>,
    initial_position: Vec<f64>,
    extra_values: Vec<f64>,
    speed: f64,
    lower: Option<f64>,
    upper: Option<f64>,
    offset: Option<f64>,
    scaling: Option<f64>,
    units: String,
    capability: CapabilityLevel,
    mode: MockMode,
    error_config: ErrorConfig,
}

impl MockAxisBuilder {
    /// Create a new builder with defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_names: None,
            extra_names: Vec::new(),
            initial_position: Vec::new(),
            extra_values: Vec::new(),
            speed: default_speed(),
            lower: None,
            upper: None,
            offset: None,
            scaling: None,
            units: default_units(),
            capability: default_capability(),
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
        }
    }

    /// Set the movable field names (default: the axis name)
    pub fn input_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.input_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the readback-only field names
    pub fn extra_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.extra_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set initial input values
    pub fn initial_position(mut self, values: Vec<f64>) -> Self {
        self.initial_position = values;
        self
    }

    /// Set the constant extra field values
    pub fn extra_values(mut self, values: Vec<f64>) -> Self {
        self.extra_values = values;
        self
    }

    /// Set motion speed (units/sec)
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set soft limits applied to every input field
    pub fn limits(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Set the offset applied to every input field
    pub fn offset(mut self, offset: Option<f64>) -> Self {
        self.offset = offset;
        self
    }

    /// Set the scaling factor applied to every input field
    pub fn scaling_factor(mut self, scaling: Option<f64>) -> Self {
        self.scaling = scaling;
        self
    }

    /// Set user and hardware units
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Set which capability traits the axis exposes
    pub fn capability(mut self, capability: CapabilityLevel) -> Self {
        self.capability = capability;
        self
    }

    /// Set operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set error configuration
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Build the MockAxis
    pub fn build(self) -> MockAxis {
        let input_names = self.input_names.unwrap_or_else(|| vec![self.name.clone()]);
        let n_inputs = input_names.len();

        let mut inputs = self.initial_position;
        inputs.resize(n_inputs, 0.0);
        let mut extras = self.extra_values;
        extras.resize(self.extra_names.len(), 0.0);

        let error_config = match self.mode {
            MockMode::Chaos => ErrorConfig::random_failures_seeded(0.05, None),
            _ => self.error_config,
        };

        let state = AxisState {
            inputs,
            extras,
            moving: false,
            held_busy: false,
            generation: 0,
            lower: vec![self.lower; n_inputs],
            upper: vec![self.upper; n_inputs],
            tolerances: vec![0.0; n_inputs],
            offset: vec![self.offset; n_inputs],
            scaling: vec![self.scaling; n_inputs],
            number_tries: 1,
            user_units: self.units.clone(),
            hardware_units: self.units.clone(),
            acceptable_units: vec![self.units],
            moves: Vec::new(),
            stops: 0,
            level_move_starts: 0,
            command_failures: 0,
            configures: 0,
        };

        MockAxis {
            name: self.name,
            input_names,
            extra_names: self.extra_names,
            capability: self.capability,
            speed: self.speed,
            mode: self.mode,
            error_config,
            state: Arc::new(Mutex::new(state)),
        }
    }
}
