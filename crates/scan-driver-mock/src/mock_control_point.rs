//! Mock control point (e.g. a controller's "defer moves" register).

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::capabilities::ControlPoint;
use scan_core::error::Result;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::common::ErrorConfig;

/// Integer register that records every value written to it.
#[derive(Clone)]
pub struct MockControlPoint {
    name: String,
    value: Arc<AtomicI32>,
    history: Arc<Mutex<Vec<i32>>>,
    error_config: ErrorConfig,
}

impl MockControlPoint {
    /// Control point starting at 0 with no injected failures.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_errors(name, ErrorConfig::none())
    }

    /// Control point whose `set_value` / `value` go through `error_config`.
    pub fn with_errors(name: impl Into<String>, error_config: ErrorConfig) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(AtomicI32::new(0)),
            history: Arc::new(Mutex::new(Vec::new())),
            error_config,
        }
    }

    /// Every value successfully written, in order.
    pub fn history(&self) -> Vec<i32> {
        self.history.lock().clone()
    }

    /// Current value without going through error injection.
    pub fn current(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPoint for MockControlPoint {
    async fn set_value(&self, value: i32) -> Result<()> {
        self.error_config.check_operation(&self.name, "set_value")?;
        self.value.store(value, Ordering::SeqCst);
        self.history.lock().push(value);
        tracing::debug!("MockControlPoint {}: set to {}", self.name, value);
        Ok(())
    }

    async fn value(&self) -> Result<i32> {
        self.error_config.check_operation(&self.name, "value")?;
        Ok(self.value.load(Ordering::SeqCst))
    }
}
