//! Failure injection for simulated collaborators.
//!
//! Each mock checks its [`ErrorConfig`] at the top of every operation, naming
//! the operation (`"move"`, `"stop"`, `"set_value"`, ...). A configured
//! [`ErrorScenario`] or a random failure turns the call into a scan-core
//! [`DriverError`].

use super::rng::MockRng;
use scan_core::error::{DriverError, DriverErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A scripted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorScenario {
    /// Every call of `operation` fails with a hardware error.
    Fail {
        /// Operation name passed to `check_operation`.
        operation: &'static str,
    },
    /// Every call of `operation` fails with a timeout.
    Timeout {
        /// Operation name passed to `check_operation`.
        operation: &'static str,
    },
    /// The first call of any operation loses the link, and every later call
    /// fails too.
    CommunicationLoss,
}

/// Failures a mock injects into its own operations.
///
/// Clones share the lost-link state.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    scenarios: Arc<Vec<ErrorScenario>>,
    failure_rate: f64,
    rng: Arc<MockRng>,
    link_lost: Arc<AtomicBool>,
}

impl ErrorConfig {
    /// No failures.
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// A single scripted failure.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scripted failures, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            failure_rate: 0.0,
            rng: Arc::new(MockRng::new(None)),
            link_lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fail any operation with probability `rate`. A seed makes the sequence
    /// reproducible.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self {
            failure_rate: rate,
            rng: Arc::new(MockRng::new(seed)),
            ..Self::none()
        }
    }

    /// `Err` if `operation` on `driver` should fail now.
    pub fn check_operation(&self, driver: &str, operation: &'static str) -> Result<(), DriverError> {
        if self.link_lost.load(Ordering::SeqCst) {
            return Err(link_lost(driver));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::Fail { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver,
                        DriverErrorKind::Hardware,
                        format!("Injected failure on operation '{}'", operation),
                    ));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    self.link_lost.store(true, Ordering::SeqCst);
                    return Err(link_lost(driver));
                }
                _ => {}
            }
        }

        if self.rng.should_fail(self.failure_rate) {
            return Err(DriverError::new(
                driver,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }
        Ok(())
    }
}

fn link_lost(driver: &str) -> DriverError {
    DriverError::new(driver, DriverErrorKind::Communication, "Communication lost")
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
