//! Validators over the combined position of a group.
//!
//! A [`PositionValidator`] sees one internal (hardware) value per member, with
//! missing targets already replaced by current positions. Validators describe
//! their rule through `Display`, which is what `describe()` lists.

use serde::Deserialize;
use std::fmt;

/// Check over a complete internal position of a group.
pub trait PositionValidator: Send + Sync + fmt::Display {
    /// `None` to accept, `Some(reason)` to reject.
    fn check_internal_position(&self, position: &[f64]) -> Option<String>;
}

/// Rejects positions where a protected axis is below its threshold while a
/// companion axis is above its own.
///
/// With the default theta/phi pair, theta may not go below 3.0 while phi is
/// above 10.0.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThresholdInterlock {
    /// Index of the protected axis in the position.
    pub protected: usize,
    /// Label used in rule descriptions.
    pub protected_name: String,
    /// The protected axis may not go below this.
    pub protection_threshold: f64,
    /// Index of the companion axis in the position.
    pub companion: usize,
    /// Label used in rule descriptions.
    pub companion_name: String,
    /// Threshold above which the companion endangers the protected axis.
    pub companion_threshold: f64,
}

impl Default for ThresholdInterlock {
    fn default() -> Self {
        Self {
            protected: 0,
            protected_name: "theta".to_string(),
            protection_threshold: 3.0,
            companion: 1,
            companion_name: "phi".to_string(),
            companion_threshold: 10.0,
        }
    }
}

impl PositionValidator for ThresholdInterlock {
    fn check_internal_position(&self, position: &[f64]) -> Option<String> {
        let (Some(protected), Some(companion)) =
            (position.get(self.protected), position.get(self.companion))
        else {
            return Some(format!(
                "{} needs fields {} and {}, position has {}",
                self, self.protected, self.companion, position.len()
            ));
        };
        if *protected < self.protection_threshold && *companion > self.companion_threshold {
            return Some(format!(
                "{} = {} is below {} while {} = {} is above {}",
                self.protected_name,
                protected,
                self.protection_threshold,
                self.companion_name,
                companion,
                self.companion_threshold
            ));
        }
        None
    }
}

impl fmt::Display for ThresholdInterlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} must not be below {} while {} is above {}",
            self.protected_name,
            self.protection_threshold,
            self.companion_name,
            self.companion_threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_interlock() {
        let interlock = ThresholdInterlock::default();

        let reason = interlock.check_internal_position(&[2.0, 12.0]).unwrap();
        assert_eq!(reason, "theta = 2 is below 3 while phi = 12 is above 10");

        assert_eq!(interlock.check_internal_position(&[2.0, 5.0]), None);
        assert_eq!(interlock.check_internal_position(&[4.0, 12.0]), None);
        // Boundaries are allowed
        assert_eq!(interlock.check_internal_position(&[3.0, 10.5]), None);
        assert_eq!(interlock.check_internal_position(&[2.5, 10.0]), None);
    }

    #[test]
    fn test_short_position_is_rejected() {
        let interlock = ThresholdInterlock::default();
        assert!(interlock.check_internal_position(&[1.0]).is_some());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let interlock: ThresholdInterlock =
            toml::from_str("protection_threshold = 5.0\ncompanion_name = \"chi\"").unwrap();
        assert_eq!(interlock.protection_threshold, 5.0);
        assert_eq!(interlock.companion_name, "chi");
        assert_eq!(interlock.companion_threshold, 10.0);
        assert_eq!(
            interlock.to_string(),
            "theta must not be below 5 while chi is above 10"
        );
    }
}
