//! Loosely typed positions.
//!
//! Scannables exchange positions that may be a bare scalar or an array of
//! fields, where any field may be missing. A missing field in a move request
//! means "leave this field where it is"; in a readback it means "unknown".
//! Readbacks may also carry text when a member could only be described, not
//! read.
//!
//! The conversion helpers here are the single place that turns these values
//! into the `f64` arrays the groups compute with:
//!
//! - [`Position::fields`] - every field as an optional [`Value`]
//! - [`Position::to_f64_vec`] - every field as an optional `f64`
//! - [`Position::as_f64`] - a single-field position as an optional `f64`

use crate::error::{MotionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A number.
    Number(f64),
    /// Text, e.g. a formatted readback standing in for a failed read.
    Text(String),
}

impl Value {
    /// Numeric value of this field. Text is parsed as a number.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Number(v) => Ok(*v),
            Value::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                MotionError::InvalidPosition(format!("'{}' is not a number", text))
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{}", v),
            Value::Text(text) => write!(f, "{}", text),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Position requested from, or reported by, a scannable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    /// One field.
    Scalar(Value),
    /// Several fields, `None` where a field is not given.
    Array(Vec<Option<Value>>),
}

impl Position {
    /// A single numeric field.
    pub fn scalar(value: f64) -> Self {
        Position::Scalar(Value::Number(value))
    }

    /// An array position built from optional numbers.
    pub fn from_f64s(values: impl IntoIterator<Item = Option<f64>>) -> Self {
        Position::Array(values.into_iter().map(|v| v.map(Value::Number)).collect())
    }

    /// Number of fields carried by this position.
    pub fn len(&self) -> usize {
        match self {
            Position::Scalar(_) => 1,
            Position::Array(fields) => fields.len(),
        }
    }

    /// True when there are no fields at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no field carries a value.
    pub fn is_unset(&self) -> bool {
        match self {
            Position::Scalar(_) => false,
            Position::Array(fields) => fields.iter().all(Option::is_none),
        }
    }

    /// Every field as an optional value.
    pub fn fields(&self) -> Vec<Option<Value>> {
        match self {
            Position::Scalar(value) => vec![Some(value.clone())],
            Position::Array(fields) => fields.clone(),
        }
    }

    /// Every field as an optional number.
    pub fn to_f64_vec(&self) -> Result<Vec<Option<f64>>> {
        match self {
            Position::Scalar(value) => Ok(vec![Some(value.as_f64()?)]),
            Position::Array(fields) => fields
                .iter()
                .map(|field| field.as_ref().map(Value::as_f64).transpose())
                .collect(),
        }
    }

    /// The value of a single-field position.
    pub fn as_f64(&self) -> Result<Option<f64>> {
        match self {
            Position::Scalar(value) => value.as_f64().map(Some),
            Position::Array(fields) if fields.len() == 1 => {
                fields[0].as_ref().map(Value::as_f64).transpose()
            }
            Position::Array(fields) => Err(MotionError::InvalidPosition(format!(
                "expected a single field, got {}",
                fields.len()
            ))),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Scalar(value) => write!(f, "{}", value),
            Position::Array(fields) => {
                write!(f, "[")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match field {
                        Some(value) => write!(f, "{}", value)?,
                        None => write!(f, "null")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for Position {
    fn from(value: f64) -> Self {
        Position::scalar(value)
    }
}

impl From<Vec<f64>> for Position {
    fn from(values: Vec<f64>) -> Self {
        Position::from_f64s(values.into_iter().map(Some))
    }
}

impl From<&[f64]> for Position {
    fn from(values: &[f64]) -> Self {
        Position::from_f64s(values.iter().copied().map(Some))
    }
}

impl From<Vec<Option<f64>>> for Position {
    fn from(values: Vec<Option<f64>>) -> Self {
        Position::from_f64s(values)
    }
}
