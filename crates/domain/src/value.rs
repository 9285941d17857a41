//! Comparison operators shared by triggers, conditions and fault predicates.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// How an observed value is compared against a configured one.
///
/// A missing operator means [`Operator::Eq`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<=")]
    Le,
    Contains,
}

impl Operator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Le => "le",
            Self::Contains => "contains",
        }
    }

    /// Apply the operator as `current <op> target`.
    ///
    /// Numbers compare numerically whatever their JSON encoding (`1 == 1.0`).
    /// Strings order lexically, which also orders `HH:MM` times correctly.
    /// Ordering between values of different kinds never holds.
    #[must_use]
    pub fn compare(self, current: &Value, target: &Value) -> bool {
        match self {
            Self::Eq => loosely_equal(current, target),
            Self::Ne => !loosely_equal(current, target),
            Self::Gt => order(current, target) == Some(Ordering::Greater),
            Self::Lt => order(current, target) == Some(Ordering::Less),
            Self::Ge => matches!(
                order(current, target),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Le => matches!(
                order(current, target),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Contains => contains(current, target),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality that treats `1`, `1.0` and `1u64` as the same number.
#[must_use]
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), _) => items.iter().any(|item| loosely_equal(item, needle)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

/// Check that a probability or severity lies in `[0, 1]`.
pub(crate) fn check_probability(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}
