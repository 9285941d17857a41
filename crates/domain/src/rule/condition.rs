//! Condition: a guard that must hold for a fired rule to run its actions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::Operator;

/// What a condition observes. Time-like kinds read the wall clock, the
/// others read observed event values and device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Time,
    DayOfWeek,
    DeviceState,
    Sensor,
    Presence,
    Weather,
    Custom,
}

impl ConditionKind {
    #[must_use]
    pub fn reads_clock(self) -> bool {
        matches!(self, Self::Time | Self::DayOfWeek)
    }
}

/// How a condition's result combines with the running result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    #[default]
    And,
    Or,
    Not,
}

impl Logic {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
        }
    }

    #[must_use]
    pub fn combine(self, acc: bool, value: bool) -> bool {
        match self {
            Self::And => acc && value,
            Self::Or => acc || value,
            Self::Not => acc && !value,
        }
    }
}

/// `source.property <operator> value`, combined with its predecessors by `logic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub source: String,
    pub property: String,
    #[serde(default)]
    pub operator: Operator,
    pub value: Value,
    #[serde(default)]
    pub logic: Logic,
}

impl Condition {
    #[must_use]
    pub fn new(
        kind: ConditionKind,
        source: impl Into<String>,
        property: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            id: String::new(),
            kind,
            source: source.into(),
            property: property.into(),
            operator,
            value: value.into(),
            logic: Logic::And,
        }
    }

    #[must_use]
    pub fn with_logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{} {} {}",
            self.logic.as_str(),
            self.source,
            self.property,
            self.operator,
            self.value
        )
    }
}

/// Fold conditions left to right, starting from `true`:
/// `acc = logic.combine(acc, eval(condition))`.
///
/// There is no precedence: `[a, b(or), c(and)]` is `((true && a) || b) && c`.
/// An empty list holds.
pub fn fold_conditions(conditions: &[Condition], mut eval: impl FnMut(&Condition) -> bool) -> bool {
    conditions
        .iter()
        .fold(true, |acc, condition| condition.logic.combine(acc, eval(condition)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(id: &str, logic: Logic) -> Condition {
        let mut c = Condition::new(ConditionKind::Custom, "s", "p", Operator::Eq, true).with_logic(logic);
        c.id = id.to_string();
        c
    }

    fn eval_with<'a>(values: &'a [(&'a str, bool)]) -> impl FnMut(&Condition) -> bool + 'a {
        move |c| values.iter().find(|(id, _)| *id == c.id).is_some_and(|(_, v)| *v)
    }

    #[test]
    fn should_hold_when_no_conditions() {
        assert!(fold_conditions(&[], |_| false));
    }

    #[test]
    fn should_and_conditions_by_default() {
        let conditions = vec![cond("a", Logic::And), cond("b", Logic::And)];
        assert!(fold_conditions(&conditions, eval_with(&[("a", true), ("b", true)])));
        assert!(!fold_conditions(&conditions, eval_with(&[("a", true), ("b", false)])));
    }

    #[test]
    fn should_fold_sequentially_without_precedence() {
        // ((true && false) || true) && false == false
        let conditions = vec![cond("a", Logic::And), cond("b", Logic::Or), cond("c", Logic::And)];
        let values = [("a", false), ("b", true), ("c", false)];
        assert!(!fold_conditions(&conditions, eval_with(&values)));

        // ((true && false) || true) == true
        let conditions = vec![cond("a", Logic::And), cond("b", Logic::Or)];
        assert!(fold_conditions(&conditions, eval_with(&values)));
    }

    #[test]
    fn should_short_circuit_or_from_initial_true() {
        // A leading `or` sees the initial `true` accumulator.
        let conditions = vec![cond("a", Logic::Or)];
        assert!(fold_conditions(&conditions, eval_with(&[("a", false)])));
    }

    #[test]
    fn should_negate_with_not() {
        let conditions = vec![cond("a", Logic::Not)];
        assert!(fold_conditions(&conditions, eval_with(&[("a", false)])));
        assert!(!fold_conditions(&conditions, eval_with(&[("a", true)])));
    }

    #[test]
    fn should_deserialize_condition_with_defaults() {
        let c: Condition = serde_json::from_value(json!({
            "type": "sensor",
            "source": "thermostat_1",
            "property": "temperature",
            "operator": "gt",
            "value": 26
        }))
        .unwrap();
        assert_eq!(c.kind, ConditionKind::Sensor);
        assert_eq!(c.operator, Operator::Gt);
        assert_eq!(c.logic, Logic::And);
    }

    #[test]
    fn should_display_condition() {
        let c = Condition::new(ConditionKind::Sensor, "thermo", "temperature", Operator::Gt, 26);
        assert_eq!(c.to_string(), "and thermo.temperature gt 26");
    }
}
