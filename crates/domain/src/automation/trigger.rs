//! Trigger: the stimulus that puts an automation rule up for firing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{EventType, WILDCARD};
use crate::value::Operator;

/// Trigger vocabulary of automation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Wall-clock `HH:MM` compared against `value`.
    Time,
    DeviceState,
    Sensor,
    Event,
    Presence,
    /// Never fires from the evaluation loop, only through a manual trigger call.
    Manual,
}

impl TriggerKind {
    /// Event type observed when the trigger names no explicit event.
    #[must_use]
    pub fn default_event_type(self) -> Option<EventType> {
        match self {
            Self::DeviceState => Some(EventType::DeviceState),
            Self::Sensor => Some(EventType::Sensor),
            Self::Presence => Some(EventType::Presence),
            Self::Time | Self::Event | Self::Manual => None,
        }
    }
}

/// `current(source, event) <operator> value`.
///
/// A `null` value matches any fresh observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub operator: Operator,
}

impl Trigger {
    #[must_use]
    pub fn new(kind: TriggerKind, source: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id: String::new(),
            kind,
            source: source.into(),
            event: None,
            value: value.into(),
            operator: Operator::Eq,
        }
    }

    #[must_use]
    pub fn manual() -> Self {
        Self::new(TriggerKind::Manual, "", Value::Null)
    }

    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    #[must_use]
    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Observation-cache key this trigger reads: `source.event`, where an empty
    /// source reads the latest observation from any source (`*`) and a missing
    /// event falls back to the kind's event type.
    #[must_use]
    pub fn observation_key(&self) -> Option<String> {
        let event = match &self.event {
            Some(event) => event.clone(),
            None => self.kind.default_event_type()?.as_str().to_string(),
        };
        let source = if self.source.is_empty() {
            WILDCARD
        } else {
            self.source.as_str()
        };
        Some(format!("{source}.{event}"))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TriggerKind::Manual => f.write_str("manual"),
            TriggerKind::Time => write!(f, "time({} {})", self.operator, self.value),
            _ => match self.observation_key() {
                Some(key) => write!(f, "{key} {} {}", self.operator, self.value),
                None => write!(f, "{} {}", self.operator, self.value),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_key_sensor_trigger_by_source_and_kind() {
        let t = Trigger::new(TriggerKind::Sensor, "motion_1", true);
        assert_eq!(t.observation_key().as_deref(), Some("motion_1.sensor"));
    }

    #[test]
    fn should_key_trigger_on_any_source_when_source_empty() {
        let t = Trigger::new(TriggerKind::Sensor, "", true);
        assert_eq!(t.observation_key().as_deref(), Some("*.sensor"));
    }

    #[test]
    fn should_prefer_explicit_event_name() {
        let t = Trigger::new(TriggerKind::Sensor, "motion_1", true).with_event("motion");
        assert_eq!(t.observation_key().as_deref(), Some("motion_1.motion"));
    }

    #[test]
    fn should_have_no_key_for_time_and_manual() {
        assert!(Trigger::manual().observation_key().is_none());
        assert!(
            Trigger::new(TriggerKind::Time, "", "07:00")
                .observation_key()
                .is_none()
        );
    }

    #[test]
    fn should_deserialize_trigger_with_defaults() {
        let t: Trigger = serde_json::from_value(json!({"type": "sensor", "value": true})).unwrap();
        assert_eq!(t.kind, TriggerKind::Sensor);
        assert_eq!(t.operator, Operator::Eq);
        assert!(t.source.is_empty());
    }

    #[test]
    fn should_display_trigger() {
        let t = Trigger::new(TriggerKind::Sensor, "thermo", 26).with_operator(Operator::Gt);
        assert_eq!(t.to_string(), "thermo.sensor gt 26");
        assert_eq!(Trigger::manual().to_string(), "manual");
    }
}
