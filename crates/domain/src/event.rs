//! Event: an immutable record of something that happened.
//!
//! Events flow through the bus: devices report state and sensor readings,
//! engines announce rule firings, fault transitions and script outcomes.
//! Handlers subscribe by `"*"`, by event type (`"sensor"`) or by the
//! compound `"type.name"` key (`"fault.scenario_triggered"`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NotFoundError;
use crate::id::EventId;
use crate::time::{Timestamp, elapsed_between, now};

/// Subscription key matching every event.
pub const WILDCARD: &str = "*";

/// Kind of event, the first half of a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DeviceState,
    Sensor,
    Presence,
    Network,
    Security,
    User,
    System,
    Time,
    Automation,
    Scene,
    Pattern,
    Routine,
    Fault,
    Script,
}

impl EventType {
    pub const ALL: [Self; 14] = [
        Self::DeviceState,
        Self::Sensor,
        Self::Presence,
        Self::Network,
        Self::Security,
        Self::User,
        Self::System,
        Self::Time,
        Self::Automation,
        Self::Scene,
        Self::Pattern,
        Self::Routine,
        Self::Fault,
        Self::Script,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceState => "device_state",
            Self::Sensor => "sensor",
            Self::Presence => "presence",
            Self::Network => "network",
            Self::Security => "security",
            Self::User => "user",
            Self::System => "system",
            Self::Time => "time",
            Self::Automation => "automation",
            Self::Scene => "scene",
            Self::Pattern => "pattern",
            Self::Routine => "routine",
            Self::Fault => "fault",
            Self::Script => "script",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = NotFoundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| NotFoundError {
                entity: "EventType",
                id: s.to_string(),
            })
    }
}

/// Something that happened, as published on the bus.
///
/// `id` and `timestamp` are generated when a serialized event omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    #[serde(default)]
    pub priority: i32,
    /// Events older than this are dropped instead of dispatched.
    #[serde(
        default,
        with = "crate::time::opt_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,
}

impl Event {
    /// Create an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(event_type: EventType, source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            source: source.into(),
            target: None,
            name: name.into(),
            data: Map::new(),
            timestamp: now(),
            priority: 0,
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach a payload. Objects are merged field by field, any other
    /// value is stored under `"value"`.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        match data {
            Value::Object(map) => self.data.extend(map),
            Value::Null => {}
            other => {
                self.data.insert("value".to_string(), other);
            }
        }
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The `type.name` subscription key.
    #[must_use]
    pub fn compound_key(&self) -> String {
        format!("{}.{}", self.event_type, self.name)
    }

    /// Whether the event outlived its TTL at `at`. Events without a TTL never expire.
    #[must_use]
    pub fn is_expired(&self, at: Timestamp) -> bool {
        self.ttl
            .is_some_and(|ttl| !ttl.is_zero() && elapsed_between(self.timestamp, at) > ttl)
    }

    /// The value a trigger compares against: `data.value`, else `data.state`,
    /// else the whole payload.
    #[must_use]
    pub fn primary_value(&self) -> Value {
        self.data
            .get("value")
            .or_else(|| self.data.get("state"))
            .cloned()
            .unwrap_or_else(|| Value::Object(self.data.clone()))
    }
}

/// Narrows which events reach a handler. Empty lists accept anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub types: Vec<EventType>,
    pub sources: Vec<String>,
    pub names: Vec<String>,
    pub min_priority: Option<i32>,
}

impl EventFilter {
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        (self.types.is_empty() || self.types.contains(&event.event_type))
            && (self.sources.is_empty() || self.sources.iter().any(|s| *s == event.source))
            && (self.names.is_empty() || self.names.iter().any(|n| *n == event.name))
            && self.min_priority.is_none_or(|min| event.priority >= min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    #[test]
    fn should_build_compound_key_from_type_and_name() {
        let event = Event::new(EventType::Fault, "fault_engine", "scenario_triggered");
        assert_eq!(event.compound_key(), "fault.scenario_triggered");
    }

    #[test]
    fn should_store_scalar_payload_under_value() {
        let event = Event::new(EventType::Sensor, "motion_1", "motion").with_data(json!(true));
        assert_eq!(event.data.get("value"), Some(&json!(true)));
        assert_eq!(event.primary_value(), json!(true));
    }

    #[test]
    fn should_fall_back_to_state_then_payload_for_primary_value() {
        let event = Event::new(EventType::DeviceState, "bulb_1", "state_changed")
            .with_data(json!({"state": "on", "brightness": 80}));
        assert_eq!(event.primary_value(), json!("on"));

        let event = Event::new(EventType::Sensor, "thermo", "reading")
            .with_data(json!({"temperature": 21.5}));
        assert_eq!(event.primary_value(), json!({"temperature": 21.5}));
    }

    #[test]
    fn should_expire_when_older_than_ttl() {
        let mut event = Event::new(EventType::System, "test", "tick").with_ttl(Duration::from_secs(1));
        event.timestamp = now() - TimeDelta::seconds(5);
        assert!(event.is_expired(now()));
    }

    #[test]
    fn should_never_expire_without_ttl() {
        let mut event = Event::new(EventType::System, "test", "tick");
        event.timestamp = now() - TimeDelta::days(2);
        assert!(!event.is_expired(now()));
    }

    #[test]
    fn should_generate_id_and_timestamp_when_missing_from_json() {
        let event: Event = serde_json::from_value(json!({
            "type": "sensor",
            "source": "motion_1",
            "name": "motion",
            "data": {"value": true}
        }))
        .unwrap();
        assert_eq!(event.event_type, EventType::Sensor);
        assert!(event.ttl.is_none());
        assert!(event.timestamp <= now());
    }

    #[test]
    fn should_parse_event_type_from_str() {
        assert_eq!("device_state".parse::<EventType>().unwrap(), EventType::DeviceState);
        assert!("bogus".parse::<EventType>().is_err());
    }

    #[test]
    fn should_accept_everything_with_empty_filter() {
        let event = Event::new(EventType::Network, "router", "link_down");
        assert!(EventFilter::default().matches(&event));
    }

    #[test]
    fn should_filter_by_type_source_name_and_priority() {
        let event = Event::new(EventType::Network, "router", "link_down").with_priority(3);
        let filter = EventFilter {
            types: vec![EventType::Network],
            sources: vec!["router".to_string()],
            names: vec!["link_down".to_string()],
            min_priority: Some(3),
        };
        assert!(filter.matches(&event));

        let stricter = EventFilter {
            min_priority: Some(4),
            ..filter.clone()
        };
        assert!(!stricter.matches(&event));

        let other_source = EventFilter {
            sources: vec!["switch".to_string()],
            ..filter
        };
        assert!(!other_source.matches(&event));
    }
}
