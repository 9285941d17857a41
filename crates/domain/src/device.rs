//! Device-facing value objects: the generic [`Command`] every engine sends
//! and the [`Health`] every device reports.
//!
//! Devices themselves live outside the domain; the `Device` port in
//! `simhub-app` is the capability engines consume.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command type carrying a fault effect to a device.
pub const APPLY_FAULT: &str = "apply_fault";

/// Group target addressing every device of type `smart_bulb`.
pub const ALL_LIGHTS: &str = "all_lights";

/// Group target addressing every registered device.
pub const ALL_DEVICES: &str = "all_devices";

/// Device type addressed by [`ALL_LIGHTS`].
pub const LIGHT_DEVICE_TYPE: &str = "smart_bulb";

/// The single actuation shape: control actions, fault effects and recovery
/// steps all reach devices as a `Command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(with = "crate::time::secs")]
    pub timeout: Duration,
}

impl Command {
    #[must_use]
    pub fn new(command_type: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: format!("cmd_{}", uuid::Uuid::new_v4().simple()),
            command_type: command_type.into(),
            parameters: Map::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Health as reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Warning,
    Degraded,
    Critical,
    Offline,
}

impl Health {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
            Self::Offline => "offline",
        }
    }

    /// Recovery verification passes only for [`Health::Healthy`].
    #[must_use]
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_generate_distinct_command_ids() {
        let a = Command::new("turn_on", Duration::from_secs(5));
        let b = Command::new("turn_on", Duration::from_secs(5));
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("cmd_"));
    }

    #[test]
    fn should_serialize_command_type_as_type() {
        let cmd = Command::new(APPLY_FAULT, Duration::from_secs(30)).with_param("severity", 0.9);
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], json!("apply_fault"));
        assert_eq!(value["parameters"]["severity"], json!(0.9));
        assert_eq!(value["timeout"], json!(30.0));
    }

    #[test]
    fn should_only_treat_healthy_as_healthy() {
        assert!(Health::Healthy.is_healthy());
        assert!(!Health::Warning.is_healthy());
        assert!(!Health::Offline.is_healthy());
    }

    #[test]
    fn should_display_health_in_snake_case() {
        assert_eq!(Health::Degraded.to_string(), "degraded");
    }
}
