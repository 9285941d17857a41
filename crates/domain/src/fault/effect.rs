//! Fault effects pushed to devices and the recovery steps that undo them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::{APPLY_FAULT, Command};
use crate::rule::RuleAction;

use super::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    ServiceUnavailable,
    DataLoss,
    NetworkIsolation,
    PerformanceDegradation,
    ServiceDegradation,
    DeviceMalfunction,
    ConfigurationLoss,
    ThermalThrottling,
    HighLatency,
    PacketLoss,
}

impl EffectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "service_unavailable",
            Self::DataLoss => "data_loss",
            Self::NetworkIsolation => "network_isolation",
            Self::PerformanceDegradation => "performance_degradation",
            Self::ServiceDegradation => "service_degradation",
            Self::DeviceMalfunction => "device_malfunction",
            Self::ConfigurationLoss => "configuration_loss",
            Self::ThermalThrottling => "thermal_throttling",
            Self::HighLatency => "high_latency",
            Self::PacketLoss => "packet_loss",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A degradation applied to every affected device. The device simulates
/// it; the engine only delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEffect {
    #[serde(rename = "type")]
    pub kind: EffectKind,
    /// What the effect hits (`device`, `network`, `all`, …), informational.
    #[serde(default)]
    pub target: String,
    /// Strength in `[0, 1]`.
    pub severity: f64,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl FaultEffect {
    #[must_use]
    pub fn new(kind: EffectKind, severity: f64) -> Self {
        Self {
            kind,
            target: String::new(),
            severity,
            parameters: Map::new(),
        }
    }

    #[must_use]
    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// The `apply_fault` command carrying this effect.
    #[must_use]
    pub fn command(&self, scenario_severity: Severity, timeout: Duration) -> Command {
        Command::new(APPLY_FAULT, timeout)
            .with_param("effect_type", self.kind.as_str())
            .with_param("severity", self.severity)
            .with_param("scenario_severity", scenario_severity.as_str())
            .with_param("target", self.target.clone())
            .with_param("parameters", Value::Object(self.parameters.clone()))
    }
}

/// One recovery step, sent as a command of type `action` to every affected device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    #[serde(default)]
    pub id: String,
    /// Command type: `restart`, `failover`, `reconfigure`, …
    #[serde(rename = "type")]
    pub action: String,
    /// What the step addresses (`all`, `backup_router`, …), informational.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, with = "crate::time::secs")]
    pub delay: Duration,
    /// Overrides the engine's recovery command timeout.
    #[serde(
        default,
        with = "crate::time::opt_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl RecoveryAction {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            id: action.clone(),
            action,
            target: String::new(),
            parameters: Map::new(),
            delay: Duration::ZERO,
            timeout: None,
        }
    }

    #[must_use]
    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn command(&self, default_timeout: Duration) -> Command {
        Command::new(self.action.clone(), self.timeout.unwrap_or(default_timeout))
            .with_parameters(self.parameters.clone())
            .with_param("target", self.target.clone())
    }
}

impl RuleAction for RecoveryAction {
    fn action_id(&self) -> &str {
        if self.id.is_empty() {
            &self.action
        } else {
            &self.id
        }
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}
