//! Fault scenarios: declarative failure modes, their blast radius, the
//! effects pushed to devices and the procedure that recovers from them.
//!
//! Definitions are immutable once loaded. Each firing becomes an
//! [`ActiveScenario`] moving `active → recovering → resolved`.

mod effect;
mod event;
mod instance;

pub use effect::{EffectKind, FaultEffect, RecoveryAction};
pub use event::{FaultEvent, FaultEventKind};
pub use instance::{
    ActiveScenario, ImpactAssessment, ScenarioState, VerificationOutcome, availability,
};

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SimHubError, ValidationError};
use crate::rule::Condition;
use crate::value::check_probability;

/// Affected-device pattern matching every device.
pub const ALL_DEVICES: &str = "all";

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Coarse business-impact label used by impact assessments.
    #[must_use]
    pub fn business_impact(self) -> &'static str {
        match self {
            Self::Critical => "Complete service outage",
            Self::High => "Major service degradation",
            Self::Medium => "Moderate service impact",
            Self::Low => "Minor service impact",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    PowerFailure,
    DeviceFailure,
    NetworkOutage,
    NetworkIssue,
    SecurityIncident,
    SoftwareBug,
    SoftwareFailure,
    Environmental,
    DataCorruption,
}

impl FaultKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerFailure => "power_failure",
            Self::DeviceFailure => "device_failure",
            Self::NetworkOutage => "network_outage",
            Self::NetworkIssue => "network_issue",
            Self::SecurityIncident => "security_incident",
            Self::SoftwareBug => "software_bug",
            Self::SoftwareFailure => "software_failure",
            Self::Environmental => "environmental",
            Self::DataCorruption => "data_corruption",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultScenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: FaultKind,
    pub severity: Severity,
    /// Chance in `[0, 1]` per probability sweep.
    #[serde(default)]
    pub probability: f64,
    /// Time spent `active` before recovery starts.
    #[serde(with = "crate::time::secs")]
    pub duration: Duration,
    /// Expected time to recover, reported in the impact assessment.
    #[serde(default, with = "crate::time::secs")]
    pub recovery_time: Duration,
    /// Device ids or device types, or [`ALL_DEVICES`]. Empty means a random sample.
    #[serde(default)]
    pub affected_devices: Vec<String>,
    /// Must all hold for the probability sweep to consider the scenario.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub effects: Vec<FaultEffect>,
    #[serde(default)]
    pub recovery_actions: Vec<RecoveryAction>,
    /// Scenarios triggered on the same devices once this one fired.
    /// No cycle detection: a catalogue whose cascades reference each
    /// other keeps re-triggering.
    #[serde(default)]
    pub cascade_scenarios: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl FaultScenario {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: FaultKind,
        severity: Severity,
        duration: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind,
            severity,
            probability: 0.0,
            duration,
            recovery_time: Duration::ZERO,
            affected_devices: Vec::new(),
            conditions: Vec::new(),
            effects: Vec::new(),
            recovery_actions: Vec::new(),
            cascade_scenarios: Vec::new(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    #[must_use]
    pub fn with_recovery_time(mut self, recovery_time: Duration) -> Self {
        self.recovery_time = recovery_time;
        self
    }

    #[must_use]
    pub fn affecting(mut self, pattern: impl Into<String>) -> Self {
        self.affected_devices.push(pattern.into());
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_effect(mut self, effect: FaultEffect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_recovery(mut self, action: RecoveryAction) -> Self {
        self.recovery_actions.push(action);
        self
    }

    #[must_use]
    pub fn cascading_to(mut self, scenario_id: impl Into<String>) -> Self {
        self.cascade_scenarios.push(scenario_id.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an empty id or name, or a
    /// probability or effect severity outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), SimHubError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        check_probability("probability", self.probability)?;
        for effect in &self.effects {
            check_probability("effect.severity", effect.severity)?;
        }
        Ok(())
    }

    /// Whether a device is named by the affected-device patterns, by id or by type.
    #[must_use]
    pub fn targets(&self, device_id: &str, device_type: &str) -> bool {
        self.affected_devices
            .iter()
            .any(|p| p == ALL_DEVICES || p == device_id || p == device_type)
    }

    /// Whether any declared effect loses data.
    #[must_use]
    pub fn loses_data(&self) -> bool {
        self.effects.iter().any(|e| e.kind == EffectKind::DataLoss)
    }
}
