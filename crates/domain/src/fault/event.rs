//! Fault history entries, retained for reporting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::{EventId, InstanceId};
use crate::time::{Timestamp, now};

use super::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultEventKind {
    ScenarioTriggered,
    EffectApplied,
    CascadeTriggered,
    RecoveryStarted,
    RecoveryAttempt,
    RecoveryExhausted,
    ScenarioResolved,
}

impl FaultEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScenarioTriggered => "scenario_triggered",
            Self::EffectApplied => "effect_applied",
            Self::CascadeTriggered => "cascade_triggered",
            Self::RecoveryStarted => "recovery_started",
            Self::RecoveryAttempt => "recovery_attempt",
            Self::RecoveryExhausted => "recovery_exhausted",
            Self::ScenarioResolved => "scenario_resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEvent {
    pub id: EventId,
    pub scenario_id: String,
    pub instance_id: InstanceId,
    #[serde(rename = "type")]
    pub kind: FaultEventKind,
    pub severity: Severity,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl FaultEvent {
    #[must_use]
    pub fn new(
        kind: FaultEventKind,
        scenario_id: impl Into<String>,
        instance_id: InstanceId,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            scenario_id: scenario_id.into(),
            instance_id,
            kind,
            severity,
            timestamp: now(),
            device_id: None,
            description: description.into(),
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn for_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
