//! Action: the effect performed when an automation rule fires.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rule::RuleAction;

/// What an action does, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Send `command` to a device id, a device type, `all_lights` or `all_devices`.
    DeviceControl {
        target: String,
        command: String,
        #[serde(default)]
        parameters: Map<String, Value>,
    },
    /// Apply a scene by id.
    SceneActivation { target: String },
    /// Log only.
    Notification {
        message: String,
        #[serde(default)]
        target: String,
    },
    /// Pure wait; the wait itself is the action's `delay`.
    Delay,
}

/// One step of a rule's ordered action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, with = "crate::time::secs")]
    pub delay: Duration,
}

impl Action {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn device_control(
        id: impl Into<String>,
        target: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            ActionKind::DeviceControl {
                target: target.into(),
                command: command.into(),
                parameters: Map::new(),
            },
        )
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a command parameter; no-op for actions other than `device_control`.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let ActionKind::DeviceControl { parameters, .. } = &mut self.kind {
            parameters.insert(key.into(), value.into());
        }
        self
    }
}

impl RuleAction for Action {
    fn action_id(&self) -> &str {
        &self.id
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ActionKind::DeviceControl {
                target, command, ..
            } => write!(f, "device_control({command} -> {target})"),
            ActionKind::SceneActivation { target } => write!(f, "scene_activation({target})"),
            ActionKind::Notification { message, .. } => write!(f, "notification({message})"),
            ActionKind::Delay => write!(f, "delay({:?})", self.delay),
        }
    }
}
