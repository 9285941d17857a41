//! Scene: a named target configuration of several devices, optionally
//! applied through a paced transition.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SimHubError, ValidationError};
use crate::id::InstanceId;
use crate::rule::Finished;
use crate::time::{Timestamp, after};

fn enabled_by_default() -> bool {
    true
}

/// Desired state for one device (`device_id`) or a whole type group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Sent as the command type.
    pub state: String,
    /// Sent as the command parameters.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl DeviceState {
    #[must_use]
    pub fn for_type(device_type: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            device_id: None,
            device_type: Some(device_type.into()),
            state: state.into(),
            properties: Map::new(),
        }
    }

    #[must_use]
    pub fn for_device(device_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            device_type: None,
            state: state.into(),
            properties: Map::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// A set `device_id` selects that device only; otherwise every device of
    /// `device_type` matches.
    #[must_use]
    pub fn matches(&self, device_id: &str, device_type: &str) -> bool {
        match &self.device_id {
            Some(id) => id == device_id,
            None => self.device_type.as_deref() == Some(device_type),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

/// A paced change from one level to another. Only the pacing is simulated:
/// the transition sleeps `duration / steps` per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(with = "crate::time::secs")]
    pub duration: Duration,
    #[serde(default)]
    pub curve: Curve,
    /// Defaults to one step per second of `duration`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

impl Transition {
    #[must_use]
    pub fn step_count(&self) -> u32 {
        self.steps
            .unwrap_or_else(|| u32::try_from(self.duration.as_secs()).unwrap_or(u32::MAX))
            .max(1)
    }

    #[must_use]
    pub fn step_interval(&self) -> Duration {
        self.duration / self.step_count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub device_states: Vec<DeviceState>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Scenes with a duration end on their own.
    #[serde(
        default,
        with = "crate::time::opt_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl Scene {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            device_states: Vec::new(),
            transitions: Vec::new(),
            duration: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: DeviceState) -> Self {
        self.device_states.push(state);
        self
    }

    #[must_use]
    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] when the id or name is empty.
    pub fn validate(&self) -> Result<(), SimHubError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneState {
    Activating,
    Active,
    Ended,
}

/// One application of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveScene {
    pub scene_id: String,
    pub instance_id: InstanceId,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub state: SceneState,
    pub current_step: u32,
    /// Device id → state applied.
    pub device_states: BTreeMap<String, String>,
    pub ended_at: Option<Timestamp>,
}

impl ActiveScene {
    #[must_use]
    pub fn new(scene: &Scene, start_time: Timestamp) -> Self {
        Self {
            scene_id: scene.id.clone(),
            instance_id: InstanceId::new(),
            start_time,
            end_time: scene.duration.filter(|d| !d.is_zero()).map(|d| after(start_time, d)),
            state: SceneState::Activating,
            current_step: 0,
            device_states: BTreeMap::new(),
            ended_at: None,
        }
    }

    /// Whether a timed scene has reached its end time.
    #[must_use]
    pub fn is_due(&self, at: Timestamp) -> bool {
        self.state != SceneState::Ended && self.end_time.is_some_and(|end| at >= end)
    }

    pub fn end(&mut self, at: Timestamp) {
        self.state = SceneState::Ended;
        self.ended_at = Some(at);
    }
}

impl Finished for ActiveScene {
    fn finished_at(&self) -> Option<Timestamp> {
        self.ended_at.filter(|_| self.state == SceneState::Ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;
    use chrono::TimeDelta;
    use serde_json::json;

    #[test]
    fn should_match_device_state_by_id_or_type() {
        let by_type = DeviceState::for_type("smart_bulb", "turn_on");
        assert!(by_type.matches("bulb_1", "smart_bulb"));
        assert!(!by_type.matches("plug_1", "smart_plug"));

        let by_id = DeviceState {
            device_id: Some("tv".to_string()),
            ..DeviceState::for_type("smart_tv", "turn_on")
        };
        assert!(by_id.matches("tv", "anything"));
        assert!(!by_id.matches("bedroom_tv", "smart_tv"));
    }

    #[test]
    fn should_default_transition_to_one_step_per_second() {
        let t = Transition {
            from: "100".to_string(),
            to: "20".to_string(),
            duration: Duration::from_secs(4),
            curve: Curve::Linear,
            steps: None,
        };
        assert_eq!(t.step_count(), 4);
        assert_eq!(t.step_interval(), Duration::from_secs(1));
    }

    #[test]
    fn should_use_at_least_one_step() {
        let t = Transition {
            from: String::new(),
            to: String::new(),
            duration: Duration::from_millis(200),
            curve: Curve::EaseIn,
            steps: None,
        };
        assert_eq!(t.step_count(), 1);
        assert_eq!(t.step_interval(), Duration::from_millis(200));
    }

    #[test]
    fn should_set_end_time_only_for_timed_scenes() {
        let t0 = now();
        let untimed = ActiveScene::new(&Scene::new("s", "S"), t0);
        assert!(untimed.end_time.is_none());
        assert!(!untimed.is_due(t0 + TimeDelta::days(1)));

        let timed = ActiveScene::new(&Scene::new("s", "S").with_duration(Duration::from_secs(60)), t0);
        assert!(!timed.is_due(t0 + TimeDelta::seconds(59)));
        assert!(timed.is_due(t0 + TimeDelta::seconds(60)));
    }

    #[test]
    fn should_report_finished_only_once_ended() {
        let t0 = now();
        let mut scene = ActiveScene::new(&Scene::new("s", "S"), t0);
        assert!(scene.finished_at().is_none());
        scene.end(t0);
        assert_eq!(scene.finished_at(), Some(t0));
    }

    #[test]
    fn should_deserialize_scene_from_json() {
        let scene: Scene = serde_json::from_value(json!({
            "id": "movie_night",
            "name": "Movie night",
            "device_states": [
                {"device_type": "smart_bulb", "state": "set_brightness", "properties": {"brightness": 20}}
            ],
            "transitions": [{"from": "100", "to": "20", "duration": 3}],
            "duration": 7200
        }))
        .unwrap();
        assert!(scene.enabled);
        assert_eq!(scene.duration, Some(Duration::from_secs(7200)));
        assert_eq!(scene.transitions[0].curve, Curve::Linear);
        assert!(scene.validate().is_ok());
    }
}
