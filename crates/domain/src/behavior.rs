//! Behavior patterns: household-wide activity plans (a workday, a lazy
//! weekend, a party) played against the device fleet.
//!
//! A pattern is a [`Rule`] whose triggers are day kinds and whose actions
//! are [`Activity`] blocks of device interactions.

use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SimHubError;
use crate::rule::{ActiveRule, Finished, Rule, RuleAction};
use crate::time::{Timestamp, after};
use crate::value::check_probability;

fn always() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Workday,
    Weekend,
    Vacation,
    Party,
    Guest,
    Away,
}

/// Days on which the selection sweep may pick a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTrigger {
    /// Monday to Friday.
    Workday,
    /// Saturday and Sunday.
    Weekend,
    Daily,
    /// Only through an explicit trigger call.
    Manual,
}

impl PatternTrigger {
    #[must_use]
    pub fn matches(self, at: &NaiveDateTime) -> bool {
        let weekend = matches!(at.weekday(), Weekday::Sat | Weekday::Sun);
        match self {
            Self::Workday => !weekend,
            Self::Weekend => weekend,
            Self::Daily => true,
            Self::Manual => false,
        }
    }
}

/// One device touched by an activity. With no `device_id`, every device of
/// `device_type` is addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInteraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_type: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl DeviceInteraction {
    #[must_use]
    pub fn on_type(device_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            device_id: None,
            device_type: device_type.into(),
            action: action.into(),
            parameters: Map::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A block of a pattern: interactions issued together, then held for `duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceInteraction>,
    /// Hold time after the interactions, scaled by the simulation speed.
    #[serde(default, with = "crate::time::secs")]
    pub duration: Duration,
    /// Chance in `[0, 1]` that the activity happens at all.
    #[serde(default = "always")]
    pub probability: f64,
    #[serde(default, with = "crate::time::secs")]
    pub delay: Duration,
    /// Simulated bandwidth in Mbps.
    #[serde(default)]
    pub network_usage: f64,
    /// Simulated power draw in W.
    #[serde(default)]
    pub power_usage: f64,
}

impl Activity {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            devices: Vec::new(),
            duration: Duration::ZERO,
            probability: 1.0,
            delay: Duration::ZERO,
            network_usage: 0.0,
            power_usage: 0.0,
        }
    }

    #[must_use]
    pub fn with_device(mut self, interaction: DeviceInteraction) -> Self {
        self.devices.push(interaction);
        self
    }

    #[must_use]
    pub fn lasting(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, network_mbps: f64, power_watts: f64) -> Self {
        self.network_usage = network_mbps;
        self.power_usage = power_watts;
        self
    }
}

impl RuleAction for Activity {
    fn action_id(&self) -> &str {
        &self.id
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorPattern {
    #[serde(flatten)]
    pub rule: Rule<PatternTrigger, Activity>,
    #[serde(rename = "type")]
    pub kind: PatternKind,
    /// Chance in `[0, 1]` that the selection sweep starts the pattern.
    #[serde(default = "always")]
    pub probability: f64,
    /// Upper bound on a run; the sweep completes instances past it.
    #[serde(
        default,
        with = "crate::time::opt_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
}

impl BehaviorPattern {
    #[must_use]
    pub fn new(kind: PatternKind, rule: Rule<PatternTrigger, Activity>) -> Self {
        Self {
            rule,
            kind,
            probability: 1.0,
            duration: None,
        }
    }

    #[must_use]
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid rule or a
    /// probability outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), SimHubError> {
        self.rule.validate()?;
        check_probability("probability", self.probability)?;
        for activity in &self.rule.actions {
            check_probability("activity.probability", activity.probability)?;
        }
        Ok(())
    }

    /// Whether any trigger accepts the given day.
    #[must_use]
    pub fn scheduled_on(&self, at: &NaiveDateTime) -> bool {
        self.rule.triggers.iter().any(|t| t.matches(at))
    }
}

/// One run of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePattern {
    #[serde(flatten)]
    pub run: ActiveRule,
    pub kind: PatternKind,
    pub current_activity: Option<String>,
    pub end_time: Option<Timestamp>,
}

impl ActivePattern {
    #[must_use]
    pub fn new(pattern: &BehaviorPattern, at: Timestamp) -> Self {
        Self {
            run: ActiveRule::new(pattern.id(), at),
            kind: pattern.kind,
            current_activity: None,
            end_time: pattern.duration.map(|d| after(at, d)),
        }
    }

    /// Whether the run outlived the pattern's duration while still live.
    #[must_use]
    pub fn is_overdue(&self, at: Timestamp) -> bool {
        !self.run.state.is_finished() && self.end_time.is_some_and(|end| at > end)
    }
}

impl Finished for ActivePattern {
    fn finished_at(&self) -> Option<Timestamp> {
        self.run.finished_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn on(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn workday_pattern() -> BehaviorPattern {
        let rule = Rule::builder("workday_routine")
            .name("Workday")
            .trigger(PatternTrigger::Workday)
            .action(Activity::new("wake", "Wake up"))
            .build()
            .unwrap();
        BehaviorPattern::new(PatternKind::Workday, rule)
    }

    #[test]
    fn should_match_workday_trigger_on_weekdays_only() {
        // 2024-03-04 is a Monday, 2024-03-09 a Saturday.
        assert!(PatternTrigger::Workday.matches(&on(2024, 3, 4)));
        assert!(!PatternTrigger::Workday.matches(&on(2024, 3, 9)));
        assert!(PatternTrigger::Weekend.matches(&on(2024, 3, 9)));
        assert!(PatternTrigger::Daily.matches(&on(2024, 3, 9)));
        assert!(!PatternTrigger::Manual.matches(&on(2024, 3, 4)));
    }

    #[test]
    fn should_be_scheduled_when_any_trigger_matches() {
        let pattern = workday_pattern();
        assert!(pattern.scheduled_on(&on(2024, 3, 5)));
        assert!(!pattern.scheduled_on(&on(2024, 3, 10)));
    }

    #[test]
    fn should_reject_probability_out_of_range() {
        let mut pattern = workday_pattern();
        pattern.probability = 1.5;
        assert!(matches!(
            pattern.validate(),
            Err(SimHubError::Validation(
                crate::error::ValidationError::OutOfRange { .. }
            ))
        ));
    }

    #[test]
    fn should_be_overdue_only_past_duration_while_live() {
        let pattern = workday_pattern().with_duration(Duration::from_secs(60));
        let t0 = crate::time::now();
        let mut active = ActivePattern::new(&pattern, t0);
        assert!(!active.is_overdue(t0 + chrono::TimeDelta::seconds(30)));
        assert!(active.is_overdue(t0 + chrono::TimeDelta::seconds(61)));
        active.run.finish(t0);
        assert!(!active.is_overdue(t0 + chrono::TimeDelta::seconds(61)));
    }

    #[test]
    fn should_deserialize_pattern_with_flattened_rule() {
        let pattern: BehaviorPattern = serde_json::from_value(json!({
            "id": "house_party",
            "name": "House party",
            "type": "party",
            "triggers": ["manual"],
            "priority": 5,
            "actions": [{
                "id": "music",
                "name": "Music on",
                "devices": [{"device_type": "smart_speaker", "action": "play", "parameters": {"volume": 70}}],
                "duration": 3600,
                "probability": 0.9
            }]
        }))
        .unwrap();
        assert_eq!(pattern.kind, PatternKind::Party);
        assert_eq!(pattern.rule.priority, 5);
        assert!((pattern.probability - 1.0).abs() < f64::EPSILON);
        assert_eq!(pattern.rule.actions[0].duration, Duration::from_secs(3600));
        assert!(pattern.validate().is_ok());
    }
}
