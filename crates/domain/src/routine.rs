//! Daily routines: time-windowed action lists (wake-up, leaving for work,
//! bedtime) checked against the wall clock.

use std::fmt;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SimHubError;
use crate::rule::{ActiveRule, Finished, Rule, RuleAction};
use crate::time::{TimeOfDay, Timestamp};

/// Device id addressing every device of the action's type.
pub const ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    Wakeup,
    Morning,
    Daytime,
    Work,
    Evening,
    Night,
    Bedtime,
    Custom,
}

/// `start..end` on the listed weekdays (every day when empty).
/// A window may cross midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
}

impl RoutineWindow {
    #[must_use]
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self {
            start,
            end,
            weekdays: Vec::new(),
        }
    }

    #[must_use]
    pub fn on(mut self, weekdays: &[Weekday]) -> Self {
        self.weekdays = weekdays.to_vec();
        self
    }

    #[must_use]
    pub fn contains(&self, at: &NaiveDateTime) -> bool {
        let day_ok = self.weekdays.is_empty() || self.weekdays.contains(&at.weekday());
        day_ok && TimeOfDay::of(at).within(self.start, self.end)
    }

    #[must_use]
    pub fn length(&self) -> Duration {
        self.start.span_to(self.end)
    }
}

/// Monday to Friday.
pub const WORKDAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineAction {
    pub id: String,
    #[serde(default)]
    pub device_type: String,
    /// A specific device, or [`ALL`] / absent for the whole type group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, with = "crate::time::secs")]
    pub delay: Duration,
}

impl RoutineAction {
    #[must_use]
    pub fn on_type(
        id: impl Into<String>,
        device_type: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            device_id: None,
            command: command.into(),
            parameters: Map::new(),
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The specific device addressed, `None` for the whole type group.
    #[must_use]
    pub fn single_device(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| *id != ALL)
    }
}

impl RuleAction for RoutineAction {
    fn action_id(&self) -> &str {
        &self.id
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRoutine {
    #[serde(flatten)]
    pub rule: Rule<RoutineWindow, RoutineAction>,
    #[serde(rename = "type")]
    pub kind: RoutineKind,
}

impl DailyRoutine {
    #[must_use]
    pub fn new(kind: RoutineKind, rule: Rule<RoutineWindow, RoutineAction>) -> Self {
        Self { rule, kind }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid rule.
    pub fn validate(&self) -> Result<(), SimHubError> {
        self.rule.validate()
    }

    /// The first window covering `at`.
    #[must_use]
    pub fn window_at(&self, at: &NaiveDateTime) -> Option<&RoutineWindow> {
        self.rule.triggers.iter().find(|w| w.contains(at))
    }

    /// Whether any window covers `at`.
    #[must_use]
    pub fn scheduled_at(&self, at: &NaiveDateTime) -> bool {
        self.window_at(at).is_some()
    }
}

/// One run of a routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRoutine {
    #[serde(flatten)]
    pub run: ActiveRule,
    pub kind: RoutineKind,
    pub manual: bool,
}

impl ActiveRoutine {
    #[must_use]
    pub fn new(routine: &DailyRoutine, at: Timestamp, manual: bool) -> Self {
        Self {
            run: ActiveRule::new(routine.id(), at),
            kind: routine.kind,
            manual,
        }
    }
}

impl Finished for ActiveRoutine {
    fn finished_at(&self) -> Option<Timestamp> {
        self.run.finished_at()
    }
}

/// Coarse part of the day derived from the wall-clock hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayMode {
    Morning,
    Daytime,
    Evening,
    Night,
}

impl DayMode {
    /// `morning` 07–09, `daytime` 09–17, `evening` 17–23, `night` otherwise.
    #[must_use]
    pub fn at(at: &NaiveDateTime) -> Self {
        match at.hour() {
            7..=8 => Self::Morning,
            9..=16 => Self::Daytime,
            17..=22 => Self::Evening,
            _ => Self::Night,
        }
    }
}

impl fmt::Display for DayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Morning => "morning",
            Self::Daytime => "daytime",
            Self::Evening => "evening",
            Self::Night => "night",
        })
    }
}
