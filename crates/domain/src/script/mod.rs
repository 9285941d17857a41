//! Scripts: declarative step trees interpreted by the script engine.
//!
//! A [`Script`] owns its [`Step`] tree outright, so cycles cannot be
//! expressed; validation only has to reject duplicate step ids and
//! malformed step payloads. Scripts are authored as JSON or TOML.

mod cron;
mod expr;

pub use cron::CronSchedule;
pub use expr::{Expression, plain, truthy};

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SimHubError, ValidationError};
use crate::event::{Event, EventType};
use crate::id::ExecutionId;
use crate::rule::Finished;
use crate::time::{Timestamp, elapsed_between};

fn enabled_by_default() -> bool {
    true
}

/// Serialized form a script is authored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFormat {
    Json,
    Toml,
}

impl ScriptFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }

    /// Guess the format from a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub steps: Vec<Step>,
    /// Defaults copied into every execution's scope.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub parameters: Vec<ScriptParameter>,
    #[serde(default)]
    pub triggers: Vec<ScriptTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl Script {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: String::new(),
            steps: Vec::new(),
            variables: Map::new(),
            parameters: Vec::new(),
            triggers: Vec::new(),
            schedule: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: ScriptParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: ScriptTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Deserialize a script from `text`.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Parse`] when `text` is not a valid script in
    /// `format`; the result is not yet validated.
    pub fn from_str_as(format: ScriptFormat, text: &str) -> Result<Self, SimHubError> {
        let parse = |message: String| SimHubError::Parse {
            format: format.as_str(),
            message,
        };
        match format {
            ScriptFormat::Json => serde_json::from_str(text).map_err(|e| parse(e.to_string())),
            ScriptFormat::Toml => toml::from_str(text).map_err(|e| parse(e.to_string())),
        }
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] when:
    /// - `id` is empty ([`ValidationError::EmptyId`])
    /// - there are no steps ([`ValidationError::NoSteps`])
    /// - a step id appears twice in the tree ([`ValidationError::DuplicateStep`])
    /// - a step payload is malformed or holds an unparseable expression
    pub fn validate(&self) -> Result<(), SimHubError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        if self.steps.is_empty() {
            return Err(ValidationError::NoSteps.into());
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            step.validate(&mut seen)?;
        }
        Ok(())
    }

    /// Build an execution scope: script variables, then parameter defaults,
    /// then caller-supplied values.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingParameter`] for a required parameter
    /// with neither a default nor a supplied value.
    pub fn scope(&self, supplied: &Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        let mut scope = self.variables.clone();
        for param in &self.parameters {
            if let Some(default) = &param.default_value {
                scope.insert(param.name.clone(), default.clone());
            } else if param.required && !supplied.contains_key(&param.name) {
                return Err(ValidationError::MissingParameter(param.name.clone()));
            }
        }
        scope.extend(supplied.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(scope)
    }

    /// Whether any event trigger accepts `event`.
    #[must_use]
    pub fn triggered_by(&self, event: &Event) -> bool {
        self.triggers.iter().any(|t| t.matches(event))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptParameter {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    Array,
}

// ── Steps ─────────────────────────────────────────────────────

/// How the sequential executor reacts to a failed step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandler {
    /// Record the error and move on.
    #[default]
    Continue,
    /// Abort the execution as failed.
    Stop,
    /// Run the step once more, then behave like `stop`.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default, with = "crate::time::secs")]
    pub delay: Duration,
    #[serde(default, with = "crate::time::opt_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub error_handler: ErrorHandler,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Action {
        action: ScriptAction,
    },
    Condition {
        condition: ScriptCondition,
    },
    Loop {
        #[serde(rename = "loop")]
        body: Loop,
    },
    /// Children run concurrently; the first error is reported once all finish.
    Parallel {
        steps: Vec<Step>,
    },
    Sequence {
        steps: Vec<Step>,
    },
}

impl StepKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action { .. } => "action",
            Self::Condition { .. } => "condition",
            Self::Loop { .. } => "loop",
            Self::Parallel { .. } => "parallel",
            Self::Sequence { .. } => "sequence",
        }
    }
}

impl Step {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind,
            delay: Duration::ZERO,
            timeout: None,
            error_handler: ErrorHandler::default(),
        }
    }

    #[must_use]
    pub fn action(id: impl Into<String>, action: ScriptAction) -> Self {
        Self::new(id, StepKind::Action { action })
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidExpression`] if `expression` does not parse.
    pub fn condition(
        id: impl Into<String>,
        expression: &str,
        true_steps: Vec<Step>,
        false_steps: Vec<Step>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(
            id,
            StepKind::Condition {
                condition: ScriptCondition {
                    expression: expression.parse()?,
                    true_steps,
                    false_steps,
                },
            },
        ))
    }

    #[must_use]
    pub fn looping(id: impl Into<String>, body: Loop) -> Self {
        Self::new(id, StepKind::Loop { body })
    }

    #[must_use]
    pub fn parallel(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(id, StepKind::Parallel { steps })
    }

    #[must_use]
    pub fn sequence(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(id, StepKind::Sequence { steps })
    }

    #[must_use]
    pub fn on_error(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Direct children, in every branch.
    pub fn children(&self) -> impl Iterator<Item = &Step> {
        let (first, second): (&[Step], &[Step]) = match &self.kind {
            StepKind::Action { .. } => (&[], &[]),
            StepKind::Condition { condition } => {
                (condition.true_steps.as_slice(), condition.false_steps.as_slice())
            }
            StepKind::Loop { body } => (body.steps(), &[]),
            StepKind::Parallel { steps } | StepKind::Sequence { steps } => (steps.as_slice(), &[]),
        };
        first.iter().chain(second)
    }

    fn validate(&self, seen: &mut HashSet<String>) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if !seen.insert(self.id.clone()) {
            return Err(ValidationError::DuplicateStep(self.id.clone()));
        }
        let malformed = |reason: &str| ValidationError::MalformedStep {
            step: self.id.clone(),
            reason: reason.to_string(),
        };
        match &self.kind {
            StepKind::Action { action } => action.validate().map_err(&malformed)?,
            StepKind::Loop { body: Loop::Foreach { variable, .. } } if variable.is_empty() => {
                return Err(malformed("foreach loop needs a variable name"));
            }
            StepKind::Parallel { steps } | StepKind::Sequence { steps } if steps.is_empty() => {
                return Err(malformed("block has no steps"));
            }
            _ => {}
        }
        for child in self.children() {
            child.validate(seen)?;
        }
        Ok(())
    }
}

/// Sub-handler an `action` step dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Send `method` to `target` (device id or type group).
    Device,
    /// Ask the automation engine to activate scene `target`.
    Scene,
    /// Sleep `parameters.duration` seconds.
    Wait,
    /// Append `parameters.message` to the output.
    Log,
    /// Store `parameters.value` into `result`.
    Variable,
    /// Call the registered function `method` with `parameters`.
    Function,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Device => "device",
            Self::Scene => "scene",
            Self::Wait => "wait",
            Self::Log => "log",
            Self::Variable => "variable",
            Self::Function => "function",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub method: String,
    /// Values of the exact form `${name}` are replaced from the scope.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Variable receiving the action's return value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ScriptAction {
    #[must_use]
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            target: String::new(),
            method: String::new(),
            parameters: Map::new(),
            result: None,
        }
    }

    #[must_use]
    pub fn device(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            ..Self::new(ActionKind::Device)
        }
    }

    #[must_use]
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            method: name.into(),
            ..Self::new(ActionKind::Function)
        }
    }

    #[must_use]
    pub fn log(message: impl Into<String>) -> Self {
        Self::new(ActionKind::Log).with_param("message", message.into())
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn into_result(mut self, variable: impl Into<String>) -> Self {
        self.result = Some(variable.into());
        self
    }

    fn validate(&self) -> Result<(), &'static str> {
        match self.kind {
            ActionKind::Device if self.target.is_empty() || self.method.is_empty() => {
                Err("device action needs a target and a method")
            }
            ActionKind::Scene if self.target.is_empty() => Err("scene action needs a target"),
            ActionKind::Function if self.method.is_empty() => {
                Err("function action needs a method")
            }
            ActionKind::Variable if self.result.is_none() => {
                Err("variable action needs a result name")
            }
            _ => Ok(()),
        }
    }

    /// Parameters with every exact `${name}` value replaced from `scope`.
    /// References to unknown names are left as written.
    #[must_use]
    pub fn resolve_parameters(&self, scope: &Map<String, Value>) -> Map<String, Value> {
        self.parameters
            .iter()
            .map(|(key, value)| (key.clone(), substitute(value, scope)))
            .collect()
    }
}

/// Replace `value` when it is exactly `${name}` and `name` is in scope.
#[must_use]
pub fn substitute(value: &Value, scope: &Map<String, Value>) -> Value {
    value
        .as_str()
        .and_then(|s| s.strip_prefix("${"))
        .and_then(|s| s.strip_suffix('}'))
        .filter(|name| !name.is_empty())
        .and_then(|name| scope.get(name))
        .unwrap_or(value)
        .clone()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptCondition {
    #[serde(with = "expression_str")]
    pub expression: Expression,
    #[serde(default)]
    pub true_steps: Vec<Step>,
    #[serde(default)]
    pub false_steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Loop {
    /// Run `steps` `count` times, exposing `index`.
    For { count: u32, steps: Vec<Step> },
    /// Re-evaluate `condition` before each pass.
    While {
        #[serde(with = "expression_str")]
        condition: Expression,
        steps: Vec<Step>,
    },
    /// Bind each item to `variable`, exposing `index`.
    Foreach {
        variable: String,
        items: Vec<Value>,
        steps: Vec<Step>,
    },
}

impl Loop {
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        match self {
            Self::For { steps, .. } | Self::While { steps, .. } | Self::Foreach { steps, .. } => steps,
        }
    }
}

/// Expressions travel as their source text and are parsed on load.
mod expression_str {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Expression;

    pub fn serialize<S: Serializer>(expr: &Expression, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(expr.source())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Expression, D::Error> {
        let source = String::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}

// ── Triggers and schedules ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptTrigger {
    /// Fire on a bus event of `event_type`, optionally narrowed to `name`.
    Event {
        event_type: EventType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Manual,
}

impl ScriptTrigger {
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Event { event_type, name } => {
                *event_type == event.event_type
                    && name.as_ref().is_none_or(|n| *n == event.name)
            }
            Self::Manual => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Run once, at the first sweep at or after `at`.
    Once { at: Timestamp },
    /// Run every `interval` within the optional `[start, end]` window.
    Recurring {
        #[serde(with = "crate::time::secs")]
        interval: Duration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<Timestamp>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<Timestamp>,
    },
    /// Run in every wall-clock minute the expression selects.
    Cron { expression: CronSchedule },
}

impl Schedule {
    /// Whether the scheduler sweep should start a run now.
    ///
    /// `last_run` is when the scheduler last started this script; `wall` is
    /// the local time used for cron matching.
    #[must_use]
    pub fn is_due(&self, at: Timestamp, wall: &NaiveDateTime, last_run: Option<Timestamp>) -> bool {
        match self {
            Self::Once { at: when } => last_run.is_none() && at >= *when,
            Self::Recurring {
                interval,
                start,
                end,
            } => {
                let in_window =
                    start.is_none_or(|s| at >= s) && end.is_none_or(|e| at <= e);
                in_window && last_run.is_none_or(|last| elapsed_between(last, at) >= *interval)
            }
            Self::Cron { expression } => {
                expression.matches(wall)
                    && last_run.is_none_or(|last| elapsed_between(last, at) >= Duration::from_secs(60))
            }
        }
    }
}

// ── Executions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a script with its own variable scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptExecution {
    pub script_id: String,
    pub execution_id: ExecutionId,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub state: ExecutionState,
    pub current_step: Option<String>,
    pub variables: Map<String, Value>,
    /// Ids of the steps currently being executed, outermost first.
    pub stack: Vec<String>,
    pub output: Vec<String>,
    pub errors: Vec<String>,
}

impl ScriptExecution {
    #[must_use]
    pub fn new(script_id: impl Into<String>, variables: Map<String, Value>, at: Timestamp) -> Self {
        Self {
            script_id: script_id.into(),
            execution_id: ExecutionId::new(),
            start_time: at,
            end_time: None,
            state: ExecutionState::Running,
            current_step: None,
            variables,
            stack: Vec::new(),
            output: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Move to a terminal state. The first terminal state wins, so a
    /// cancelled execution stays cancelled when its task winds down.
    pub fn finish(&mut self, state: ExecutionState, at: Timestamp) -> bool {
        if self.state.is_finished() || !state.is_finished() {
            return false;
        }
        self.state = state;
        self.end_time = Some(at);
        self.stack.clear();
        true
    }

    /// Wall time from start to end, `None` while running.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| elapsed_between(self.start_time, end))
    }
}

impl Finished for ScriptExecution {
    fn finished_at(&self) -> Option<Timestamp> {
        self.end_time.filter(|_| self.state.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;
    use chrono::{NaiveDate, TimeDelta};
    use serde_json::json;

    fn log_step(id: &str) -> Step {
        Step::action(id, ScriptAction::log("hello"))
    }

    // ── Validation ────────────────────────────────────────────────

    #[test]
    fn should_reject_script_without_steps() {
        let script = Script::new("s", "Empty");
        assert!(matches!(
            script.validate(),
            Err(SimHubError::Validation(ValidationError::NoSteps))
        ));
    }

    #[test]
    fn should_reject_duplicate_step_ids_across_nesting_levels() {
        let script = Script::new("s", "Dup").with_step(Step::sequence(
            "outer",
            vec![log_step("a"), Step::parallel("inner", vec![log_step("a")])],
        ));
        assert!(matches!(
            script.validate(),
            Err(SimHubError::Validation(ValidationError::DuplicateStep(id))) if id == "a"
        ));
    }

    #[test]
    fn should_reject_device_action_without_method() {
        let script =
            Script::new("s", "Bad").with_step(Step::action("d", ScriptAction::device("bulb", "")));
        assert!(matches!(
            script.validate(),
            Err(SimHubError::Validation(ValidationError::MalformedStep { .. }))
        ));
    }

    #[test]
    fn should_accept_nested_tree_with_unique_ids() {
        let script = Script::new("s", "Ok").with_step(
            Step::condition("c", "armed", vec![log_step("t")], vec![log_step("f")]).unwrap(),
        );
        assert!(script.validate().is_ok());
    }

    // ── Scope ─────────────────────────────────────────────────────

    #[test]
    fn should_layer_variables_defaults_and_supplied_parameters() {
        let script = Script::new("s", "Scope")
            .with_variable("brightness", 50)
            .with_variable("room", "hall")
            .with_parameter(ScriptParameter {
                name: "room".to_string(),
                kind: ParameterKind::String,
                required: false,
                default_value: Some(json!("kitchen")),
                description: String::new(),
            });
        let supplied = json!({"brightness": 80}).as_object().cloned().unwrap();
        let scope = script.scope(&supplied).unwrap();
        assert_eq!(scope["brightness"], json!(80));
        assert_eq!(scope["room"], json!("kitchen"));
    }

    #[test]
    fn should_reject_missing_required_parameter() {
        let script = Script::new("s", "Req").with_parameter(ScriptParameter {
            name: "target".to_string(),
            kind: ParameterKind::String,
            required: true,
            default_value: None,
            description: String::new(),
        });
        assert_eq!(
            script.scope(&Map::new()),
            Err(ValidationError::MissingParameter("target".to_string()))
        );
    }

    // ── Substitution ──────────────────────────────────────────────

    #[test]
    fn should_substitute_only_exact_placeholders() {
        let scope = json!({"level": 75}).as_object().cloned().unwrap();
        let action = ScriptAction::device("bulb", "set_brightness")
            .with_param("brightness", "${level}")
            .with_param("label", "level ${level}")
            .with_param("other", "${unknown}");
        let params = action.resolve_parameters(&scope);
        assert_eq!(params["brightness"], json!(75));
        assert_eq!(params["label"], json!("level ${level}"));
        assert_eq!(params["other"], json!("${unknown}"));
    }

    // ── Serialization ─────────────────────────────────────────────

    #[test]
    fn should_load_script_from_json() {
        let text = r#"{
            "id": "evening",
            "name": "Evening",
            "variables": {"count": 0},
            "steps": [
                {"id": "dim", "type": "action", "action": {"type": "device", "target": "smart_bulb", "method": "set_brightness", "parameters": {"brightness": 30}}, "error_handler": "retry"},
                {"id": "repeat", "type": "loop", "loop": {"type": "for", "count": 3, "steps": [
                    {"id": "say", "type": "action", "action": {"type": "log", "parameters": {"message": "tick"}}}
                ]}},
                {"id": "check", "type": "condition", "condition": {"expression": "count < 3", "true_steps": []}}
            ],
            "schedule": {"type": "cron", "expression": "0 19 * * *"}
        }"#;
        let script = Script::from_str_as(ScriptFormat::Json, text).unwrap();
        assert!(script.validate().is_ok());
        assert_eq!(script.steps[0].error_handler, ErrorHandler::Retry);
        assert!(matches!(script.steps[1].kind, StepKind::Loop { body: Loop::For { count: 3, .. } }));
        assert!(matches!(script.schedule, Some(Schedule::Cron { .. })));
    }

    #[test]
    fn should_load_script_from_toml() {
        let text = r#"
            id = "wake"
            name = "Wake"

            [[steps]]
            id = "lights"
            type = "action"
            delay = 1.5
            [steps.action]
            type = "device"
            target = "all_lights"
            method = "turn_on"

            [[triggers]]
            type = "event"
            event_type = "presence"
            name = "arrived"
        "#;
        let script = Script::from_str_as(ScriptFormat::Toml, text).unwrap();
        assert_eq!(script.steps[0].delay, Duration::from_millis(1500));
        let event = Event::new(EventType::Presence, "phone", "arrived");
        assert!(script.triggered_by(&event));
    }

    #[test]
    fn should_report_parse_error_with_format() {
        let err = Script::from_str_as(ScriptFormat::Json, "{").unwrap_err();
        assert!(matches!(err, SimHubError::Parse { format: "json", .. }));
    }

    #[test]
    fn should_fail_to_load_unparseable_condition_expression() {
        let text = r#"{"id": "s", "steps": [{"id": "c", "type": "condition", "condition": {"expression": "1 +"}}]}"#;
        assert!(Script::from_str_as(ScriptFormat::Json, text).is_err());
    }

    // ── Schedules ─────────────────────────────────────────────────

    #[test]
    fn should_run_once_schedule_a_single_time() {
        let t0 = now();
        let wall = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let schedule = Schedule::Once { at: t0 };
        assert!(!schedule.is_due(t0 - TimeDelta::seconds(1), &wall, None));
        assert!(schedule.is_due(t0, &wall, None));
        assert!(!schedule.is_due(t0 + TimeDelta::seconds(90), &wall, Some(t0)));
    }

    #[test]
    fn should_run_recurring_schedule_every_interval_inside_window() {
        let t0 = now();
        let wall = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let schedule = Schedule::Recurring {
            interval: Duration::from_secs(60),
            start: None,
            end: Some(t0 + TimeDelta::minutes(10)),
        };
        assert!(schedule.is_due(t0, &wall, None));
        assert!(!schedule.is_due(t0 + TimeDelta::seconds(30), &wall, Some(t0)));
        assert!(schedule.is_due(t0 + TimeDelta::seconds(60), &wall, Some(t0)));
        assert!(!schedule.is_due(t0 + TimeDelta::minutes(11), &wall, Some(t0)));
    }

    #[test]
    fn should_run_cron_schedule_once_per_matching_minute() {
        let t0 = now();
        let schedule = Schedule::Cron {
            expression: "30 7 * * *".parse().unwrap(),
        };
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let matching = day.and_hms_opt(7, 30, 10).unwrap();
        assert!(schedule.is_due(t0, &matching, None));
        assert!(!schedule.is_due(t0 + TimeDelta::seconds(20), &matching, Some(t0)));
        assert!(!schedule.is_due(t0, &day.and_hms_opt(7, 31, 0).unwrap(), None));
    }

    // ── Executions ────────────────────────────────────────────────

    #[test]
    fn should_keep_first_terminal_state() {
        let mut execution = ScriptExecution::new("s", Map::new(), now());
        assert!(execution.finish(ExecutionState::Cancelled, now()));
        assert!(!execution.finish(ExecutionState::Completed, now()));
        assert_eq!(execution.state, ExecutionState::Cancelled);
        assert!(execution.duration().is_some());
        assert!(execution.finished_at().is_some());
    }

    #[test]
    fn should_not_finish_into_non_terminal_state() {
        let mut execution = ScriptExecution::new("s", Map::new(), now());
        assert!(!execution.finish(ExecutionState::Paused, now()));
        assert_eq!(execution.state, ExecutionState::Running);
        assert!(execution.finished_at().is_none());
    }
}
