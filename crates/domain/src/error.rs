//! Common error types used across the workspace.
//!
//! Each concern has its own typed error which converts into [`SimHubError`]
//! through `#[from]`, so callers can propagate with `?` and still match on
//! the precise failure.

use std::time::Duration;

/// Top-level error returned by every fallible operation in simhub.
#[derive(Debug, thiserror::Error)]
pub enum SimHubError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    #[error("{entity} {id} is disabled")]
    Disabled { entity: &'static str, id: String },

    #[error("{entity} {id} is already active")]
    AlreadyActive { entity: &'static str, id: String },

    #[error("capacity exceeded: {0}")]
    Capacity(#[from] CapacityError),

    #[error("event bus is not running")]
    BusStopped,

    #[error("{0}")]
    Device(#[from] DeviceError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("failed to parse {format}: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

/// Domain invariant violations detected while building or loading definitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("identifier must not be empty")]
    EmptyId,

    #[error("name must not be empty")]
    EmptyName,

    #[error("at least one action is required")]
    NoActions,

    #[error("at least one step is required")]
    NoSteps,

    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("unknown weekday {0:?}")]
    InvalidWeekday(String),

    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("step id {0:?} appears more than once in the step tree")]
    DuplicateStep(String),

    #[error("step {step:?} is malformed: {reason}")]
    MalformedStep { step: String, reason: String },

    #[error("invalid expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("required parameter {0:?} was not supplied")]
    MissingParameter(String),

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// A lookup by identifier found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A bounded resource refused more work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("event queue full")]
    QueueFull,

    #[error("concurrent script limit reached ({limit})")]
    ConcurrencyLimit { limit: usize },
}

/// A device rejected or failed a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device {device_id} failed: {message}")]
pub struct DeviceError {
    pub device_id: String,
    pub message: String,
}

/// Failures raised while interpreting a script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("step {step} failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("expression {expression:?} failed: {message}")]
    Expression { expression: String, message: String },

    #[error("function {name} failed: {message}")]
    Function { name: String, message: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}
