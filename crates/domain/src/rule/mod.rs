//! Rule: the trigger → condition → action shape shared by automation
//! rules, behavior patterns and daily routines.
//!
//! A [`Rule`] is generic over its trigger and action vocabularies; the
//! condition vocabulary and the folding semantics are common to all of
//! them. Every firing is tracked as an [`ActiveRule`].

mod condition;

pub use condition::{Condition, ConditionKind, Logic, fold_conditions};

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SimHubError, ValidationError};
use crate::id::InstanceId;
use crate::time::{Timestamp, elapsed_between};

fn enabled_by_default() -> bool {
    true
}

/// A definition that fires its actions when any trigger matches and the
/// conditions hold, at most once per `cooldown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule<T, A> {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Vec::new")]
    pub triggers: Vec<T>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<A>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, with = "crate::time::secs")]
    pub cooldown: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<Timestamp>,
}

impl<T, A> Rule<T, A> {
    /// Create a builder for constructing a [`Rule`].
    #[must_use]
    pub fn builder(id: impl Into<String>) -> RuleBuilder<T, A> {
        RuleBuilder {
            id: id.into(),
            name: None,
            description: String::new(),
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            enabled: true,
            priority: 0,
            cooldown: Duration::ZERO,
        }
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] when:
    /// - `id` is empty ([`ValidationError::EmptyId`])
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `actions` is empty ([`ValidationError::NoActions`])
    pub fn validate(&self) -> Result<(), SimHubError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions.into());
        }
        Ok(())
    }

    /// Whether the rule fired less than `cooldown` before `at`.
    #[must_use]
    pub fn is_cooling_down(&self, at: Timestamp) -> bool {
        self.last_triggered
            .is_some_and(|last| elapsed_between(last, at) < self.cooldown)
    }

    /// Whether the evaluation loop may consider this rule at `at`.
    #[must_use]
    pub fn is_ready(&self, at: Timestamp) -> bool {
        self.enabled && !self.is_cooling_down(at)
    }
}

/// Step-by-step builder for [`Rule`].
#[derive(Debug)]
pub struct RuleBuilder<T, A> {
    id: String,
    name: Option<String>,
    description: String,
    triggers: Vec<T>,
    conditions: Vec<Condition>,
    actions: Vec<A>,
    enabled: bool,
    priority: i32,
    cooldown: Duration,
}

impl<T, A> RuleBuilder<T, A> {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: T) -> Self {
        self.triggers.push(trigger);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Consume the builder, validate, and return a [`Rule`].
    ///
    /// The name defaults to the id.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] if the id is empty or no action was given.
    pub fn build(self) -> Result<Rule<T, A>, SimHubError> {
        let rule = Rule {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            description: self.description,
            triggers: self.triggers,
            conditions: self.conditions,
            actions: self.actions,
            enabled: self.enabled,
            priority: self.priority,
            cooldown: self.cooldown,
            last_triggered: None,
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// An action that can run inside a rule firing.
pub trait RuleAction {
    /// Identifier recorded in [`ActiveRule::executed_actions`] / [`ActiveRule::failed_actions`].
    fn action_id(&self) -> &str;

    /// Wait before running the action.
    fn delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Lifecycle of one rule firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Triggered,
    Executing,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl InstanceState {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// An in-flight (or recently finished) firing of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRule {
    pub rule_id: String,
    pub instance_id: InstanceId,
    pub trigger_time: Timestamp,
    pub state: InstanceState,
    pub executed_actions: Vec<String>,
    pub failed_actions: Vec<String>,
    pub errors: Vec<String>,
    pub finished_at: Option<Timestamp>,
}

impl ActiveRule {
    #[must_use]
    pub fn new(rule_id: impl Into<String>, trigger_time: Timestamp) -> Self {
        Self {
            rule_id: rule_id.into(),
            instance_id: InstanceId::new(),
            trigger_time,
            state: InstanceState::Triggered,
            executed_actions: Vec::new(),
            failed_actions: Vec::new(),
            errors: Vec::new(),
            finished_at: None,
        }
    }

    /// Record the outcome of one action.
    pub fn record(&mut self, action_id: &str, outcome: Result<(), &SimHubError>) {
        match outcome {
            Ok(()) => self.executed_actions.push(action_id.to_string()),
            Err(err) => {
                self.failed_actions.push(action_id.to_string());
                self.errors.push(format!("{action_id}: {err}"));
            }
        }
    }

    /// Close the instance: `failed` when any action failed, `completed` otherwise.
    /// A stopped instance stays stopped.
    pub fn finish(&mut self, at: Timestamp) {
        if self.state != InstanceState::Stopped {
            self.state = if self.failed_actions.is_empty() {
                InstanceState::Completed
            } else {
                InstanceState::Failed
            };
        }
        self.finished_at = Some(at);
    }
}

/// Something with an end of life, purged once its retention window passes.
pub trait Finished {
    /// When the instance reached a terminal state, `None` while it is live.
    fn finished_at(&self) -> Option<Timestamp>;
}

impl Finished for ActiveRule {
    fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at.filter(|_| self.state.is_finished())
    }
}

/// Drop every finished instance older than `retention`; live instances are kept.
/// Returns how many were removed.
pub fn purge_finished<K, V>(instances: &mut HashMap<K, V>, at: Timestamp, retention: Duration) -> usize
where
    K: Eq + Hash,
    V: Finished,
{
    let before = instances.len();
    instances.retain(|_, instance| {
        instance
            .finished_at()
            .is_none_or(|done| elapsed_between(done, at) <= retention)
    });
    before - instances.len()
}
