//! Evaluation core shared by the automation, behavior and routine engines.
//!
//! The three engines differ only in their trigger and action vocabularies.
//! What they share lives here:
//!
//! - [`ObservationCache`]: the latest value seen for every `source.property`,
//!   fed by bus events.
//! - [`EvalContext`]: resolves a [`Condition`] against the cache, the wall
//!   clock and the device registry, and folds condition lists.
//! - [`run_sequence`]: executes a rule's actions strictly in order, honoring
//!   delays, pauses and cancellation, recording every outcome.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use simhub_domain::error::SimHubError;
use simhub_domain::event::{Event, WILDCARD};
use simhub_domain::id::InstanceId;
use simhub_domain::rule::{Condition, RuleAction, fold_conditions};
use simhub_domain::time::{TimeOfDay, Timestamp};

use crate::registry::DeviceRegistry;
use crate::runtime::sleep_or_cancel;

/// How often a held (paused) sequence re-checks its gate.
const HOLD_POLL: Duration = Duration::from_millis(250);

// ── Observation cache ──────────────────────────────────────────

/// A value as last seen on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: Value,
    pub at: Timestamp,
}

/// Latest observed value per `source.property` key.
///
/// An event from `motion_1` (a `motion_sensor`) named `motion_detected` with
/// `{"value": true, "zone": "hall"}` is stored under `motion_1.sensor`,
/// `motion_1.motion_detected`, `motion_1.value`, `motion_1.zone`, the same
/// keys with `motion_sensor` and `*` in place of the source.
#[derive(Debug, Default)]
pub struct ObservationCache {
    entries: HashMap<String, Observation>,
}

impl ObservationCache {
    /// Record `event`. `device_type` adds keys under the source's type.
    pub fn observe(&mut self, event: &Event, device_type: Option<&str>, at: Timestamp) {
        let primary = event.primary_value();
        let mut sources = vec![event.source.as_str(), WILDCARD];
        if let Some(device_type) = device_type.filter(|t| *t != event.source) {
            sources.push(device_type);
        }
        for source in sources.into_iter().filter(|s| !s.is_empty()) {
            self.put(format!("{source}.{}", event.event_type), primary.clone(), at);
            if !event.name.is_empty() {
                self.put(format!("{source}.{}", event.name), primary.clone(), at);
            }
            for (field, value) in &event.data {
                self.put(format!("{source}.{field}"), value.clone(), at);
            }
        }
    }

    fn put(&mut self, key: String, value: Value, at: Timestamp) {
        self.entries.insert(key, Observation { value, at });
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Observation> {
        self.entries.get(key)
    }

    /// `source.property`, an empty source reading `*.property`.
    #[must_use]
    pub fn lookup(&self, source: &str, property: &str) -> Option<&Observation> {
        let source = if source.is_empty() { WILDCARD } else { source };
        self.entries.get(&format!("{source}.{property}"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Condition evaluation ───────────────────────────────────────

/// Wall-clock properties: `hour`, `minute`, `time` (`HH:MM`), `weekday`
/// (`Mon`…), `day_of_week` (0–6, Sunday 0) and `weekend`.
#[must_use]
pub fn clock_value(property: &str, wall: &NaiveDateTime) -> Option<Value> {
    let weekday = wall.weekday();
    match property {
        "hour" => Some(wall.hour().into()),
        "minute" => Some(wall.minute().into()),
        "time" => Some(TimeOfDay::of(wall).to_string().into()),
        "weekday" => Some(weekday.to_string().into()),
        "day_of_week" => Some(weekday.num_days_from_sunday().into()),
        "weekend" => Some(matches!(weekday, Weekday::Sat | Weekday::Sun).into()),
        _ => None,
    }
}

/// Everything a condition may read, frozen at one evaluation instant.
pub struct EvalContext<'a> {
    cache: &'a ObservationCache,
    registry: &'a DeviceRegistry,
    wall: NaiveDateTime,
}

impl<'a> EvalContext<'a> {
    #[must_use]
    pub fn new(cache: &'a ObservationCache, registry: &'a DeviceRegistry, wall: NaiveDateTime) -> Self {
        Self {
            cache,
            registry,
            wall,
        }
    }

    /// The value `condition` compares against its target, `None` when unobserved.
    #[must_use]
    pub fn current_value(&self, condition: &Condition) -> Option<Value> {
        if condition.kind.reads_clock() {
            return clock_value(&condition.property, &self.wall);
        }
        match condition.property.as_str() {
            "health" => {
                if let Some(device) = self.registry.get(&condition.source) {
                    return Some(device.health().as_str().into());
                }
            }
            "device_type" => {
                if let Some(device_type) = self.registry.type_of(&condition.source) {
                    return Some(device_type.into());
                }
            }
            _ => {}
        }
        self.cache
            .lookup(&condition.source, &condition.property)
            .map(|observation| observation.value.clone())
    }

    /// An unobserved value never holds, whatever the operator.
    #[must_use]
    pub fn holds(&self, condition: &Condition) -> bool {
        self.current_value(condition)
            .is_some_and(|current| condition.operator.compare(&current, &condition.value))
    }

    /// Left-to-right fold of `conditions`; an empty list holds.
    #[must_use]
    pub fn conditions_hold(&self, conditions: &[Condition]) -> bool {
        fold_conditions(conditions, |condition| self.holds(condition))
    }
}

// ── Action sequencing ──────────────────────────────────────────

/// Whether a running sequence may issue its next action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    /// Paused: wait until the gate opens again.
    Hold,
    /// Stopped: issue nothing more.
    Halt,
}

/// The engine-specific half of [`run_sequence`].
pub trait ActionSink<A>: Send + Sync {
    /// Carry out one action.
    fn perform(&self, instance: InstanceId, action: &A) -> impl Future<Output = Result<(), SimHubError>> + Send;

    /// Store the outcome of one action on the instance.
    fn record(&self, instance: InstanceId, action: &A, outcome: Result<(), &SimHubError>);

    fn gate(&self, _instance: InstanceId) -> Gate {
        Gate::Proceed
    }

    /// Leave an action out of this run without recording it.
    fn skip(&self, _action: &A) -> bool {
        false
    }

    /// Applied to every action delay.
    fn scale(&self, delay: Duration) -> Duration {
        delay
    }
}

/// Run `actions` in declared order. A failing action is recorded and the
/// sequence moves on. Returns `false` when halted or cancelled before the end.
pub async fn run_sequence<A, S>(
    sink: &S,
    instance: InstanceId,
    actions: &[A],
    cancel: &CancellationToken,
) -> bool
where
    A: RuleAction + Sync,
    S: ActionSink<A>,
{
    for action in actions {
        if !sleep_or_cancel(sink.scale(action.delay()), cancel).await {
            return false;
        }
        loop {
            match sink.gate(instance) {
                Gate::Proceed => break,
                Gate::Hold => {
                    if !sleep_or_cancel(HOLD_POLL, cancel).await {
                        return false;
                    }
                }
                Gate::Halt => return false,
            }
        }
        if sink.skip(action) {
            tracing::debug!(instance_id = %instance, action_id = action.action_id(), "action skipped");
            continue;
        }
        let outcome = tokio::select! {
            () = cancel.cancelled() => return false,
            outcome = sink.perform(instance, action) => outcome,
        };
        if let Err(err) = &outcome {
            tracing::warn!(instance_id = %instance, action_id = action.action_id(), error = %err, "action failed");
        }
        sink.record(instance, action, outcome.as_ref().map(|_| ()));
    }
    true
}
