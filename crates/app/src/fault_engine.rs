//! Fault engine: fires fault scenarios against the fleet, pushes their
//! effects, cascades into follow-up scenarios and drives recovery.
//!
//! An instance moves `active → recovering → resolved`. Recovery starts once
//! the scenario's duration elapses: recovery actions run in order, then a
//! verification pass on every recovery tick checks device health until all
//! affected devices are healthy or the attempt cap is reached. Every step
//! lands in a bounded history and on the bus as a `fault.*` event.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use rand::seq::IndexedRandom;
use serde::Serialize;
use serde_json::Value;

use simhub_domain::error::{NotFoundError, SimHubError};
use simhub_domain::event::{Event, EventType, WILDCARD};
use simhub_domain::fault::{
    ActiveScenario, FaultEvent, FaultEventKind, FaultKind, FaultScenario, RecoveryAction,
    ScenarioState, Severity, VerificationOutcome, availability,
};
use simhub_domain::id::{HandlerId, InstanceId};
use simhub_domain::rule::{RuleAction, purge_finished};
use simhub_domain::time::{elapsed_between, now, wall_clock};

use crate::config::FaultConfig;
use crate::event_bus::{EventBus, EventHandler};
use crate::ports::{Device, EventPublisher};
use crate::registry::{DeviceRegistry, broadcast, send};
use crate::rule_engine::{ActionSink, EvalContext, Gate, ObservationCache, run_sequence};
use crate::runtime::{Lifecycle, read, sleep_or_cancel, spawn_periodic, write};

const SOURCE: &str = "fault_engine";

/// Aggregate view over every scenario fired since start.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImpactReport {
    pub total_triggered: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub active: usize,
    pub recovering: usize,
    pub resolved: u64,
    pub exhausted: u64,
    pub cascades: u64,
    /// Distinct devices under a live scenario.
    pub affected_devices: usize,
    /// Share of the fleet outside any live scenario, in percent.
    pub availability: f64,
    pub recovery_actions_executed: u64,
    pub recovery_actions_failed: u64,
    pub events_retained: usize,
}

#[derive(Default)]
struct Totals {
    triggered: u64,
    by_severity: BTreeMap<Severity, u64>,
    by_kind: BTreeMap<FaultKind, u64>,
    resolved: u64,
    exhausted: u64,
    cascades: u64,
    recovery_actions_executed: u64,
    recovery_actions_failed: u64,
}

#[derive(Default)]
struct State {
    scenarios: BTreeMap<String, FaultScenario>,
    active: HashMap<InstanceId, ActiveScenario>,
    history: VecDeque<FaultEvent>,
    cache: ObservationCache,
    totals: Totals,
}

impl State {
    fn is_live(&self, scenario_id: &str) -> bool {
        self.active
            .values()
            .any(|a| a.scenario_id == scenario_id && a.state != ScenarioState::Resolved)
    }
}

struct Inner<P> {
    config: FaultConfig,
    registry: DeviceRegistry,
    publisher: P,
    state: RwLock<State>,
    lifecycle: Lifecycle,
}

/// Chaos engine for the simulated fleet.
pub struct FaultEngine<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for FaultEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> FaultEngine<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    pub fn new(config: FaultConfig, registry: DeviceRegistry, publisher: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                publisher,
                state: RwLock::new(State::default()),
                lifecycle: Lifecycle::default(),
            }),
        }
    }

    /// Start the check, recovery and random-failure loops.
    pub fn start(&self) {
        let Some(cancel) = self.inner.lifecycle.begin() else {
            return;
        };
        let config = &self.inner.config;

        let engine = self.clone();
        spawn_periodic("fault.check", config.check_interval, cancel.clone(), move || {
            engine.check();
            async {}
        });
        let engine = self.clone();
        spawn_periodic("fault.recovery", config.recovery_interval, cancel.clone(), move || {
            engine.verify();
            async {}
        });
        let engine = self.clone();
        spawn_periodic("fault.random", config.random_failure_interval, cancel, move || {
            engine.sample_random_failure();
            async {}
        });
        tracing::info!(
            scenarios = read(&self.inner.state).scenarios.len(),
            auto_recovery = config.auto_recovery,
            cascades = config.cascade_enabled,
            "fault engine started"
        );
    }

    pub fn stop(&self) {
        if self.inner.lifecycle.end() {
            tracing::info!("fault engine stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    /// # Errors
    ///
    /// Propagates subscription failures.
    pub fn attach(&self, bus: &EventBus) -> Result<HandlerId, SimHubError> {
        let engine = self.clone();
        bus.subscribe(
            WILDCARD,
            EventHandler::sync(SOURCE, move |event: &Event| engine.handle_event(event)),
        )
    }

    /// Observe an event for scenario conditions. The engine's own `fault.*`
    /// events are not observed.
    pub fn handle_event(&self, event: &Event) {
        if event.source == SOURCE {
            return;
        }
        let device_type = self.inner.registry.type_of(&event.source);
        write(&self.inner.state)
            .cache
            .observe(event, device_type.as_deref(), now());
    }

    // ── Scenarios ──────────────────────────────────────────────────

    /// Add or replace a scenario definition.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid scenario.
    #[tracing::instrument(skip(self, scenario), fields(scenario_id = %scenario.id))]
    pub fn load_scenario(&self, scenario: FaultScenario) -> Result<(), SimHubError> {
        scenario.validate()?;
        write(&self.inner.state)
            .scenarios
            .insert(scenario.id.clone(), scenario);
        Ok(())
    }

    #[must_use]
    pub fn get_scenarios(&self) -> Vec<FaultScenario> {
        read(&self.inner.state).scenarios.values().cloned().collect()
    }

    /// Instances not yet resolved, oldest first.
    #[must_use]
    pub fn get_active_scenarios(&self) -> Vec<ActiveScenario> {
        let mut live: Vec<ActiveScenario> = read(&self.inner.state)
            .active
            .values()
            .filter(|a| a.state != ScenarioState::Resolved)
            .cloned()
            .collect();
        live.sort_by_key(|a| a.start_time);
        live
    }

    /// Any tracked instance, resolved ones included until purged.
    #[must_use]
    pub fn get_instance(&self, instance_id: InstanceId) -> Option<ActiveScenario> {
        read(&self.inner.state).active.get(&instance_id).cloned()
    }

    /// The newest `limit` history entries, oldest first.
    #[must_use]
    pub fn get_event_history(&self, limit: usize) -> Vec<FaultEvent> {
        let state = read(&self.inner.state);
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Fire a scenario by hand. Registered devices among `targets` replace
    /// the scenario's own device selection. Every call starts a new
    /// instance, even while an earlier one is unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown scenario and
    /// [`SimHubError::Disabled`] for a disabled one.
    #[tracing::instrument(skip(self))]
    pub fn trigger_scenario(&self, scenario_id: &str, targets: &[String]) -> Result<InstanceId, SimHubError> {
        self.inner.trigger(scenario_id, targets, 0)
    }

    /// Resolve an instance regardless of device health.
    /// `Ok(false)` when it was already resolved.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown instance.
    #[tracing::instrument(skip(self))]
    pub fn resolve_scenario(&self, instance_id: InstanceId) -> Result<bool, SimHubError> {
        let entry = {
            let mut state = write(&self.inner.state);
            let active = state.active.get_mut(&instance_id).ok_or_else(|| NotFoundError {
                entity: "ActiveScenario",
                id: instance_id.to_string(),
            })?;
            if !active.resolve(now()) {
                return Ok(false);
            }
            let entry = FaultEvent::new(
                FaultEventKind::ScenarioResolved,
                active.scenario_id.clone(),
                instance_id,
                active.severity,
                "resolved manually",
            );
            state.totals.resolved += 1;
            state.history.push_back(entry.clone());
            entry
        };
        tracing::info!(scenario_id = %entry.scenario_id, "fault scenario resolved manually");
        self.inner.publish(&entry);
        Ok(true)
    }

    // ── Sweeps ─────────────────────────────────────────────────────

    /// Start recovery for instances past their duration, roll each
    /// scenario's probability and purge what outlived retention.
    pub fn check(&self) {
        self.begin_due_recoveries();
        self.roll_probabilities();
        self.cleanup();
    }

    /// Move instances whose duration elapsed to `recovering`. Returns them.
    ///
    /// Without auto-recovery no action is issued and the instance goes
    /// straight to verification.
    pub fn begin_due_recoveries(&self) -> Vec<InstanceId> {
        let at = now();
        let auto_recovery = self.inner.config.auto_recovery;
        let due: Vec<(InstanceId, Vec<RecoveryAction>, FaultEvent)> = {
            let mut state = write(&self.inner.state);
            let State {
                scenarios,
                active,
                history,
                ..
            } = &mut *state;
            active
                .values_mut()
                .filter(|a| a.is_due_for_recovery(at))
                .filter_map(|a| {
                    a.begin_recovery(at).then(|| {
                        if !auto_recovery {
                            a.recovery_actions_done = true;
                        }
                        let actions = scenarios
                            .get(&a.scenario_id)
                            .map(|s| s.recovery_actions.clone())
                            .unwrap_or_default();
                        let entry = FaultEvent::new(
                            FaultEventKind::RecoveryStarted,
                            a.scenario_id.clone(),
                            a.instance_id,
                            a.severity,
                            format!("recovery started with {} action(s)", actions.len()),
                        );
                        history.push_back(entry.clone());
                        (a.instance_id, actions, entry)
                    })
                })
                .collect()
        };

        due.into_iter()
            .map(|(instance_id, actions, entry)| {
                tracing::info!(scenario_id = %entry.scenario_id, instance_id = %instance_id, "fault recovery started");
                self.inner.publish(&entry);
                if auto_recovery {
                    Arc::clone(&self.inner).spawn_recovery(instance_id, actions);
                }
                instance_id
            })
            .collect()
    }

    /// Roll every eligible scenario's probability. A scenario with a live
    /// instance is not rolled. Returns the instances fired.
    pub fn roll_probabilities(&self) -> Vec<InstanceId> {
        let wall = wall_clock();
        let candidates: Vec<String> = {
            let state = read(&self.inner.state);
            let ctx = EvalContext::new(&state.cache, &self.inner.registry, wall);
            state
                .scenarios
                .values()
                .filter(|s| s.enabled && s.probability > 0.0 && !state.is_live(&s.id))
                .filter(|s| ctx.conditions_hold(&s.conditions))
                .filter(|s| rand::random::<f64>() < s.probability)
                .map(|s| s.id.clone())
                .collect()
        };
        candidates
            .iter()
            .filter_map(|id| match self.inner.trigger(id, &[], 0) {
                Ok(instance_id) => Some(instance_id),
                Err(err) => {
                    tracing::debug!(scenario_id = %id, error = %err, "rolled scenario not fired");
                    None
                }
            })
            .collect()
    }

    /// One verification pass over instances whose recovery actions are done.
    pub fn verify(&self) -> Vec<(InstanceId, VerificationOutcome)> {
        let awaiting: Vec<(InstanceId, Vec<String>)> = read(&self.inner.state)
            .active
            .values()
            .filter(|a| a.awaits_verification())
            .map(|a| (a.instance_id, a.affected_devices.clone()))
            .collect();

        awaiting
            .into_iter()
            .filter_map(|(instance_id, devices)| {
                let all_healthy = devices.iter().all(|id| {
                    self.inner
                        .registry
                        .get(id)
                        .is_none_or(|device| device.health().is_healthy())
                });
                self.inner
                    .record_verification(instance_id, all_healthy)
                    .map(|outcome| (instance_id, outcome))
            })
            .collect()
    }

    /// Roll the random failure rate; on a hit fire one random eligible scenario.
    pub fn sample_random_failure(&self) -> Option<InstanceId> {
        if rand::random::<f64>() >= self.inner.config.random_failure_rate {
            return None;
        }
        let scenario_id = {
            let state = read(&self.inner.state);
            let eligible: Vec<&String> = state
                .scenarios
                .values()
                .filter(|s| s.enabled)
                .map(|s| &s.id)
                .collect();
            eligible.choose(&mut rand::rng()).map(|id| (*id).clone())
        }?;
        tracing::info!(scenario_id = %scenario_id, "random failure sampled");
        self.inner.trigger(&scenario_id, &[], 0).ok()
    }

    /// Purge resolved instances and old history. Returns the instances purged.
    pub fn cleanup(&self) -> usize {
        let at = now();
        let config = &self.inner.config;
        let mut state = write(&self.inner.state);
        let purged = purge_finished(&mut state.active, at, config.resolved_retention);
        state
            .history
            .retain(|e| elapsed_between(e.timestamp, at) <= config.event_retention);
        let excess = state.history.len().saturating_sub(config.history_limit);
        state.history.drain(..excess);
        if purged > 0 || excess > 0 {
            tracing::debug!(purged, trimmed = excess, "fault state cleaned up");
        }
        purged
    }

    #[must_use]
    pub fn get_impact_report(&self) -> ImpactReport {
        let state = read(&self.inner.state);
        let live: Vec<&ActiveScenario> = state
            .active
            .values()
            .filter(|a| a.state != ScenarioState::Resolved)
            .collect();
        let affected: BTreeSet<&str> = live
            .iter()
            .flat_map(|a| a.affected_devices.iter().map(String::as_str))
            .collect();
        let totals = &state.totals;
        ImpactReport {
            total_triggered: totals.triggered,
            by_severity: totals
                .by_severity
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            by_type: totals
                .by_kind
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            active: live.iter().filter(|a| a.state == ScenarioState::Active).count(),
            recovering: live
                .iter()
                .filter(|a| a.state == ScenarioState::Recovering)
                .count(),
            resolved: totals.resolved,
            exhausted: totals.exhausted,
            cascades: totals.cascades,
            affected_devices: affected.len(),
            availability: availability(affected.len(), self.inner.registry.len()),
            recovery_actions_executed: totals.recovery_actions_executed,
            recovery_actions_failed: totals.recovery_actions_failed,
            events_retained: state.history.len(),
        }
    }
}

impl<P> std::fmt::Debug for FaultEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultEngine")
            .field("running", &self.inner.lifecycle.is_running())
            .finish_non_exhaustive()
    }
}

impl<P> Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    /// Fire `scenario_id` at cascade `depth`. `seed` devices, when any of
    /// them is registered, replace the scenario's own device selection.
    fn trigger(self: &Arc<Self>, scenario_id: &str, seed: &[String], depth: u32) -> Result<InstanceId, SimHubError> {
        let scenario = read(&self.state).scenarios.get(scenario_id).cloned().ok_or_else(|| NotFoundError {
            entity: "FaultScenario",
            id: scenario_id.to_string(),
        })?;
        if !scenario.enabled {
            return Err(SimHubError::Disabled {
                entity: "FaultScenario",
                id: scenario_id.to_string(),
            });
        }
        let affected = self.select_devices(&scenario, seed);

        let (instance_id, entry) = {
            let mut state = write(&self.state);
            let mut active = ActiveScenario::new(&scenario, affected.clone(), self.registry.len(), now());
            active.cascade_depth = depth;
            let instance_id = active.instance_id;
            let entry = FaultEvent::new(
                FaultEventKind::ScenarioTriggered,
                scenario_id,
                instance_id,
                scenario.severity,
                scenario.description.clone(),
            )
            .with_field("type", scenario.kind.as_str())
            .with_field("affected_devices", affected.clone())
            .with_field("cascade_depth", depth)
            .with_field(
                "service_availability",
                active.impact.service_availability,
            );
            state.active.insert(instance_id, active);
            state.totals.triggered += 1;
            *state.totals.by_severity.entry(scenario.severity).or_default() += 1;
            *state.totals.by_kind.entry(scenario.kind).or_default() += 1;
            state.history.push_back(entry.clone());
            (instance_id, entry)
        };

        tracing::warn!(
            scenario_id,
            instance_id = %instance_id,
            severity = %scenario.severity,
            kind = %scenario.kind,
            devices = affected.len(),
            depth,
            "fault scenario triggered"
        );
        self.publish(&entry);
        Arc::clone(self).spawn_effects(&scenario, instance_id, affected.clone());

        let within_depth = self.config.max_cascade_depth.is_none_or(|max| depth < max);
        if self.config.cascade_enabled && within_depth && !scenario.cascade_scenarios.is_empty() {
            Arc::clone(self).spawn_cascade(&scenario, instance_id, affected, depth);
        }
        Ok(instance_id)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn select_devices(&self, scenario: &FaultScenario, seed: &[String]) -> Vec<String> {
        let seeded: Vec<String> = seed
            .iter()
            .filter(|id| self.registry.get(id).is_some())
            .cloned()
            .collect();
        if !seeded.is_empty() {
            return seeded;
        }
        let fleet = self.registry.all();
        if !scenario.affected_devices.is_empty() {
            return fleet
                .iter()
                .filter(|d| scenario.targets(d.id(), d.device_type()))
                .map(|d| d.id().to_string())
                .collect();
        }
        if fleet.is_empty() {
            return Vec::new();
        }
        let ratio = self.config.random_sample_ratio.clamp(0.0, 1.0);
        let count = ((fleet.len() as f64 * ratio).ceil() as usize).clamp(1, fleet.len());
        let mut sample: Vec<String> = fleet
            .choose_multiple(&mut rand::rng(), count)
            .map(|d| d.id().to_string())
            .collect();
        sample.sort();
        sample
    }

    fn spawn_effects(self: Arc<Self>, scenario: &FaultScenario, instance_id: InstanceId, affected: Vec<String>) {
        if scenario.effects.is_empty() {
            return;
        }
        let scenario = scenario.clone();
        tokio::spawn(async move {
            for device_id in &affected {
                let Some(device) = self.registry.get(device_id) else {
                    continue;
                };
                for effect in &scenario.effects {
                    let command = effect.command(scenario.severity, self.config.command_timeout);
                    match send(device.as_ref(), command).await {
                        Ok(()) => {
                            let entry = FaultEvent::new(
                                FaultEventKind::EffectApplied,
                                scenario.id.clone(),
                                instance_id,
                                scenario.severity,
                                effect.kind.as_str(),
                            )
                            .for_device(device_id.clone())
                            .with_field("effect_severity", effect.severity);
                            write(&self.state).history.push_back(entry.clone());
                            self.publish(&entry);
                        }
                        Err(err) => {
                            tracing::warn!(scenario_id = %scenario.id, device_id = %device_id, effect = %effect.kind, error = %err, "fault effect not applied");
                        }
                    }
                }
            }
        });
    }

    fn spawn_cascade(self: Arc<Self>, scenario: &FaultScenario, parent: InstanceId, affected: Vec<String>, depth: u32) {
        let scenario_id = scenario.id.clone();
        let severity = scenario.severity;
        let children = scenario.cascade_scenarios.clone();
        let cancel = self.lifecycle.child();
        tokio::spawn(async move {
            if !sleep_or_cancel(self.config.cascade_delay, &cancel).await {
                return;
            }
            for child in &children {
                match self.trigger(child, &affected, depth + 1) {
                    Ok(child_instance) => {
                        let entry = FaultEvent::new(
                            FaultEventKind::CascadeTriggered,
                            scenario_id.clone(),
                            parent,
                            severity,
                            format!("cascaded into {child}"),
                        )
                        .with_field("cascade_scenario", child.clone())
                        .with_field("cascade_instance", child_instance.to_string());
                        {
                            let mut state = write(&self.state);
                            state.totals.cascades += 1;
                            state.history.push_back(entry.clone());
                        }
                        tracing::warn!(parent = %scenario_id, child = %child, depth = depth + 1, "fault cascade triggered");
                        self.publish(&entry);
                    }
                    Err(err) => {
                        tracing::warn!(parent = %scenario_id, child = %child, error = %err, "cascade not triggered");
                    }
                }
            }
        });
    }

    fn spawn_recovery(self: Arc<Self>, instance_id: InstanceId, actions: Vec<RecoveryAction>) {
        let cancel = self.lifecycle.child();
        tokio::spawn(async move {
            let completed = run_sequence(self.as_ref(), instance_id, &actions, &cancel).await;
            if let Some(active) = write(&self.state).active.get_mut(&instance_id)
                && active.state == ScenarioState::Recovering
            {
                active.recovery_actions_done = true;
            }
            tracing::debug!(instance_id = %instance_id, completed, "recovery actions issued");
        });
    }

    fn record_verification(self: &Arc<Self>, instance_id: InstanceId, all_healthy: bool) -> Option<VerificationOutcome> {
        let at = now();
        let (outcome, entry) = {
            let mut state = write(&self.state);
            let active = state.active.get_mut(&instance_id)?;
            let outcome = active.record_verification(all_healthy, self.config.max_recovery_attempts, at);
            let (kind, description) = match outcome {
                VerificationOutcome::Skipped => return None,
                VerificationOutcome::Resolved => (
                    FaultEventKind::ScenarioResolved,
                    "all affected devices healthy".to_string(),
                ),
                VerificationOutcome::Retry { attempt } => (
                    FaultEventKind::RecoveryAttempt,
                    format!("devices still unhealthy after attempt {attempt}"),
                ),
                VerificationOutcome::Exhausted { attempts } => (
                    FaultEventKind::RecoveryExhausted,
                    format!("recovery gave up after {attempts} attempt(s)"),
                ),
            };
            let entry = FaultEvent::new(kind, active.scenario_id.clone(), instance_id, active.severity, description)
                .with_field("attempts", active.recovery_attempts);
            match outcome {
                VerificationOutcome::Resolved => state.totals.resolved += 1,
                VerificationOutcome::Exhausted { .. } => state.totals.exhausted += 1,
                _ => {}
            }
            state.history.push_back(entry.clone());
            (outcome, entry)
        };

        match outcome {
            VerificationOutcome::Resolved => {
                tracing::info!(scenario_id = %entry.scenario_id, instance_id = %instance_id, "fault scenario resolved");
            }
            VerificationOutcome::Exhausted { attempts } => {
                tracing::error!(scenario_id = %entry.scenario_id, instance_id = %instance_id, attempts, "fault recovery exhausted");
            }
            _ => {
                tracing::info!(scenario_id = %entry.scenario_id, instance_id = %instance_id, "fault recovery retry");
            }
        }
        self.publish(&entry);
        Some(outcome)
    }

    /// Mirror a history entry onto the bus.
    fn publish(self: &Arc<Self>, entry: &FaultEvent) {
        let mut event = Event::new(EventType::Fault, SOURCE, entry.kind.as_str())
            .with_field("scenario_id", entry.scenario_id.clone())
            .with_field("instance_id", entry.instance_id.to_string())
            .with_field("severity", entry.severity.as_str())
            .with_field("description", entry.description.clone())
            .with_data(Value::Object(entry.data.clone()));
        if let Some(device_id) = &entry.device_id {
            event = event.with_target(device_id.clone());
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.publisher.publish_or_log(event).await });
    }

    /// Affected devices of `instance` addressed by a recovery `target`:
    /// matching ids or types, all affected devices for `all` / empty, and
    /// all of them as well when nothing matches.
    fn recovery_targets(&self, instance: InstanceId, target: &str) -> Vec<Arc<dyn Device>> {
        let affected: Vec<Arc<dyn Device>> = read(&self.state)
            .active
            .get(&instance)
            .map(|a| a.affected_devices.clone())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.registry.get(id))
            .collect();
        if target.is_empty() || target == simhub_domain::fault::ALL_DEVICES {
            return affected;
        }
        let matching: Vec<Arc<dyn Device>> = affected
            .iter()
            .filter(|d| d.id() == target || d.device_type() == target)
            .cloned()
            .collect();
        if matching.is_empty() { affected } else { matching }
    }
}

impl<P> ActionSink<RecoveryAction> for Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    async fn perform(&self, instance: InstanceId, action: &RecoveryAction) -> Result<(), SimHubError> {
        let devices = self.recovery_targets(instance, &action.target);
        if devices.is_empty() {
            tracing::debug!(instance_id = %instance, action = %action.action, "no registered device to recover");
            return Ok(());
        }
        let command = action.command(self.config.recovery_command_timeout);
        broadcast(&devices, &action.target, &command).await.map(|_| ())
    }

    fn record(&self, instance: InstanceId, action: &RecoveryAction, outcome: Result<(), &SimHubError>) {
        let mut state = write(&self.state);
        if outcome.is_ok() {
            state.totals.recovery_actions_executed += 1;
        } else {
            state.totals.recovery_actions_failed += 1;
        }
        tracing::debug!(instance_id = %instance, action_id = action.action_id(), ok = outcome.is_ok(), "recovery action done");
    }

    fn gate(&self, instance: InstanceId) -> Gate {
        match read(&self.state).active.get(&instance).map(|a| a.state) {
            Some(ScenarioState::Recovering) => Gate::Proceed,
            _ => Gate::Halt,
        }
    }
}
