//! Automation engine: trigger → condition → action rules evaluated on a
//! timer against the observation cache, plus scene activation.
//!
//! Every tick, each enabled rule outside its cooldown is checked: any
//! matching trigger puts it up for firing, its conditions must then fold to
//! `true`. A firing records `last_triggered`, creates an [`ActiveRule`] and
//! runs the actions in order on its own task.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use simhub_domain::automation::{
    Action, ActionKind, ActiveScene, AutomationRule, Scene, SceneState, Trigger, TriggerKind,
};
use simhub_domain::device::Command;
use simhub_domain::error::{NotFoundError, SimHubError};
use simhub_domain::event::{Event, EventType, WILDCARD};
use simhub_domain::id::{HandlerId, InstanceId};
use simhub_domain::rule::{ActiveRule, InstanceState, RuleAction, purge_finished};
use simhub_domain::time::{TimeOfDay, Timestamp, elapsed_between, now, wall_clock};

use crate::config::AutomationConfig;
use crate::event_bus::{EventBus, EventHandler};
use crate::ports::EventPublisher;
use crate::registry::{DeviceRegistry, broadcast, send};
use crate::rule_engine::{ActionSink, EvalContext, ObservationCache, run_sequence};
use crate::runtime::{Lifecycle, read, spawn_periodic, write};

const SOURCE: &str = "automation_engine";

/// Time triggers fire at most once per wall-clock minute.
const TIME_TRIGGER_REARM: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutomationStatistics {
    pub rules: usize,
    pub enabled_rules: usize,
    pub active_instances: usize,
    pub rules_triggered: u64,
    pub actions_executed: u64,
    pub actions_failed: u64,
    pub scenes: usize,
    pub active_scenes: usize,
    pub scenes_activated: u64,
    pub observations: usize,
}

#[derive(Default)]
struct State {
    rules: BTreeMap<String, AutomationRule>,
    active_rules: HashMap<InstanceId, ActiveRule>,
    scenes: BTreeMap<String, Scene>,
    active_scenes: HashMap<InstanceId, ActiveScene>,
    cache: ObservationCache,
    rules_triggered: u64,
    actions_executed: u64,
    actions_failed: u64,
    scenes_activated: u64,
}

impl State {
    /// Mark `rule_id` fired at `at` and open its instance.
    fn fire(&mut self, rule_id: &str, at: Timestamp) -> Option<(AutomationRule, InstanceId)> {
        let rule = self.rules.get_mut(rule_id)?;
        rule.last_triggered = Some(at);
        let rule = rule.clone();
        let instance = ActiveRule::new(rule_id, at);
        let instance_id = instance.instance_id;
        self.active_rules.insert(instance_id, instance);
        self.rules_triggered += 1;
        Some((rule, instance_id))
    }
}

struct Inner<P> {
    config: AutomationConfig,
    registry: DeviceRegistry,
    publisher: P,
    state: RwLock<State>,
    lifecycle: Lifecycle,
}

/// Evaluates automation rules and applies scenes.
pub struct AutomationEngine<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for AutomationEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> AutomationEngine<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    pub fn new(config: AutomationConfig, registry: DeviceRegistry, publisher: P) -> Self {
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

    /// Start the evaluation, cleanup and scene sweeps. No-op when running.
    pub fn start(&self) {
        let Some(cancel) = self.inner.lifecycle.begin() else {
            return;
        };
        let config = &self.inner.config;

        let engine = self.clone();
        spawn_periodic("automation.evaluate", config.evaluation_interval, cancel.clone(), move || {
            engine.evaluate();
            async {}
        });
        let engine = self.clone();
        spawn_periodic("automation.cleanup", config.cleanup_interval, cancel.clone(), move || {
            engine.cleanup();
            async {}
        });
        let engine = self.clone();
        spawn_periodic("automation.scenes", config.scene_check_interval, cancel, move || {
            engine.sweep_scenes();
            async {}
        });
        tracing::info!(rules = read(&self.inner.state).rules.len(), "automation engine started");
    }

    /// Stop the sweeps and cancel in-flight rule runs.
    pub fn stop(&self) {
        if self.inner.lifecycle.end() {
            tracing::info!("automation engine stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    /// Feed every bus event into [`handle_event`](Self::handle_event).
    ///
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

    // ── Rules ──────────────────────────────────────────────────────

    /// Add or replace a rule.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid rule.
    #[tracing::instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn load_rule(&self, rule: AutomationRule) -> Result<(), SimHubError> {
        rule.validate()?;
        tracing::debug!(triggers = rule.triggers.len(), actions = rule.actions.len(), "rule loaded");
        write(&self.inner.state).rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown rule.
    #[tracing::instrument(skip(self))]
    pub fn remove_rule(&self, rule_id: &str) -> Result<AutomationRule, SimHubError> {
        write(&self.inner.state)
            .rules
            .remove(rule_id)
            .ok_or_else(|| rule_not_found(rule_id))
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown rule.
    pub fn enable_rule(&self, rule_id: &str) -> Result<(), SimHubError> {
        self.set_enabled(rule_id, true)
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown rule.
    pub fn disable_rule(&self, rule_id: &str) -> Result<(), SimHubError> {
        self.set_enabled(rule_id, false)
    }

    fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), SimHubError> {
        let mut state = write(&self.inner.state);
        let rule = state
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| rule_not_found(rule_id))?;
        rule.enabled = enabled;
        tracing::info!(rule_id, enabled, "rule toggled");
        Ok(())
    }

    /// Fire a rule now, bypassing its triggers and cooldown.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown rule and
    /// [`SimHubError::Disabled`] for a disabled one.
    #[tracing::instrument(skip(self))]
    pub fn trigger_rule(&self, rule_id: &str) -> Result<InstanceId, SimHubError> {
        let fired = {
            let mut state = write(&self.inner.state);
            let rule = state.rules.get(rule_id).ok_or_else(|| rule_not_found(rule_id))?;
            if !rule.enabled {
                return Err(SimHubError::Disabled {
                    entity: "AutomationRule",
                    id: rule_id.to_string(),
                });
            }
            state.fire(rule_id, now())
        };
        let (rule, instance_id) = fired.ok_or_else(|| rule_not_found(rule_id))?;
        Arc::clone(&self.inner).spawn_run(rule, instance_id);
        Ok(instance_id)
    }

    #[must_use]
    pub fn get_rules(&self) -> Vec<AutomationRule> {
        read(&self.inner.state).rules.values().cloned().collect()
    }

    /// Tracked instances, live and recently finished, oldest first.
    #[must_use]
    pub fn get_active_rules(&self) -> Vec<ActiveRule> {
        let mut instances: Vec<ActiveRule> =
            read(&self.inner.state).active_rules.values().cloned().collect();
        instances.sort_by_key(|i| i.trigger_time);
        instances
    }

    /// Run one evaluation pass. Returns the instances started.
    pub fn evaluate(&self) -> Vec<InstanceId> {
        let at = now();
        let wall = wall_clock();
        let fired: Vec<(AutomationRule, InstanceId)> = {
            let mut state = write(&self.inner.state);
            let due = {
                let ctx = EvalContext::new(&state.cache, &self.inner.registry, wall);
                let mut due: Vec<&AutomationRule> = state
                    .rules
                    .values()
                    .filter(|rule| rule.is_ready(at))
                    .filter(|rule| {
                        rule.triggers
                            .iter()
                            .any(|t| trigger_matches(t, &state.cache, rule.last_triggered, at, &wall))
                    })
                    .filter(|rule| ctx.conditions_hold(&rule.conditions))
                    .collect();
                due.sort_by_key(|rule| std::cmp::Reverse(rule.priority));
                due.into_iter().map(|rule| rule.id.clone()).collect::<Vec<_>>()
            };
            due.iter().filter_map(|id| state.fire(id, at)).collect()
        };

        fired
            .into_iter()
            .map(|(rule, instance_id)| {
                tracing::info!(rule_id = %rule.id, instance_id = %instance_id, "rule triggered");
                Arc::clone(&self.inner).spawn_run(rule, instance_id);
                instance_id
            })
            .collect()
    }

    /// Observe an event; a `scene.activate` event with `data.scene_id`
    /// also activates that scene.
    pub fn handle_event(&self, event: &Event) {
        let device_type = self.inner.registry.type_of(&event.source);
        write(&self.inner.state)
            .cache
            .observe(event, device_type.as_deref(), now());

        if event.event_type == EventType::Scene
            && event.name == "activate"
            && let Some(scene_id) = event.data.get("scene_id").and_then(Value::as_str)
        {
            let inner = Arc::clone(&self.inner);
            let scene_id = scene_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = inner.apply_scene(&scene_id).await {
                    tracing::warn!(scene_id = %scene_id, error = %err, "scene activation request failed");
                }
            });
        }
    }

    /// Purge finished rule instances and ended scenes past retention.
    pub fn cleanup(&self) -> usize {
        let at = now();
        let mut state = write(&self.inner.state);
        let rules = purge_finished(&mut state.active_rules, at, self.inner.config.instance_retention);
        let scenes = purge_finished(&mut state.active_scenes, at, self.inner.config.scene_retention);
        if rules + scenes > 0 {
            tracing::debug!(rules, scenes, "finished automation instances purged");
        }
        rules + scenes
    }

    #[must_use]
    pub fn statistics(&self) -> AutomationStatistics {
        let state = read(&self.inner.state);
        AutomationStatistics {
            rules: state.rules.len(),
            enabled_rules: state.rules.values().filter(|r| r.enabled).count(),
            active_instances: state
                .active_rules
                .values()
                .filter(|i| !i.state.is_finished())
                .count(),
            rules_triggered: state.rules_triggered,
            actions_executed: state.actions_executed,
            actions_failed: state.actions_failed,
            scenes: state.scenes.len(),
            active_scenes: state
                .active_scenes
                .values()
                .filter(|s| s.state != SceneState::Ended)
                .count(),
            scenes_activated: state.scenes_activated,
            observations: state.cache.len(),
        }
    }

    // ── Scenes ─────────────────────────────────────────────────────

    /// Add or replace a scene.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid scene.
    pub fn load_scene(&self, scene: Scene) -> Result<(), SimHubError> {
        scene.validate()?;
        write(&self.inner.state).scenes.insert(scene.id.clone(), scene);
        Ok(())
    }

    /// Apply a scene: run its transitions, then send one command per
    /// matching device. Resolves once the scene is applied.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown scene and
    /// [`SimHubError::Disabled`] for a disabled one.
    #[tracing::instrument(skip(self))]
    pub async fn activate_scene(&self, scene_id: &str) -> Result<InstanceId, SimHubError> {
        self.inner.apply_scene(scene_id).await
    }

    /// End every live instance of `scene_id`. Returns how many ended.
    pub fn deactivate_scene(&self, scene_id: &str) -> usize {
        let at = now();
        let ended: Vec<InstanceId> = {
            let mut state = write(&self.inner.state);
            state
                .active_scenes
                .values_mut()
                .filter(|s| s.scene_id == scene_id && s.state != SceneState::Ended)
                .map(|s| {
                    s.end(at);
                    s.instance_id
                })
                .collect()
        };
        for instance_id in &ended {
            self.inner.emit(scene_event("deactivated", scene_id, *instance_id));
        }
        ended.len()
    }

    #[must_use]
    pub fn get_scenes(&self) -> Vec<Scene> {
        read(&self.inner.state).scenes.values().cloned().collect()
    }

    #[must_use]
    pub fn get_active_scenes(&self) -> Vec<ActiveScene> {
        let mut scenes: Vec<ActiveScene> = read(&self.inner.state)
            .active_scenes
            .values()
            .filter(|s| s.state != SceneState::Ended)
            .cloned()
            .collect();
        scenes.sort_by_key(|s| s.start_time);
        scenes
    }

    /// End timed scenes whose end time passed.
    pub fn sweep_scenes(&self) -> usize {
        let at = now();
        let ended: Vec<(String, InstanceId)> = {
            let mut state = write(&self.inner.state);
            state
                .active_scenes
                .values_mut()
                .filter(|s| s.is_due(at))
                .map(|s| {
                    s.end(at);
                    (s.scene_id.clone(), s.instance_id)
                })
                .collect()
        };
        for (scene_id, instance_id) in &ended {
            tracing::info!(scene_id = %scene_id, "timed scene ended");
            self.inner.emit(scene_event("deactivated", scene_id, *instance_id));
        }
        ended.len()
    }
}

impl<P> std::fmt::Debug for AutomationEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationEngine")
            .field("running", &self.inner.lifecycle.is_running())
            .finish_non_exhaustive()
    }
}

/// Whether `trigger` fires at `at`.
///
/// Observation triggers are edge-triggered: only an observation newer than
/// the rule's last firing counts. A `null` trigger value matches any such
/// observation.
fn trigger_matches(
    trigger: &Trigger,
    cache: &ObservationCache,
    last_triggered: Option<Timestamp>,
    at: Timestamp,
    wall: &NaiveDateTime,
) -> bool {
    match trigger.kind {
        TriggerKind::Manual => false,
        TriggerKind::Time => {
            let current = Value::from(TimeOfDay::of(wall).to_string());
            last_triggered.is_none_or(|last| elapsed_between(last, at) >= TIME_TRIGGER_REARM)
                && trigger.operator.compare(&current, &trigger.value)
        }
        _ => trigger
            .observation_key()
            .and_then(|key| cache.get(&key))
            .is_some_and(|observation| {
                last_triggered.is_none_or(|last| observation.at > last)
                    && (trigger.value.is_null()
                        || trigger.operator.compare(&observation.value, &trigger.value))
            }),
    }
}

fn rule_not_found(rule_id: &str) -> SimHubError {
    NotFoundError {
        entity: "AutomationRule",
        id: rule_id.to_string(),
    }
    .into()
}

fn scene_event(name: &str, scene_id: &str, instance_id: InstanceId) -> Event {
    Event::new(EventType::Scene, SOURCE, name)
        .with_field("scene_id", scene_id)
        .with_field("instance_id", instance_id.to_string())
}

fn state_label(state: InstanceState) -> Value {
    serde_json::to_value(state).unwrap_or_default()
}

impl<P> Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    fn spawn_run(self: Arc<Self>, rule: AutomationRule, instance_id: InstanceId) {
        let cancel = self.lifecycle.child();
        tokio::spawn(async move {
            if let Some(run) = write(&self.state).active_rules.get_mut(&instance_id) {
                run.state = InstanceState::Executing;
            }
            self.emit(
                Event::new(EventType::Automation, SOURCE, "rule_triggered")
                    .with_field("rule_id", rule.id.clone())
                    .with_field("instance_id", instance_id.to_string()),
            );

            let completed = run_sequence(self.as_ref(), instance_id, &rule.actions, &cancel).await;

            let outcome = {
                let mut state = write(&self.state);
                state.active_rules.get_mut(&instance_id).map(|run| {
                    if !completed {
                        run.state = InstanceState::Stopped;
                    }
                    run.finish(now());
                    (run.state, run.failed_actions.len())
                })
            };
            if let Some((final_state, failed)) = outcome {
                tracing::info!(rule_id = %rule.id, instance_id = %instance_id, state = ?final_state, failed, "rule run finished");
                self.emit(
                    Event::new(EventType::Automation, SOURCE, "rule_completed")
                        .with_field("rule_id", rule.id.clone())
                        .with_field("instance_id", instance_id.to_string())
                        .with_field("state", state_label(final_state)),
                );
            }
        });
    }

    /// Publish without waiting on the bus.
    fn emit(self: &Arc<Self>, event: Event) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.publisher.publish_or_log(event).await });
    }

    async fn apply_scene(self: &Arc<Self>, scene_id: &str) -> Result<InstanceId, SimHubError> {
        let scene = read(&self.state).scenes.get(scene_id).cloned().ok_or_else(|| {
            SimHubError::from(NotFoundError {
                entity: "Scene",
                id: scene_id.to_string(),
            })
        })?;
        if !scene.enabled {
            return Err(SimHubError::Disabled {
                entity: "Scene",
                id: scene_id.to_string(),
            });
        }

        let active = ActiveScene::new(&scene, now());
        let instance_id = active.instance_id;
        write(&self.state).active_scenes.insert(instance_id, active);

        let mut step = 0;
        for transition in &scene.transitions {
            let interval = transition.step_interval();
            for _ in 0..transition.step_count() {
                tokio::time::sleep(interval).await;
                step += 1;
                if let Some(active) = write(&self.state).active_scenes.get_mut(&instance_id) {
                    active.current_step = step;
                }
            }
        }

        let devices = self.registry.all();
        let mut applied = BTreeMap::new();
        for desired in &scene.device_states {
            for device in devices
                .iter()
                .filter(|d| desired.matches(d.id(), d.device_type()))
            {
                let command = Command::new(desired.state.clone(), self.config.command_timeout)
                    .with_parameters(desired.properties.clone());
                match send(device.as_ref(), command).await {
                    Ok(()) => {
                        applied.insert(device.id().to_string(), desired.state.clone());
                    }
                    Err(err) => {
                        tracing::warn!(scene_id, device_id = device.id(), error = %err, "scene state not applied");
                    }
                }
            }
        }

        let applied_count = applied.len();
        {
            let mut state = write(&self.state);
            state.scenes_activated += 1;
            if let Some(active) = state.active_scenes.get_mut(&instance_id) {
                if active.state == SceneState::Activating {
                    active.state = SceneState::Active;
                }
                active.device_states = applied;
            }
        }
        tracing::info!(scene_id, instance_id = %instance_id, devices = applied_count, "scene activated");
        self.emit(scene_event("activated", scene_id, instance_id).with_field("devices", applied_count));
        Ok(instance_id)
    }
}

impl<P> ActionSink<Action> for Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    async fn perform(&self, instance: InstanceId, action: &Action) -> Result<(), SimHubError> {
        match &action.kind {
            ActionKind::DeviceControl {
                target,
                command,
                parameters,
            } => {
                let devices = self.registry.resolve(target);
                let command = Command::new(command.clone(), self.config.command_timeout)
                    .with_parameters(parameters.clone());
                broadcast(&devices, target, &command).await.map(|_| ())
            }
            ActionKind::SceneActivation { target } => {
                let target = target.clone();
                self.scene_request(target).await
            }
            ActionKind::Notification { message, target } => {
                tracing::info!(instance_id = %instance, recipient = %target, "{message}");
                let event = Event::new(EventType::Automation, SOURCE, "notification")
                    .with_field("message", message.clone())
                    .with_field("target", target.clone())
                    .with_field("instance_id", instance.to_string());
                if let Err(err) = self.publisher.publish(event).await {
                    tracing::debug!(error = %err, "notification not published");
                }
                Ok(())
            }
            ActionKind::Delay => Ok(()),
        }
    }

    fn record(&self, instance: InstanceId, action: &Action, outcome: Result<(), &SimHubError>) {
        let mut state = write(&self.state);
        if outcome.is_ok() {
            state.actions_executed += 1;
        } else {
            state.actions_failed += 1;
        }
        if let Some(run) = state.active_rules.get_mut(&instance) {
            run.record(action.action_id(), outcome);
        }
    }
}

impl<P> Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    /// Scene activation from inside a rule run. Goes through a standalone
    /// task so the rule future does not recurse into scene application.
    async fn scene_request(&self, scene_id: String) -> Result<(), SimHubError> {
        let scene = read(&self.state).scenes.get(&scene_id).cloned();
        let Some(scene) = scene else {
            return Err(NotFoundError {
                entity: "Scene",
                id: scene_id,
            }
            .into());
        };
        if !scene.enabled {
            return Err(SimHubError::Disabled {
                entity: "Scene",
                id: scene_id,
            });
        }
        let event = Event::new(EventType::Scene, SOURCE, "activate").with_field("scene_id", scene_id);
        self.publisher.publish(event).await
    }
}
