//! Behavior engine: picks a household pattern on a timer and plays its
//! activities against the fleet.
//!
//! Selection keeps the highest-priority pattern that is scheduled for
//! today, outside its cooldown and whose conditions hold, then rolls its
//! probability. Activity delays and durations are divided by the
//! simulation speed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use simhub_domain::behavior::{ActivePattern, Activity, BehaviorPattern};
use simhub_domain::device::Command;
use simhub_domain::error::{NotFoundError, SimHubError};
use simhub_domain::event::{Event, EventType, WILDCARD};
use simhub_domain::id::{HandlerId, InstanceId};
use simhub_domain::rule::{InstanceState, RuleAction, purge_finished};
use simhub_domain::time::{Timestamp, now, wall_clock};

use crate::config::BehaviorConfig;
use crate::event_bus::{EventBus, EventHandler};
use crate::ports::{Device, EventPublisher};
use crate::registry::{DeviceRegistry, broadcast};
use crate::rule_engine::{ActionSink, EvalContext, ObservationCache, run_sequence};
use crate::runtime::{Lifecycle, read, spawn_periodic, write};

const SOURCE: &str = "behavior_engine";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BehaviorStatistics {
    pub patterns: usize,
    pub active_patterns: usize,
    pub patterns_started: u64,
    pub activities_executed: u64,
    pub activities_failed: u64,
    pub activities_skipped: u64,
    pub device_interactions: u64,
}

#[derive(Default)]
struct State {
    patterns: BTreeMap<String, BehaviorPattern>,
    active: HashMap<InstanceId, ActivePattern>,
    cancels: HashMap<InstanceId, CancellationToken>,
    cache: ObservationCache,
    patterns_started: u64,
    activities_executed: u64,
    activities_failed: u64,
    activities_skipped: u64,
    device_interactions: u64,
}

impl State {
    fn is_live(&self, pattern_id: &str) -> bool {
        self.active
            .values()
            .any(|a| a.run.rule_id == pattern_id && !a.run.state.is_finished())
    }

    /// Open a run of `pattern_id`, stamping `last_triggered`.
    fn open(&mut self, pattern_id: &str, at: Timestamp, cancel: CancellationToken) -> Option<(BehaviorPattern, InstanceId)> {
        let pattern = self.patterns.get_mut(pattern_id)?;
        pattern.rule.last_triggered = Some(at);
        let pattern = pattern.clone();
        let active = ActivePattern::new(&pattern, at);
        let instance_id = active.run.instance_id;
        self.active.insert(instance_id, active);
        self.cancels.insert(instance_id, cancel);
        self.patterns_started += 1;
        Some((pattern, instance_id))
    }

    /// Finish a live run as stopped and fire its cancel token.
    fn halt(&mut self, instance_id: InstanceId, at: Timestamp) -> bool {
        let Some(active) = self.active.get_mut(&instance_id) else {
            return false;
        };
        if active.run.state.is_finished() {
            return false;
        }
        active.run.state = InstanceState::Stopped;
        active.run.finish(at);
        active.current_activity = None;
        if let Some(cancel) = self.cancels.remove(&instance_id) {
            cancel.cancel();
        }
        true
    }
}

struct Inner<P> {
    config: BehaviorConfig,
    registry: DeviceRegistry,
    publisher: P,
    state: RwLock<State>,
    lifecycle: Lifecycle,
}

/// Simulates household behavior patterns.
pub struct BehaviorEngine<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for BehaviorEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> BehaviorEngine<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    pub fn new(config: BehaviorConfig, registry: DeviceRegistry, publisher: P) -> Self {
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

    pub fn start(&self) {
        let Some(cancel) = self.inner.lifecycle.begin() else {
            return;
        };
        let engine = self.clone();
        spawn_periodic("behavior.select", self.inner.config.selection_interval, cancel.clone(), move || {
            engine.select_pattern();
            async {}
        });
        let engine = self.clone();
        spawn_periodic("behavior.cleanup", self.inner.config.cleanup_interval, cancel, move || {
            engine.sweep_overdue();
            engine.cleanup();
            async {}
        });
        tracing::info!(
            patterns = read(&self.inner.state).patterns.len(),
            speed = self.inner.config.simulation_speed,
            "behavior engine started"
        );
    }

    pub fn stop(&self) {
        if self.inner.lifecycle.end() {
            tracing::info!("behavior engine stopped");
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

    pub fn handle_event(&self, event: &Event) {
        let device_type = self.inner.registry.type_of(&event.source);
        write(&self.inner.state)
            .cache
            .observe(event, device_type.as_deref(), now());
    }

    /// Add or replace a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid pattern.
    #[tracing::instrument(skip(self, pattern), fields(pattern_id = %pattern.id()))]
    pub fn load_pattern(&self, pattern: BehaviorPattern) -> Result<(), SimHubError> {
        pattern.validate()?;
        write(&self.inner.state)
            .patterns
            .insert(pattern.id().to_string(), pattern);
        Ok(())
    }

    #[must_use]
    pub fn get_patterns(&self) -> Vec<BehaviorPattern> {
        read(&self.inner.state).patterns.values().cloned().collect()
    }

    /// Live and recently finished runs, oldest first.
    #[must_use]
    pub fn get_active_patterns(&self) -> Vec<ActivePattern> {
        let mut runs: Vec<ActivePattern> = read(&self.inner.state).active.values().cloned().collect();
        runs.sort_by_key(|a| a.run.trigger_time);
        runs
    }

    /// One selection pass. Returns the run started, if any.
    pub fn select_pattern(&self) -> Option<InstanceId> {
        let at = now();
        let wall = wall_clock();
        let cancel = self.inner.lifecycle.child();
        let opened = {
            let mut state = write(&self.inner.state);
            let chosen = {
                let ctx = EvalContext::new(&state.cache, &self.inner.registry, wall);
                state
                    .patterns
                    .values()
                    .filter(|p| p.rule.is_ready(at) && p.scheduled_on(&wall))
                    .filter(|p| ctx.conditions_hold(&p.rule.conditions))
                    .min_by_key(|p| std::cmp::Reverse(p.rule.priority))
                    .map(|p| (p.id().to_string(), p.probability))
            };
            let (pattern_id, probability) = chosen?;
            if state.is_live(&pattern_id) {
                tracing::debug!(pattern_id = %pattern_id, "selected pattern already running");
                return None;
            }
            if rand::random::<f64>() >= probability {
                tracing::debug!(pattern_id = %pattern_id, probability, "pattern not rolled");
                return None;
            }
            state.open(&pattern_id, at, cancel.clone())?
        };
        let (pattern, instance_id) = opened;
        tracing::info!(pattern_id = %pattern.id(), instance_id = %instance_id, "pattern selected");
        Arc::clone(&self.inner).spawn_run(pattern, instance_id, cancel);
        Some(instance_id)
    }

    /// Start a pattern now, bypassing schedule, cooldown and probability.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown pattern,
    /// [`SimHubError::Disabled`] for a disabled one and
    /// [`SimHubError::AlreadyActive`] while a run is live.
    #[tracing::instrument(skip(self))]
    pub fn trigger_pattern(&self, pattern_id: &str) -> Result<InstanceId, SimHubError> {
        let cancel = self.inner.lifecycle.child();
        let (pattern, instance_id) = {
            let mut state = write(&self.inner.state);
            let pattern = state
                .patterns
                .get(pattern_id)
                .ok_or_else(|| pattern_not_found(pattern_id))?;
            if !pattern.rule.enabled {
                return Err(SimHubError::Disabled {
                    entity: "BehaviorPattern",
                    id: pattern_id.to_string(),
                });
            }
            if state.is_live(pattern_id) {
                return Err(SimHubError::AlreadyActive {
                    entity: "BehaviorPattern",
                    id: pattern_id.to_string(),
                });
            }
            state
                .open(pattern_id, now(), cancel.clone())
                .ok_or_else(|| pattern_not_found(pattern_id))?
        };
        Arc::clone(&self.inner).spawn_run(pattern, instance_id, cancel);
        Ok(instance_id)
    }

    /// Stop every live run of `pattern_id`. Returns how many stopped.
    #[tracing::instrument(skip(self))]
    pub fn stop_pattern(&self, pattern_id: &str) -> usize {
        let at = now();
        let stopped: Vec<InstanceId> = {
            let mut state = write(&self.inner.state);
            let live: Vec<InstanceId> = state
                .active
                .values()
                .filter(|a| a.run.rule_id == pattern_id && !a.run.state.is_finished())
                .map(|a| a.run.instance_id)
                .collect();
            live.into_iter().filter(|id| state.halt(*id, at)).collect()
        };
        for instance_id in &stopped {
            self.inner.emit(pattern_event("completed", pattern_id, *instance_id, InstanceState::Stopped));
        }
        stopped.len()
    }

    /// Stop runs that outlived their pattern's duration.
    pub fn sweep_overdue(&self) -> usize {
        let at = now();
        let overdue: Vec<(String, InstanceId)> = {
            let mut state = write(&self.inner.state);
            let due: Vec<(String, InstanceId)> = state
                .active
                .values()
                .filter(|a| a.is_overdue(at))
                .map(|a| (a.run.rule_id.clone(), a.run.instance_id))
                .collect();
            due.into_iter().filter(|(_, id)| state.halt(*id, at)).collect()
        };
        for (pattern_id, instance_id) in &overdue {
            tracing::info!(pattern_id = %pattern_id, instance_id = %instance_id, "pattern ran past its duration");
            self.inner.emit(pattern_event("completed", pattern_id, *instance_id, InstanceState::Stopped));
        }
        overdue.len()
    }

    pub fn cleanup(&self) -> usize {
        let removed = purge_finished(
            &mut write(&self.inner.state).active,
            now(),
            self.inner.config.instance_retention,
        );
        if removed > 0 {
            tracing::debug!(removed, "finished pattern runs purged");
        }
        removed
    }

    #[must_use]
    pub fn statistics(&self) -> BehaviorStatistics {
        let state = read(&self.inner.state);
        BehaviorStatistics {
            patterns: state.patterns.len(),
            active_patterns: state
                .active
                .values()
                .filter(|a| !a.run.state.is_finished())
                .count(),
            patterns_started: state.patterns_started,
            activities_executed: state.activities_executed,
            activities_failed: state.activities_failed,
            activities_skipped: state.activities_skipped,
            device_interactions: state.device_interactions,
        }
    }
}

impl<P> std::fmt::Debug for BehaviorEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorEngine")
            .field("running", &self.inner.lifecycle.is_running())
            .finish_non_exhaustive()
    }
}

fn pattern_not_found(pattern_id: &str) -> SimHubError {
    NotFoundError {
        entity: "BehaviorPattern",
        id: pattern_id.to_string(),
    }
    .into()
}

fn pattern_event(name: &str, pattern_id: &str, instance_id: InstanceId, state: InstanceState) -> Event {
    Event::new(EventType::Pattern, SOURCE, name)
        .with_field("pattern_id", pattern_id)
        .with_field("instance_id", instance_id.to_string())
        .with_field("state", serde_json::to_value(state).unwrap_or_default())
}

impl<P> Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    fn spawn_run(self: Arc<Self>, pattern: BehaviorPattern, instance_id: InstanceId, cancel: CancellationToken) {
        tokio::spawn(async move {
            if let Some(active) = write(&self.state).active.get_mut(&instance_id) {
                active.run.state = InstanceState::Executing;
            }
            self.emit(
                Event::new(EventType::Pattern, SOURCE, "started")
                    .with_field("pattern_id", pattern.id())
                    .with_field("instance_id", instance_id.to_string())
                    .with_field("type", serde_json::to_value(pattern.kind).unwrap_or_default()),
            );

            let completed = run_sequence(self.as_ref(), instance_id, &pattern.rule.actions, &cancel).await;

            let final_state = {
                let mut state = write(&self.state);
                state.cancels.remove(&instance_id);
                state.active.get_mut(&instance_id).and_then(|active| {
                    if active.run.state.is_finished() {
                        return None;
                    }
                    if !completed {
                        active.run.state = InstanceState::Stopped;
                    }
                    active.run.finish(now());
                    active.current_activity = None;
                    Some(active.run.state)
                })
            };
            if let Some(final_state) = final_state {
                tracing::info!(pattern_id = %pattern.id(), instance_id = %instance_id, state = ?final_state, "pattern finished");
                self.emit(pattern_event("completed", pattern.id(), instance_id, final_state));
            }
        });
    }

    fn emit(self: &Arc<Self>, event: Event) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.publisher.publish_or_log(event).await });
    }

    fn targets(&self, device_id: Option<&str>, device_type: &str) -> Vec<Arc<dyn Device>> {
        match device_id {
            Some(id) => self.registry.get(id).into_iter().collect(),
            None => self.registry.of_type(device_type),
        }
    }
}

impl<P> ActionSink<Activity> for Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    async fn perform(&self, instance: InstanceId, activity: &Activity) -> Result<(), SimHubError> {
        if let Some(active) = write(&self.state).active.get_mut(&instance) {
            active.current_activity = Some(activity.id.clone());
        }
        tracing::debug!(instance_id = %instance, activity = %activity.id, "activity started");

        let mut first_error = None;
        for interaction in &activity.devices {
            let devices = self.targets(interaction.device_id.as_deref(), &interaction.device_type);
            if devices.is_empty() {
                tracing::debug!(
                    activity = %activity.id,
                    device_type = %interaction.device_type,
                    "no device for interaction"
                );
                continue;
            }
            write(&self.state).device_interactions += devices.len() as u64;
            let command = Command::new(interaction.action.clone(), self.config.command_timeout)
                .with_parameters(interaction.parameters.clone())
                .with_param("network_usage", activity.network_usage)
                .with_param("power_usage", activity.power_usage);
            let target = interaction
                .device_id
                .as_deref()
                .unwrap_or(&interaction.device_type);
            if let Err(err) = broadcast(&devices, target, &command).await {
                first_error.get_or_insert(err);
            }
        }

        // The activity occupies its slot even when a device refused it.
        tokio::time::sleep(self.config.scaled(activity.duration)).await;
        first_error.map_or(Ok(()), Err)
    }

    fn record(&self, instance: InstanceId, activity: &Activity, outcome: Result<(), &SimHubError>) {
        let mut state = write(&self.state);
        if outcome.is_ok() {
            state.activities_executed += 1;
        } else {
            state.activities_failed += 1;
        }
        if let Some(active) = state.active.get_mut(&instance) {
            active.run.record(activity.action_id(), outcome);
        }
    }

    fn skip(&self, activity: &Activity) -> bool {
        let skipped = rand::random::<f64>() >= activity.probability;
        if skipped {
            write(&self.state).activities_skipped += 1;
        }
        skipped
    }

    fn scale(&self, delay: std::time::Duration) -> std::time::Duration {
        self.config.scaled(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingDevice, SpyPublisher, eventually};
    use serde_json::json;
    use simhub_domain::behavior::{DeviceInteraction, PatternKind, PatternTrigger};
    use simhub_domain::rule::{Condition, ConditionKind, Rule};
    use simhub_domain::value::Operator;
    use std::time::Duration;

    fn state_of(event: &Event) -> Option<&serde_json::Value> {
        event.data.get("state")
    }

    struct Fixture {
        engine: BehaviorEngine<Arc<SpyPublisher>>,
        spy: Arc<SpyPublisher>,
        speaker: Arc<RecordingDevice>,
        tv: Arc<RecordingDevice>,
    }

    fn fixture() -> Fixture {
        let registry = DeviceRegistry::new();
        let speaker = Arc::new(RecordingDevice::new("speaker_1", "smart_speaker"));
        let tv = Arc::new(RecordingDevice::new("tv_1", "smart_tv"));
        registry.register(speaker.clone());
        registry.register(tv.clone());
        let spy = Arc::new(SpyPublisher::default());
        let config = BehaviorConfig {
            simulation_speed: 1000.0,
            instance_retention: Duration::ZERO,
            ..BehaviorConfig::default()
        };
        Fixture {
            engine: BehaviorEngine::new(config, registry, spy.clone()),
            spy,
            speaker,
            tv,
        }
    }

    /// A daily pattern: music for 10 simulated seconds, then the TV for `tv_secs`.
    fn evening(id: &str, priority: i32, tv_secs: u64) -> BehaviorPattern {
        let rule = Rule::builder(id)
            .name("Evening")
            .trigger(PatternTrigger::Daily)
            .priority(priority)
            .action(
                Activity::new("music", "Music")
                    .with_device(DeviceInteraction::on_type("smart_speaker", "play").with_param("volume", 40))
                    .lasting(Duration::from_secs(10)),
            )
            .action(
                Activity::new("tv", "TV")
                    .with_device(DeviceInteraction::on_type("smart_tv", "turn_on"))
                    .lasting(Duration::from_secs(tv_secs)),
            )
            .build()
            .unwrap();
        BehaviorPattern::new(PatternKind::Workday, rule)
    }

    fn runs_in(engine: &BehaviorEngine<Arc<SpyPublisher>>, state: InstanceState) -> usize {
        engine
            .get_active_patterns()
            .iter()
            .filter(|a| a.run.state == state)
            .count()
    }

    // ── Selection ──────────────────────────────────────────────────

    #[tokio::test]
    async fn should_select_highest_priority_scheduled_pattern() {
        let f = fixture();
        f.engine.load_pattern(evening("low", 1, 10)).unwrap();
        f.engine.load_pattern(evening("high", 9, 10)).unwrap();

        f.engine.select_pattern().unwrap();

        let runs = f.engine.get_active_patterns();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run.rule_id, "high");
    }

    #[tokio::test]
    async fn should_not_select_pattern_already_running() {
        let f = fixture();
        f.engine.load_pattern(evening("evening", 0, 60_000)).unwrap();

        assert!(f.engine.select_pattern().is_some());
        assert!(f.engine.select_pattern().is_none());
        assert_eq!(f.engine.statistics().patterns_started, 1);
    }

    #[tokio::test]
    async fn should_never_select_zero_probability_or_manual_pattern() {
        let f = fixture();
        f.engine
            .load_pattern(evening("never", 0, 10).with_probability(0.0))
            .unwrap();
        let manual = Rule::builder("party")
            .name("Party")
            .trigger(PatternTrigger::Manual)
            .action(Activity::new("music", "Music"))
            .build()
            .unwrap();
        f.engine
            .load_pattern(BehaviorPattern::new(PatternKind::Party, manual))
            .unwrap();

        for _ in 0..20 {
            assert!(f.engine.select_pattern().is_none());
        }
    }

    #[tokio::test]
    async fn should_skip_pattern_whose_conditions_fail() {
        let f = fixture();
        let mut pattern = evening("evening", 0, 10);
        pattern.rule.conditions.push(Condition::new(
            ConditionKind::Presence,
            "",
            "occupied",
            Operator::Eq,
            true,
        ));
        f.engine.load_pattern(pattern).unwrap();

        assert!(f.engine.select_pattern().is_none());

        f.engine
            .handle_event(&Event::new(EventType::Presence, "hall", "occupied").with_data(json!(true)));
        assert!(f.engine.select_pattern().is_some());
    }

    // ── Runs ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn should_play_activities_in_order_then_complete() {
        let f = fixture();
        f.engine.load_pattern(evening("evening", 0, 10)).unwrap();

        f.engine.trigger_pattern("evening").unwrap();

        assert!(eventually(Duration::from_secs(2), || runs_in(&f.engine, InstanceState::Completed) == 1).await);
        assert_eq!(f.speaker.command_types(), vec!["play"]);
        assert_eq!(f.speaker.commands()[0].parameters["volume"], json!(40));
        assert_eq!(f.tv.command_types(), vec!["turn_on"]);
        let run = &f.engine.get_active_patterns()[0];
        assert_eq!(run.run.executed_actions, vec!["music", "tv"]);
        assert!(run.current_activity.is_none());

        let stats = f.engine.statistics();
        assert_eq!(stats.activities_executed, 2);
        assert_eq!(stats.device_interactions, 2);
        assert!(eventually(Duration::from_secs(1), || f.spy.keys().contains(&"pattern.completed".to_string())).await);
    }

    #[tokio::test]
    async fn should_skip_activity_with_zero_probability() {
        let f = fixture();
        let rule = Rule::builder("sparse")
            .name("Sparse")
            .trigger(PatternTrigger::Manual)
            .action(
                Activity::new("never", "Never")
                    .with_device(DeviceInteraction::on_type("smart_tv", "turn_on"))
                    .with_probability(0.0),
            )
            .action(Activity::new("always", "Always").with_device(DeviceInteraction::on_type("smart_speaker", "play")))
            .build()
            .unwrap();
        f.engine
            .load_pattern(BehaviorPattern::new(PatternKind::Guest, rule))
            .unwrap();

        f.engine.trigger_pattern("sparse").unwrap();

        assert!(eventually(Duration::from_secs(1), || runs_in(&f.engine, InstanceState::Completed) == 1).await);
        assert!(f.tv.commands().is_empty());
        assert_eq!(f.speaker.commands().len(), 1);
        assert_eq!(f.engine.statistics().activities_skipped, 1);
    }

    #[tokio::test]
    async fn should_pass_over_interactions_without_device() {
        let f = fixture();
        let rule = Rule::builder("lonely")
            .name("Lonely")
            .trigger(PatternTrigger::Manual)
            .action(Activity::new("vacuum", "Vacuum").with_device(DeviceInteraction::on_type("robot_vacuum", "start")))
            .build()
            .unwrap();
        f.engine
            .load_pattern(BehaviorPattern::new(PatternKind::Away, rule))
            .unwrap();

        f.engine.trigger_pattern("lonely").unwrap();

        assert!(eventually(Duration::from_secs(1), || runs_in(&f.engine, InstanceState::Completed) == 1).await);
        assert_eq!(f.engine.statistics().device_interactions, 0);
    }

    #[tokio::test]
    async fn should_reject_second_trigger_while_running() {
        let f = fixture();
        f.engine.load_pattern(evening("evening", 0, 60_000)).unwrap();

        f.engine.trigger_pattern("evening").unwrap();

        assert!(matches!(
            f.engine.trigger_pattern("evening"),
            Err(SimHubError::AlreadyActive { .. })
        ));
        assert!(matches!(f.engine.trigger_pattern("ghost"), Err(SimHubError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_stop_running_pattern_and_cancel_activity() {
        let f = fixture();
        f.engine.load_pattern(evening("evening", 0, 60_000)).unwrap();
        f.engine.trigger_pattern("evening").unwrap();
        assert!(eventually(Duration::from_secs(1), || f.tv.commands().len() == 1).await);

        assert_eq!(f.engine.stop_pattern("evening"), 1);
        assert_eq!(f.engine.stop_pattern("evening"), 0);

        assert_eq!(runs_in(&f.engine, InstanceState::Stopped), 1);
        assert!(eventually(Duration::from_secs(1), || {
            f.spy
                .events()
                .iter()
                .any(|e| e.name == "completed" && state_of(e) == Some(&json!("stopped")))
        })
        .await);
    }

    #[tokio::test]
    async fn should_stop_run_past_pattern_duration() {
        let f = fixture();
        f.engine
            .load_pattern(evening("evening", 0, 60_000).with_duration(Duration::from_millis(10)))
            .unwrap();
        f.engine.trigger_pattern("evening").unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(f.engine.sweep_overdue(), 1);
        assert_eq!(runs_in(&f.engine, InstanceState::Stopped), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(f.engine.cleanup(), 1);
    }
}
