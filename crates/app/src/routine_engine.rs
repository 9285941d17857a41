//! Daily routine engine: fires routines whose time window covers the wall
//! clock and runs their device actions, with pause, resume and stop.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use simhub_domain::device::Command;
use simhub_domain::error::{NotFoundError, SimHubError};
use simhub_domain::event::{Event, EventType, WILDCARD};
use simhub_domain::id::{HandlerId, InstanceId};
use simhub_domain::routine::{ActiveRoutine, DailyRoutine, DayMode, RoutineAction};
use simhub_domain::rule::{ActiveRule, InstanceState, RuleAction, purge_finished};
use simhub_domain::time::{Timestamp, elapsed_between, now, wall_clock};

use crate::config::RoutineConfig;
use crate::event_bus::{EventBus, EventHandler};
use crate::ports::{Device, EventPublisher};
use crate::registry::{DeviceRegistry, broadcast};
use crate::rule_engine::{ActionSink, EvalContext, Gate, ObservationCache, run_sequence};
use crate::runtime::{Lifecycle, read, spawn_periodic, write};

const SOURCE: &str = "routine_engine";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutineStatistics {
    pub routines: usize,
    pub active_routines: usize,
    pub routines_started: u64,
    pub manual_triggers: u64,
    pub actions_executed: u64,
    pub actions_failed: u64,
    pub current_mode: String,
}

#[derive(Default)]
struct State {
    routines: BTreeMap<String, DailyRoutine>,
    active: HashMap<InstanceId, ActiveRoutine>,
    cancels: HashMap<InstanceId, CancellationToken>,
    cache: ObservationCache,
    routines_started: u64,
    manual_triggers: u64,
    actions_executed: u64,
    actions_failed: u64,
}

impl State {
    fn live(&self, routine_id: &str) -> Option<InstanceId> {
        self.active
            .values()
            .find(|a| a.run.rule_id == routine_id && !a.run.state.is_finished())
            .map(|a| a.run.instance_id)
    }

    fn open(
        &mut self,
        routine_id: &str,
        at: Timestamp,
        manual: bool,
        cancel: CancellationToken,
    ) -> Option<(DailyRoutine, InstanceId)> {
        let routine = self.routines.get_mut(routine_id)?;
        routine.rule.last_triggered = Some(at);
        let routine = routine.clone();
        let active = ActiveRoutine::new(&routine, at, manual);
        let instance_id = active.run.instance_id;
        self.active.insert(instance_id, active);
        self.cancels.insert(instance_id, cancel);
        self.routines_started += 1;
        if manual {
            self.manual_triggers += 1;
        }
        Some((routine, instance_id))
    }
}

struct Inner<P> {
    config: RoutineConfig,
    registry: DeviceRegistry,
    publisher: P,
    state: RwLock<State>,
    lifecycle: Lifecycle,
}

/// Runs daily routines against the wall clock.
pub struct RoutineEngine<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for RoutineEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> RoutineEngine<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    pub fn new(config: RoutineConfig, registry: DeviceRegistry, publisher: P) -> Self {
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
        spawn_periodic("routine.schedule", self.inner.config.schedule_interval, cancel.clone(), move || {
            engine.check_schedule();
            async {}
        });
        let engine = self.clone();
        spawn_periodic("routine.cleanup", self.inner.config.cleanup_interval, cancel, move || {
            engine.cleanup();
            async {}
        });
        tracing::info!(
            routines = read(&self.inner.state).routines.len(),
            mode = %self.current_mode(),
            "routine engine started"
        );
    }

    pub fn stop(&self) {
        if self.inner.lifecycle.end() {
            tracing::info!("routine engine stopped");
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

    /// Add or replace a routine.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid routine.
    #[tracing::instrument(skip(self, routine), fields(routine_id = %routine.id()))]
    pub fn load_routine(&self, routine: DailyRoutine) -> Result<(), SimHubError> {
        routine.validate()?;
        write(&self.inner.state)
            .routines
            .insert(routine.id().to_string(), routine);
        Ok(())
    }

    #[must_use]
    pub fn get_routines(&self) -> Vec<DailyRoutine> {
        read(&self.inner.state).routines.values().cloned().collect()
    }

    /// Live runs, oldest first.
    #[must_use]
    pub fn get_active_routines(&self) -> Vec<ActiveRoutine> {
        let mut runs: Vec<ActiveRoutine> = read(&self.inner.state)
            .active
            .values()
            .filter(|a| !a.run.state.is_finished())
            .cloned()
            .collect();
        runs.sort_by_key(|a| a.run.trigger_time);
        runs
    }

    /// Every tracked run, finished ones included, oldest first.
    #[must_use]
    pub fn get_routine_runs(&self) -> Vec<ActiveRoutine> {
        let mut runs: Vec<ActiveRoutine> = read(&self.inner.state).active.values().cloned().collect();
        runs.sort_by_key(|a| a.run.trigger_time);
        runs
    }

    #[must_use]
    pub fn current_mode(&self) -> DayMode {
        DayMode::at(&wall_clock())
    }

    /// Fire every routine whose window covers the wall clock, once per
    /// window occurrence. Returns the runs started.
    pub fn check_schedule(&self) -> Vec<InstanceId> {
        let at = now();
        let wall = wall_clock();
        let opened: Vec<(DailyRoutine, InstanceId, CancellationToken)> = {
            let mut state = write(&self.inner.state);
            let due: Vec<String> = {
                let ctx = EvalContext::new(&state.cache, &self.inner.registry, wall);
                state
                    .routines
                    .values()
                    .filter(|r| r.rule.is_ready(at))
                    .filter(|r| {
                        r.window_at(&wall).is_some_and(|window| {
                            r.rule
                                .last_triggered
                                .is_none_or(|last| elapsed_between(last, at) >= window.length())
                        })
                    })
                    .filter(|r| state.live(r.id()).is_none())
                    .filter(|r| ctx.conditions_hold(&r.rule.conditions))
                    .map(|r| r.id().to_string())
                    .collect()
            };
            due.iter()
                .filter_map(|id| {
                    let cancel = self.inner.lifecycle.child();
                    state
                        .open(id, at, false, cancel.clone())
                        .map(|(routine, instance)| (routine, instance, cancel))
                })
                .collect()
        };

        opened
            .into_iter()
            .map(|(routine, instance_id, cancel)| {
                tracing::info!(routine_id = %routine.id(), instance_id = %instance_id, "routine window opened");
                Arc::clone(&self.inner).spawn_run(routine, instance_id, cancel);
                instance_id
            })
            .collect()
    }

    /// Run a routine now, outside its window.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown routine,
    /// [`SimHubError::Disabled`] for a disabled one and
    /// [`SimHubError::AlreadyActive`] while a run is live.
    #[tracing::instrument(skip(self))]
    pub fn manual_trigger_routine(&self, routine_id: &str) -> Result<InstanceId, SimHubError> {
        let cancel = self.inner.lifecycle.child();
        let (routine, instance_id) = {
            let mut state = write(&self.inner.state);
            let routine = state.routines.get(routine_id).ok_or_else(|| NotFoundError {
                entity: "DailyRoutine",
                id: routine_id.to_string(),
            })?;
            if !routine.rule.enabled {
                return Err(SimHubError::Disabled {
                    entity: "DailyRoutine",
                    id: routine_id.to_string(),
                });
            }
            if state.live(routine_id).is_some() {
                return Err(SimHubError::AlreadyActive {
                    entity: "DailyRoutine",
                    id: routine_id.to_string(),
                });
            }
            state
                .open(routine_id, now(), true, cancel.clone())
                .ok_or_else(|| NotFoundError {
                    entity: "DailyRoutine",
                    id: routine_id.to_string(),
                })?
        };
        Arc::clone(&self.inner).spawn_run(routine, instance_id, cancel);
        Ok(instance_id)
    }

    /// Hold the live run of `routine_id` before its next action.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] when the routine has no live run.
    #[tracing::instrument(skip(self))]
    pub fn pause_routine(&self, routine_id: &str) -> Result<InstanceId, SimHubError> {
        let instance_id = self.transition(routine_id, |run| {
            if run.state == InstanceState::Executing || run.state == InstanceState::Triggered {
                run.state = InstanceState::Paused;
            }
        })?;
        self.inner.emit(routine_event("paused", routine_id, instance_id));
        Ok(instance_id)
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] when the routine has no live run.
    #[tracing::instrument(skip(self))]
    pub fn resume_routine(&self, routine_id: &str) -> Result<InstanceId, SimHubError> {
        let instance_id = self.transition(routine_id, |run| {
            if run.state == InstanceState::Paused {
                run.state = InstanceState::Executing;
            }
        })?;
        self.inner.emit(routine_event("resumed", routine_id, instance_id));
        Ok(instance_id)
    }

    /// Stop the live run of `routine_id`; no further action is issued.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] when the routine has no live run.
    #[tracing::instrument(skip(self))]
    pub fn stop_routine(&self, routine_id: &str) -> Result<InstanceId, SimHubError> {
        let at = now();
        let instance_id = self.transition(routine_id, |run| {
            run.state = InstanceState::Stopped;
            run.finish(at);
        })?;
        if let Some(cancel) = write(&self.inner.state).cancels.remove(&instance_id) {
            cancel.cancel();
        }
        self.inner.emit(routine_event("stopped", routine_id, instance_id));
        Ok(instance_id)
    }

    fn transition(
        &self,
        routine_id: &str,
        apply: impl FnOnce(&mut ActiveRule),
    ) -> Result<InstanceId, SimHubError> {
        let mut state = write(&self.inner.state);
        let instance_id = state.live(routine_id).ok_or_else(|| NotFoundError {
            entity: "ActiveRoutine",
            id: routine_id.to_string(),
        })?;
        if let Some(active) = state.active.get_mut(&instance_id) {
            apply(&mut active.run);
        }
        Ok(instance_id)
    }

    pub fn cleanup(&self) -> usize {
        let removed = purge_finished(
            &mut write(&self.inner.state).active,
            now(),
            self.inner.config.instance_retention,
        );
        if removed > 0 {
            tracing::debug!(removed, "finished routine runs purged");
        }
        removed
    }

    #[must_use]
    pub fn statistics(&self) -> RoutineStatistics {
        let state = read(&self.inner.state);
        RoutineStatistics {
            routines: state.routines.len(),
            active_routines: state
                .active
                .values()
                .filter(|a| !a.run.state.is_finished())
                .count(),
            routines_started: state.routines_started,
            manual_triggers: state.manual_triggers,
            actions_executed: state.actions_executed,
            actions_failed: state.actions_failed,
            current_mode: self.current_mode().to_string(),
        }
    }
}

impl<P> std::fmt::Debug for RoutineEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineEngine")
            .field("running", &self.inner.lifecycle.is_running())
            .finish_non_exhaustive()
    }
}

fn routine_event(name: &str, routine_id: &str, instance_id: InstanceId) -> Event {
    Event::new(EventType::Routine, SOURCE, name)
        .with_field("routine_id", routine_id)
        .with_field("instance_id", instance_id.to_string())
}

impl<P> Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    fn spawn_run(self: Arc<Self>, routine: DailyRoutine, instance_id: InstanceId, cancel: CancellationToken) {
        tokio::spawn(async move {
            let manual = {
                let mut state = write(&self.state);
                state.active.get_mut(&instance_id).is_some_and(|active| {
                    active.run.state = InstanceState::Executing;
                    active.manual
                })
            };
            self.emit(routine_event("started", routine.id(), instance_id).with_field("manual", manual));

            let completed = run_sequence(self.as_ref(), instance_id, &routine.rule.actions, &cancel).await;

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
                    Some(active.run.state)
                })
            };
            if let Some(final_state) = final_state {
                tracing::info!(routine_id = %routine.id(), instance_id = %instance_id, state = ?final_state, "routine finished");
                self.emit(
                    routine_event("completed", routine.id(), instance_id)
                        .with_field("state", serde_json::to_value(final_state).unwrap_or_default()),
                );
            }
        });
    }

    fn emit(self: &Arc<Self>, event: Event) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.publisher.publish_or_log(event).await });
    }

    fn targets(&self, action: &RoutineAction) -> Vec<Arc<dyn Device>> {
        match action.single_device() {
            Some(id) => self.registry.get(id).into_iter().collect(),
            None => self.registry.of_type(&action.device_type),
        }
    }
}

impl<P> ActionSink<RoutineAction> for Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    async fn perform(&self, instance: InstanceId, action: &RoutineAction) -> Result<(), SimHubError> {
        let devices = self.targets(action);
        if devices.is_empty() {
            tracing::debug!(instance_id = %instance, action_id = %action.id, device_type = %action.device_type, "no device for routine action");
            return Ok(());
        }
        let command = Command::new(action.command.clone(), self.config.command_timeout)
            .with_parameters(action.parameters.clone());
        let target = action.single_device().unwrap_or(&action.device_type);
        broadcast(&devices, target, &command).await.map(|_| ())
    }

    fn record(&self, instance: InstanceId, action: &RoutineAction, outcome: Result<(), &SimHubError>) {
        let mut state = write(&self.state);
        if outcome.is_ok() {
            state.actions_executed += 1;
        } else {
            state.actions_failed += 1;
        }
        if let Some(active) = state.active.get_mut(&instance) {
            active.run.record(action.action_id(), outcome);
        }
    }

    fn gate(&self, instance: InstanceId) -> Gate {
        match read(&self.state).active.get(&instance).map(|a| a.run.state) {
            Some(InstanceState::Paused) => Gate::Hold,
            Some(InstanceState::Stopped) | None => Gate::Halt,
            Some(_) => Gate::Proceed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingDevice, SpyPublisher, eventually};
    use simhub_domain::routine::{RoutineKind, RoutineWindow};
    use simhub_domain::rule::Rule;
    use simhub_domain::time::TimeOfDay;
    use std::time::Duration;

    struct Fixture {
        engine: RoutineEngine<Arc<SpyPublisher>>,
        spy: Arc<SpyPublisher>,
        bulb: Arc<RecordingDevice>,
        blinds: Arc<RecordingDevice>,
    }

    fn fixture() -> Fixture {
        let registry = DeviceRegistry::new();
        let bulb = Arc::new(RecordingDevice::new("bulb_1", "smart_bulb"));
        let blinds = Arc::new(RecordingDevice::new("blinds_1", "smart_blinds"));
        registry.register(bulb.clone());
        registry.register(blinds.clone());
        let spy = Arc::new(SpyPublisher::default());
        let config = RoutineConfig {
            instance_retention: Duration::ZERO,
            ..RoutineConfig::default()
        };
        Fixture {
            engine: RoutineEngine::new(config, registry, spy.clone()),
            spy,
            bulb,
            blinds,
        }
    }

    fn minutes_from_now(offset: i32) -> TimeOfDay {
        let current = TimeOfDay::of(&wall_clock());
        let total = (i32::from(current.hour()) * 60 + i32::from(current.minute()) + offset).rem_euclid(24 * 60);
        let total = u16::try_from(total).unwrap();
        TimeOfDay::new(total / 60, total % 60).unwrap()
    }

    fn routine(id: &str, window: RoutineWindow, blinds_delay: Duration) -> DailyRoutine {
        let rule = Rule::builder(id)
            .name("Wake up")
            .trigger(window)
            .action(RoutineAction::on_type("lights", "smart_bulb", "turn_on").with_param("brightness", 30))
            .action(RoutineAction::on_type("blinds", "smart_blinds", "open").with_delay(blinds_delay))
            .build()
            .unwrap();
        DailyRoutine::new(RoutineKind::Wakeup, rule)
    }

    fn open_now() -> RoutineWindow {
        RoutineWindow::new(minutes_from_now(-1), minutes_from_now(5))
    }

    fn closed_now() -> RoutineWindow {
        RoutineWindow::new(minutes_from_now(60), minutes_from_now(90))
    }

    fn runs_in(engine: &RoutineEngine<Arc<SpyPublisher>>, state: InstanceState) -> usize {
        engine
            .get_routine_runs()
            .iter()
            .filter(|a| a.run.state == state)
            .count()
    }

    // ── Schedule ───────────────────────────────────────────────────

    #[tokio::test]
    async fn should_fire_routine_once_per_window() {
        let f = fixture();
        f.engine.load_routine(routine("wakeup", open_now(), Duration::ZERO)).unwrap();

        assert_eq!(f.engine.check_schedule().len(), 1);
        assert!(eventually(Duration::from_secs(1), || runs_in(&f.engine, InstanceState::Completed) == 1).await);
        assert!(f.engine.check_schedule().is_empty());

        assert_eq!(f.bulb.command_types(), vec!["turn_on"]);
        assert_eq!(f.blinds.command_types(), vec!["open"]);
    }

    #[tokio::test]
    async fn should_not_fire_outside_window() {
        let f = fixture();
        f.engine.load_routine(routine("later", closed_now(), Duration::ZERO)).unwrap();

        assert!(f.engine.check_schedule().is_empty());
    }

    #[tokio::test]
    async fn should_not_fire_disabled_routine() {
        let f = fixture();
        let mut wakeup = routine("wakeup", open_now(), Duration::ZERO);
        wakeup.rule.enabled = false;
        f.engine.load_routine(wakeup).unwrap();

        assert!(f.engine.check_schedule().is_empty());
        assert!(matches!(
            f.engine.manual_trigger_routine("wakeup"),
            Err(SimHubError::Disabled { .. })
        ));
    }

    // ── Manual control ─────────────────────────────────────────────

    #[tokio::test]
    async fn should_run_manual_trigger_outside_window() {
        let f = fixture();
        f.engine.load_routine(routine("later", closed_now(), Duration::ZERO)).unwrap();

        f.engine.manual_trigger_routine("later").unwrap();

        assert!(eventually(Duration::from_secs(1), || runs_in(&f.engine, InstanceState::Completed) == 1).await);
        assert!(f.engine.get_routine_runs()[0].manual);
        assert_eq!(f.engine.statistics().manual_triggers, 1);
        assert!(matches!(
            f.engine.manual_trigger_routine("ghost"),
            Err(SimHubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn should_hold_actions_while_paused() {
        let f = fixture();
        f.engine
            .load_routine(routine("wakeup", closed_now(), Duration::from_millis(100)))
            .unwrap();
        f.engine.manual_trigger_routine("wakeup").unwrap();
        assert!(eventually(Duration::from_secs(1), || f.bulb.commands().len() == 1).await);

        f.engine.pause_routine("wakeup").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(f.blinds.commands().is_empty());

        f.engine.resume_routine("wakeup").unwrap();
        assert!(eventually(Duration::from_secs(2), || f.blinds.commands().len() == 1).await);
        assert!(eventually(Duration::from_secs(1), || runs_in(&f.engine, InstanceState::Completed) == 1).await);
    }

    #[tokio::test]
    async fn should_issue_nothing_after_stop() {
        let f = fixture();
        f.engine
            .load_routine(routine("wakeup", closed_now(), Duration::from_millis(100)))
            .unwrap();
        f.engine.manual_trigger_routine("wakeup").unwrap();
        assert!(eventually(Duration::from_secs(1), || f.bulb.commands().len() == 1).await);

        f.engine.stop_routine("wakeup").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(f.blinds.commands().is_empty());
        assert_eq!(runs_in(&f.engine, InstanceState::Stopped), 1);
        assert!(f.engine.get_active_routines().is_empty());
        assert!(f.spy.keys().contains(&"routine.stopped".to_string()));
    }

    #[tokio::test]
    async fn should_report_missing_run_on_control_calls() {
        let f = fixture();
        f.engine.load_routine(routine("wakeup", closed_now(), Duration::ZERO)).unwrap();

        assert!(matches!(f.engine.pause_routine("wakeup"), Err(SimHubError::NotFound(_))));
        assert!(matches!(f.engine.resume_routine("wakeup"), Err(SimHubError::NotFound(_))));
        assert!(matches!(f.engine.stop_routine("wakeup"), Err(SimHubError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_purge_finished_runs() {
        let f = fixture();
        f.engine.load_routine(routine("wakeup", closed_now(), Duration::ZERO)).unwrap();
        f.engine.manual_trigger_routine("wakeup").unwrap();
        assert!(eventually(Duration::from_secs(1), || runs_in(&f.engine, InstanceState::Completed) == 1).await);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(f.engine.cleanup(), 1);
        assert!(f.engine.get_routine_runs().is_empty());
    }
}
