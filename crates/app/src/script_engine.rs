//! Script engine: loads declarative scripts and runs them as cancellable
//! executions, manually, on a schedule or in response to bus events.
//!
//! Each execution gets its own variable scope and task. The engine bounds
//! how many run at once and how long each may take; finished executions
//! stay queryable until the retention period passes.

mod functions;
mod interpreter;

pub use functions::{FunctionContext, FunctionFuture, FunctionRegistry, ScriptFunction};

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use simhub_domain::error::{CapacityError, NotFoundError, ScriptError, SimHubError};
use simhub_domain::event::{Event, EventType, WILDCARD};
use simhub_domain::id::{ExecutionId, HandlerId};
use simhub_domain::rule::{Finished, purge_finished};
use simhub_domain::script::{ExecutionState, Script, ScriptExecution, ScriptFormat};
use simhub_domain::time::{Timestamp, now, secs, wall_clock};

use crate::config::ScriptConfig;
use crate::event_bus::{EventBus, EventHandler};
use crate::ports::EventPublisher;
use crate::registry::DeviceRegistry;
use crate::runtime::{Lifecycle, lock, read, spawn_periodic, write};
use interpreter::Interpreter;

const SOURCE: &str = "script_engine";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptStatistics {
    pub scripts: usize,
    pub enabled_scripts: usize,
    pub running: usize,
    pub executions_started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Mean wall time of finished executions.
    #[serde(with = "secs")]
    pub average_duration: Duration,
    pub functions: usize,
}

#[derive(Clone)]
struct Run {
    execution: Arc<Mutex<ScriptExecution>>,
    cancel: CancellationToken,
}

impl Run {
    fn snapshot(&self) -> ScriptExecution {
        lock(&self.execution).clone()
    }

    fn is_live(&self) -> bool {
        !lock(&self.execution).state.is_finished()
    }
}

impl Finished for Run {
    fn finished_at(&self) -> Option<Timestamp> {
        lock(&self.execution).finished_at()
    }
}

#[derive(Default)]
struct State {
    scripts: BTreeMap<String, Script>,
    runs: HashMap<ExecutionId, Run>,
    /// When the scheduler last started each script.
    last_run: HashMap<String, Timestamp>,
    started: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    total_duration: Duration,
}

struct Inner<P> {
    config: ScriptConfig,
    registry: DeviceRegistry,
    functions: FunctionRegistry,
    publisher: P,
    state: RwLock<State>,
    lifecycle: Lifecycle,
}

pub struct ScriptEngine<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for ScriptEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> ScriptEngine<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    /// An engine with the builtin functions registered.
    pub fn new(config: ScriptConfig, registry: DeviceRegistry, publisher: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                functions: FunctionRegistry::with_builtins(),
                publisher,
                state: RwLock::new(State::default()),
                lifecycle: Lifecycle::default(),
            }),
        }
    }

    /// Start the scheduler and cleanup loops.
    pub fn start(&self) {
        let Some(cancel) = self.inner.lifecycle.begin() else {
            return;
        };
        let engine = self.clone();
        spawn_periodic("script.scheduler", self.inner.config.scheduler_interval, cancel.clone(), move || {
            engine.run_schedules();
            async {}
        });
        let engine = self.clone();
        spawn_periodic("script.cleanup", self.inner.config.cleanup_interval, cancel, move || {
            engine.cleanup();
            async {}
        });
        tracing::info!(
            scripts = read(&self.inner.state).scripts.len(),
            max_concurrent = self.inner.config.max_concurrent_scripts,
            "script engine started"
        );
    }

    /// Stop the loops and cancel every running execution.
    pub fn stop(&self) {
        if self.inner.lifecycle.end() {
            tracing::info!("script engine stopped");
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

    /// Start every enabled script with a trigger matching `event`. The event
    /// is exposed to the script as `event_type`, `event_source`, `event_name`
    /// and `event_data`. Events published by this engine start nothing.
    pub fn handle_event(&self, event: &Event) {
        if event.source == SOURCE {
            return;
        }
        let triggered: Vec<String> = read(&self.inner.state)
            .scripts
            .values()
            .filter(|s| s.enabled && s.triggered_by(event))
            .map(|s| s.id.clone())
            .collect();
        for script_id in triggered {
            let mut parameters = Map::new();
            parameters.insert("event_type".to_string(), Value::from(event.event_type.as_str()));
            parameters.insert("event_source".to_string(), Value::from(event.source.clone()));
            parameters.insert("event_name".to_string(), Value::from(event.name.clone()));
            parameters.insert("event_data".to_string(), Value::Object(event.data.clone()));
            if let Err(err) = self.execute_script(&script_id, parameters) {
                tracing::warn!(%script_id, event = %event.compound_key(), error = %err, "event-triggered script not started");
            }
        }
    }

    // ── Scripts ────────────────────────────────────────────────────

    /// Add or replace a script.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Validation`] for an invalid script.
    #[tracing::instrument(skip(self, script), fields(script_id = %script.id))]
    pub fn load_script(&self, script: Script) -> Result<(), SimHubError> {
        script.validate()?;
        tracing::debug!(steps = script.steps.len(), "script loaded");
        write(&self.inner.state).scripts.insert(script.id.clone(), script);
        Ok(())
    }

    /// Parse and load a script authored as `format`; returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Parse`] for unreadable text and
    /// [`SimHubError::Validation`] for an invalid script.
    pub fn load_script_str(&self, format: ScriptFormat, text: &str) -> Result<String, SimHubError> {
        let script = Script::from_str_as(format, text)?;
        let id = script.id.clone();
        self.load_script(script)?;
        Ok(id)
    }

    pub fn remove_script(&self, script_id: &str) -> Option<Script> {
        write(&self.inner.state).scripts.remove(script_id)
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown script.
    pub fn enable_script(&self, script_id: &str) -> Result<(), SimHubError> {
        self.set_enabled(script_id, true)
    }

    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown script.
    pub fn disable_script(&self, script_id: &str) -> Result<(), SimHubError> {
        self.set_enabled(script_id, false)
    }

    fn set_enabled(&self, script_id: &str, enabled: bool) -> Result<(), SimHubError> {
        let mut state = write(&self.inner.state);
        let script = state.scripts.get_mut(script_id).ok_or_else(|| not_found("Script", script_id))?;
        script.enabled = enabled;
        Ok(())
    }

    #[must_use]
    pub fn get_scripts(&self) -> Vec<Script> {
        read(&self.inner.state).scripts.values().cloned().collect()
    }

    /// Register a function for `function` actions, replacing a builtin of
    /// the same name.
    pub fn register_function<F, Fut>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(FunctionContext, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, SimHubError>> + Send + 'static,
    {
        self.inner.functions.register(name, function);
    }

    #[must_use]
    pub fn function_names(&self) -> Vec<String> {
        self.inner.functions.names()
    }

    // ── Executions ─────────────────────────────────────────────────

    /// Start a run of `script_id` with `parameters` layered over the
    /// script's variables and parameter defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown script,
    /// [`SimHubError::Disabled`] for a disabled one,
    /// [`SimHubError::Capacity`] when the concurrency limit is reached and
    /// [`SimHubError::Validation`] when a required parameter is missing.
    #[tracing::instrument(skip(self, parameters))]
    pub fn execute_script(&self, script_id: &str, parameters: Map<String, Value>) -> Result<ExecutionId, SimHubError> {
        let limit = self.inner.config.max_concurrent_scripts;
        let (script, scope, run) = {
            let mut state = write(&self.inner.state);
            let script = state.scripts.get(script_id).ok_or_else(|| not_found("Script", script_id))?;
            if !script.enabled {
                return Err(SimHubError::Disabled {
                    entity: "Script",
                    id: script_id.to_string(),
                });
            }
            if state.runs.values().filter(|r| r.is_live()).count() >= limit {
                return Err(CapacityError::ConcurrencyLimit { limit }.into());
            }
            let script = script.clone();
            let scope = script.scope(&parameters)?;
            let execution = ScriptExecution::new(script_id, scope.clone(), now());
            let run = Run {
                execution: Arc::new(Mutex::new(execution)),
                cancel: self.inner.lifecycle.child(),
            };
            let execution_id = lock(&run.execution).execution_id;
            state.runs.insert(execution_id, run.clone());
            state.started += 1;
            (script, scope, run)
        };

        let execution_id = lock(&run.execution).execution_id;
        tracing::info!(%execution_id, "script execution started");
        self.inner.emit(
            Event::new(EventType::Script, SOURCE, "execution_started")
                .with_field("script_id", script_id)
                .with_field("execution_id", execution_id.to_string()),
        );
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run(script, scope, run));
        Ok(execution_id)
    }

    /// Cancel a running execution. `Ok(false)` when it had already finished.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown execution.
    #[tracing::instrument(skip(self))]
    pub fn stop_script(&self, execution_id: ExecutionId) -> Result<bool, SimHubError> {
        let state = read(&self.inner.state);
        let run = state
            .runs
            .get(&execution_id)
            .ok_or_else(|| not_found("ScriptExecution", &execution_id.to_string()))?;
        let stopped = lock(&run.execution).finish(ExecutionState::Cancelled, now());
        run.cancel.cancel();
        Ok(stopped)
    }

    #[must_use]
    pub fn get_execution(&self, execution_id: ExecutionId) -> Option<ScriptExecution> {
        read(&self.inner.state).runs.get(&execution_id).map(Run::snapshot)
    }

    /// Executions still running, oldest first.
    #[must_use]
    pub fn get_running_scripts(&self) -> Vec<ScriptExecution> {
        let mut running: Vec<ScriptExecution> = self
            .get_executions()
            .into_iter()
            .filter(|e| !e.state.is_finished())
            .collect();
        running.sort_by_key(|e| e.start_time);
        running
    }

    /// Every retained execution, oldest first.
    #[must_use]
    pub fn get_executions(&self) -> Vec<ScriptExecution> {
        let mut executions: Vec<ScriptExecution> =
            read(&self.inner.state).runs.values().map(Run::snapshot).collect();
        executions.sort_by_key(|e| e.start_time);
        executions
    }

    /// Start every enabled script whose schedule is due. Returns the new
    /// execution ids.
    pub fn run_schedules(&self) -> Vec<ExecutionId> {
        let at = now();
        let wall = wall_clock();
        let due: Vec<String> = {
            let mut state = write(&self.inner.state);
            let State {
                scripts, last_run, ..
            } = &mut *state;
            let due: Vec<String> = scripts
                .values()
                .filter(|s| s.enabled)
                .filter(|s| {
                    s.schedule
                        .as_ref()
                        .is_some_and(|schedule| schedule.is_due(at, &wall, last_run.get(&s.id).copied()))
                })
                .map(|s| s.id.clone())
                .collect();
            for script_id in &due {
                last_run.insert(script_id.clone(), at);
            }
            due
        };
        due.iter()
            .filter_map(|script_id| match self.execute_script(script_id, Map::new()) {
                Ok(execution_id) => Some(execution_id),
                Err(err) => {
                    tracing::warn!(%script_id, error = %err, "scheduled script not started");
                    None
                }
            })
            .collect()
    }

    /// Drop finished executions older than the retention period.
    pub fn cleanup(&self) -> usize {
        let purged = purge_finished(
            &mut write(&self.inner.state).runs,
            now(),
            self.inner.config.execution_retention,
        );
        if purged > 0 {
            tracing::debug!(purged, "finished script executions purged");
        }
        purged
    }

    #[must_use]
    pub fn statistics(&self) -> ScriptStatistics {
        let state = read(&self.inner.state);
        let finished = state.completed + state.failed + state.cancelled;
        let average_duration = u32::try_from(finished)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| state.total_duration / n);
        ScriptStatistics {
            scripts: state.scripts.len(),
            enabled_scripts: state.scripts.values().filter(|s| s.enabled).count(),
            running: state.runs.values().filter(|r| r.is_live()).count(),
            executions_started: state.started,
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
            average_duration,
            functions: self.inner.functions.names().len(),
        }
    }
}

impl<P> std::fmt::Debug for ScriptEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("running", &self.inner.lifecycle.is_running())
            .finish_non_exhaustive()
    }
}

fn not_found(entity: &'static str, id: &str) -> SimHubError {
    NotFoundError {
        entity,
        id: id.to_string(),
    }
    .into()
}

impl<P> Inner<P>
where
    P: EventPublisher + Send + Sync + 'static,
{
    fn emit(self: &Arc<Self>, event: Event) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.publisher.publish_or_log(event).await });
    }

    async fn run(self: Arc<Self>, script: Script, scope: Map<String, Value>, run: Run) {
        let emitter = Arc::clone(&self);
        let interpreter = Interpreter {
            execution: Arc::clone(&run.execution),
            registry: self.registry.clone(),
            functions: self.functions.clone(),
            command_timeout: self.config.command_timeout,
            default_step_timeout: self.config.default_step_timeout,
            cancel: run.cancel.clone(),
            emit: Arc::new(move |event| emitter.emit(event)),
        };
        let deadline = self.config.max_execution_time;
        let outcome = tokio::select! {
            () = run.cancel.cancelled() => Err(ScriptError::Cancelled.into()),
            result = tokio::time::timeout(deadline, interpreter.run_script(&script.steps, scope)) => {
                result.unwrap_or_else(|_| Err(ScriptError::DeadlineExceeded(deadline).into()))
            }
        };

        let record = {
            let mut execution = lock(&run.execution);
            let state = match &outcome {
                Ok(()) => ExecutionState::Completed,
                Err(SimHubError::Script(ScriptError::Cancelled)) => ExecutionState::Cancelled,
                Err(err @ SimHubError::Script(ScriptError::DeadlineExceeded(_))) => {
                    execution.errors.push(err.to_string());
                    ExecutionState::Failed
                }
                Err(_) => ExecutionState::Failed,
            };
            execution.finish(state, now());
            execution.clone()
        };

        let duration = record.duration().unwrap_or_default();
        {
            let mut state = write(&self.state);
            match record.state {
                ExecutionState::Completed => state.completed += 1,
                ExecutionState::Cancelled => state.cancelled += 1,
                _ => state.failed += 1,
            }
            state.total_duration += duration;
        }

        let execution_id = record.execution_id;
        match (&record.state, &outcome) {
            (ExecutionState::Failed, Err(err)) => {
                tracing::warn!(%execution_id, script_id = %record.script_id, error = %err, "script execution failed");
            }
            (state, _) => {
                tracing::info!(%execution_id, script_id = %record.script_id, %state, ?duration, "script execution finished");
            }
        }
        self.emit(
            Event::new(EventType::Script, SOURCE, format!("execution_{}", record.state))
                .with_field("script_id", record.script_id.clone())
                .with_field("execution_id", execution_id.to_string())
                .with_field("duration", duration.as_secs_f64())
                .with_field("errors", record.errors.len()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingDevice, SpyPublisher, eventually};
    use serde_json::json;
    use simhub_domain::script::{
        ActionKind, ErrorHandler, ParameterKind, Schedule, ScriptAction, ScriptParameter, ScriptTrigger, Step,
    };

    fn config() -> ScriptConfig {
        ScriptConfig {
            max_concurrent_scripts: 4,
            max_execution_time: Duration::from_secs(5),
            scheduler_interval: Duration::from_millis(10),
            cleanup_interval: Duration::from_millis(50),
            execution_retention: Duration::from_secs(60),
            command_timeout: Duration::from_secs(1),
            default_step_timeout: None,
        }
    }

    struct Fixture {
        engine: ScriptEngine<Arc<SpyPublisher>>,
        spy: Arc<SpyPublisher>,
        bulb: Arc<RecordingDevice>,
    }

    fn fixture_with(config: ScriptConfig) -> Fixture {
        let registry = DeviceRegistry::new();
        let bulb = Arc::new(RecordingDevice::new("bulb_1", "smart_bulb"));
        registry.register(bulb.clone());
        let spy = Arc::new(SpyPublisher::default());
        Fixture {
            engine: ScriptEngine::new(config, registry, spy.clone()),
            spy,
            bulb,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(config())
    }

    fn wait_step(id: &str, seconds: f64) -> Step {
        Step::action(id, ScriptAction::new(ActionKind::Wait).with_param("duration", seconds))
    }

    fn lights_on() -> Script {
        Script::new("lights_on", "Lights on")
            .with_step(Step::action("on", ScriptAction::device("smart_bulb", "turn_on")))
            .with_step(Step::action("done", ScriptAction::log("lights are on")))
    }

    fn sleeper(id: &str) -> Script {
        Script::new(id, "Sleeper").with_step(wait_step("nap", 5.0))
    }

    impl Fixture {
        async fn finished(&self, execution_id: ExecutionId) -> ScriptExecution {
            let engine = self.engine.clone();
            assert!(
                eventually(Duration::from_secs(2), || {
                    engine
                        .get_execution(execution_id)
                        .is_some_and(|e| e.state.is_finished())
                })
                .await
            );
            self.engine.get_execution(execution_id).unwrap()
        }
    }

    // ── Execution ──────────────────────────────────────────────────

    #[tokio::test]
    async fn should_run_script_to_completion() {
        let f = fixture();
        f.engine.load_script(lights_on()).unwrap();

        let execution_id = f.engine.execute_script("lights_on", Map::new()).unwrap();
        let execution = f.finished(execution_id).await;

        assert_eq!(execution.state, ExecutionState::Completed);
        assert_eq!(execution.output, vec!["lights are on"]);
        assert_eq!(f.bulb.command_types(), vec!["turn_on"]);
        assert!(execution.stack.is_empty());
        let spy = f.spy.clone();
        assert!(eventually(Duration::from_secs(1), || spy.keys().contains(&"script.execution_completed".to_string())).await);
        assert!(f.spy.keys().contains(&"script.execution_started".to_string()));
    }

    #[tokio::test]
    async fn should_reject_unknown_and_disabled_scripts() {
        let f = fixture();
        f.engine.load_script(lights_on()).unwrap();
        f.engine.disable_script("lights_on").unwrap();

        assert!(matches!(
            f.engine.execute_script("ghost", Map::new()),
            Err(SimHubError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.execute_script("lights_on", Map::new()),
            Err(SimHubError::Disabled { .. })
        ));
        f.engine.enable_script("lights_on").unwrap();
        assert!(f.engine.execute_script("lights_on", Map::new()).is_ok());
    }

    #[tokio::test]
    async fn should_reject_run_missing_required_parameter() {
        let f = fixture();
        let script = Script::new("greet", "Greet")
            .with_parameter(ScriptParameter {
                name: "who".to_string(),
                kind: ParameterKind::String,
                required: true,
                default_value: None,
                description: String::new(),
            })
            .with_step(Step::action("say", ScriptAction::log("${who}")));
        f.engine.load_script(script).unwrap();

        assert!(matches!(
            f.engine.execute_script("greet", Map::new()),
            Err(SimHubError::Validation(_))
        ));

        let parameters = json!({"who": "visitor"}).as_object().cloned().unwrap();
        let execution_id = f.engine.execute_script("greet", parameters).unwrap();
        assert_eq!(f.finished(execution_id).await.output, vec!["visitor"]);
    }

    #[tokio::test]
    async fn should_refuse_runs_beyond_concurrency_limit() {
        let f = fixture_with(ScriptConfig {
            max_concurrent_scripts: 1,
            ..config()
        });
        f.engine.load_script(sleeper("slow")).unwrap();

        let first = f.engine.execute_script("slow", Map::new()).unwrap();
        assert!(matches!(
            f.engine.execute_script("slow", Map::new()),
            Err(SimHubError::Capacity(CapacityError::ConcurrencyLimit { limit: 1 }))
        ));

        f.engine.stop_script(first).unwrap();
        assert!(f.engine.execute_script("slow", Map::new()).is_ok());
    }

    #[tokio::test]
    async fn should_cancel_running_execution() {
        let f = fixture();
        f.engine.load_script(sleeper("slow")).unwrap();
        let execution_id = f.engine.execute_script("slow", Map::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(f.engine.stop_script(execution_id).unwrap());
        let execution = f.finished(execution_id).await;

        assert_eq!(execution.state, ExecutionState::Cancelled);
        assert!(!f.engine.stop_script(execution_id).unwrap());
        assert!(matches!(
            f.engine.stop_script(ExecutionId::new()),
            Err(SimHubError::NotFound(_))
        ));
        let engine = f.engine.clone();
        assert!(eventually(Duration::from_secs(1), || engine.statistics().cancelled == 1).await);
    }

    #[tokio::test]
    async fn should_fail_execution_past_deadline() {
        let f = fixture_with(ScriptConfig {
            max_execution_time: Duration::from_millis(50),
            ..config()
        });
        f.engine.load_script(sleeper("slow")).unwrap();

        let execution_id = f.engine.execute_script("slow", Map::new()).unwrap();
        let execution = f.finished(execution_id).await;

        assert_eq!(execution.state, ExecutionState::Failed);
        assert!(execution.errors[0].contains("deadline"));
    }

    #[tokio::test]
    async fn should_fail_execution_when_stop_step_fails() {
        let f = fixture();
        let script = Script::new("strict", "Strict")
            .with_step(Step::action("call", ScriptAction::function("divide").with_param("a", 1).with_param("b", 0))
                .on_error(ErrorHandler::Stop))
            .with_step(Step::action("after", ScriptAction::log("unreachable")));
        f.engine.load_script(script).unwrap();

        let execution_id = f.engine.execute_script("strict", Map::new()).unwrap();
        let execution = f.finished(execution_id).await;

        assert_eq!(execution.state, ExecutionState::Failed);
        assert!(execution.output.is_empty());
        assert_eq!(execution.errors.len(), 1);
    }

    #[tokio::test]
    async fn should_fail_execution_when_parallel_branch_fails_under_stop() {
        let f = fixture();
        let divide = Step::action("divide", ScriptAction::function("divide").with_param("a", 1).with_param("b", 0));
        let script = Script::new("fan_out", "Fan out")
            .with_step(Step::parallel("group", vec![divide, Step::action("sibling", ScriptAction::log("ran"))])
                .on_error(ErrorHandler::Stop))
            .with_step(Step::action("after", ScriptAction::log("unreachable")));
        f.engine.load_script(script).unwrap();

        let execution_id = f.engine.execute_script("fan_out", Map::new()).unwrap();
        let execution = f.finished(execution_id).await;

        assert_eq!(execution.state, ExecutionState::Failed);
        assert_eq!(execution.output, vec!["ran"]);
        assert_eq!(execution.errors.len(), 1);
    }

    #[tokio::test]
    async fn should_cancel_executions_when_engine_stops() {
        let f = fixture();
        f.engine.start();
        f.engine.load_script(sleeper("slow")).unwrap();
        let execution_id = f.engine.execute_script("slow", Map::new()).unwrap();

        f.engine.stop();

        assert_eq!(f.finished(execution_id).await.state, ExecutionState::Cancelled);
    }

    // ── Triggers and schedules ─────────────────────────────────────

    #[tokio::test]
    async fn should_start_script_from_matching_event() {
        let f = fixture();
        let script = Script::new("on_motion", "On motion")
            .with_trigger(ScriptTrigger::Event {
                event_type: EventType::Sensor,
                name: Some("motion".to_string()),
            })
            .with_step(Step::action("say", ScriptAction::log("${event_source}")));
        f.engine.load_script(script).unwrap();

        f.engine.handle_event(&Event::new(EventType::Sensor, "hall_sensor", "temperature"));
        f.engine.handle_event(&Event::new(EventType::Sensor, "hall_sensor", "motion").with_field("detected", true));

        let engine = f.engine.clone();
        assert!(eventually(Duration::from_secs(1), || {
            engine.get_executions().iter().any(|e| e.state == ExecutionState::Completed)
        })
        .await);
        let executions = f.engine.get_executions();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].output, vec!["hall_sensor"]);
        assert_eq!(executions[0].variables["event_data"]["detected"], json!(true));
    }

    #[tokio::test]
    async fn should_run_once_schedule_a_single_time() {
        let f = fixture();
        let script = lights_on().with_schedule(Schedule::Once {
            at: now() - chrono::TimeDelta::seconds(1),
        });
        f.engine.load_script(script).unwrap();

        assert_eq!(f.engine.run_schedules().len(), 1);
        assert!(f.engine.run_schedules().is_empty());
    }

    #[tokio::test]
    async fn should_run_recurring_schedule_from_scheduler_loop() {
        let f = fixture();
        let script = lights_on().with_schedule(Schedule::Recurring {
            interval: Duration::from_millis(30),
            start: None,
            end: None,
        });
        f.engine.load_script(script).unwrap();

        f.engine.start();
        let bulb = f.bulb.clone();
        assert!(eventually(Duration::from_secs(2), || bulb.commands().len() >= 2).await);
        f.engine.stop();
    }

    // ── Loading and housekeeping ───────────────────────────────────

    #[tokio::test]
    async fn should_load_script_from_toml() {
        let f = fixture();
        let text = r#"
            id = "toml_script"
            name = "From TOML"

            [[steps]]
            id = "hello"
            type = "action"

            [steps.action]
            type = "log"
            parameters = { message = "hello from toml" }
        "#;

        let script_id = f.engine.load_script_str(ScriptFormat::Toml, text).unwrap();
        let execution_id = f.engine.execute_script(&script_id, Map::new()).unwrap();

        assert_eq!(f.finished(execution_id).await.output, vec!["hello from toml"]);
    }

    #[test]
    fn should_reject_unparseable_script_text() {
        let f = fixture();
        assert!(matches!(
            f.engine.load_script_str(ScriptFormat::Json, "{not json"),
            Err(SimHubError::Parse { format: "json", .. })
        ));
    }

    #[tokio::test]
    async fn should_call_function_registered_on_engine() {
        let f = fixture();
        f.engine.register_function("greeting", |ctx, _| async move {
            Ok(Value::String(format!("hello from {}", ctx.script_id)))
        });
        let script = Script::new("custom", "Custom")
            .with_step(Step::action("call", ScriptAction::function("greeting").into_result("text")))
            .with_step(Step::action("say", ScriptAction::log("${text}")));
        f.engine.load_script(script).unwrap();

        let execution_id = f.engine.execute_script("custom", Map::new()).unwrap();

        assert_eq!(f.finished(execution_id).await.output, vec!["hello from custom"]);
        assert!(f.engine.function_names().contains(&"greeting".to_string()));
    }

    #[tokio::test]
    async fn should_purge_finished_executions_after_retention() {
        let f = fixture_with(ScriptConfig {
            execution_retention: Duration::ZERO,
            ..config()
        });
        f.engine.load_script(lights_on()).unwrap();
        f.engine.load_script(sleeper("slow")).unwrap();
        let done = f.engine.execute_script("lights_on", Map::new()).unwrap();
        let live = f.engine.execute_script("slow", Map::new()).unwrap();
        f.finished(done).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(f.engine.cleanup(), 1);
        assert!(f.engine.get_execution(done).is_none());
        assert_eq!(f.engine.get_running_scripts()[0].execution_id, live);
    }

    #[tokio::test]
    async fn should_report_statistics() {
        let f = fixture();
        f.engine.load_script(lights_on()).unwrap();
        let execution_id = f.engine.execute_script("lights_on", Map::new()).unwrap();
        f.finished(execution_id).await;

        let engine = f.engine.clone();
        assert!(eventually(Duration::from_secs(1), || engine.statistics().completed == 1).await);
        let stats = f.engine.statistics();
        assert_eq!(stats.scripts, 1);
        assert_eq!(stats.executions_started, 1);
        assert_eq!(stats.running, 0);
        assert!(stats.functions >= 10);
    }
}
