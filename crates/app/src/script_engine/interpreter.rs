//! Step-tree interpreter for one script execution.
//!
//! Steps run in order against a mutable variable scope. A failure inside a
//! block (sequence, loop, branch or parallel group) ends that block and
//! surfaces as the failure of the enclosing top-level step. Only top-level
//! steps go through their error handler: `continue` records the error and
//! moves on, `stop` aborts the whole execution, `retry` runs the step once
//! more and aborts if it fails again. Cancellation and the execution
//! deadline always abort.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use simhub_domain::device::Command;
use simhub_domain::error::{NotFoundError, ScriptError, SimHubError};
use simhub_domain::event::{Event, EventType};
use simhub_domain::script::{
    ActionKind, ErrorHandler, Loop, ScriptAction, ScriptExecution, Step, StepKind,
    plain, substitute,
};

use super::SOURCE;
use super::functions::{FunctionContext, FunctionRegistry};
use crate::registry::{DeviceRegistry, broadcast};
use crate::runtime::{lock, sleep_or_cancel};

pub(super) type Emit = Arc<dyn Fn(Event) + Send + Sync>;

/// Why a block stopped early.
#[derive(Debug)]
enum Halt {
    /// The step failed; its error handler decides what happens next.
    Failed(SimHubError),
    /// The execution is over.
    Abort(SimHubError),
}

impl Halt {
    fn failed(err: SimHubError) -> Self {
        if is_terminal(&err) {
            Self::Abort(err)
        } else {
            Self::Failed(err)
        }
    }
}

fn is_terminal(err: &SimHubError) -> bool {
    matches!(
        err,
        SimHubError::Script(ScriptError::Cancelled | ScriptError::DeadlineExceeded(_))
    )
}

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Halt>> + Send + 'a>>;

#[derive(Clone)]
pub(super) struct Interpreter {
    pub(super) execution: Arc<Mutex<ScriptExecution>>,
    pub(super) registry: DeviceRegistry,
    pub(super) functions: FunctionRegistry,
    pub(super) command_timeout: Duration,
    pub(super) default_step_timeout: Option<Duration>,
    pub(super) cancel: CancellationToken,
    pub(super) emit: Emit,
}

impl Interpreter {
    /// Run the top-level steps, snapshotting the scope after each one.
    pub(super) async fn run_script(&self, steps: &[Step], mut scope: Map<String, Value>) -> Result<(), SimHubError> {
        for step in steps {
            let outcome = self.run_guarded(step, &mut scope).await;
            lock(&self.execution).variables.clone_from(&scope);
            if let Err(Halt::Abort(err) | Halt::Failed(err)) = outcome {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Nested steps: the first failure ends the block.
    async fn run_steps(&self, steps: &[Step], scope: &mut Map<String, Value>) -> Result<(), Halt> {
        for step in steps {
            if self.cancel.is_cancelled() {
                return Err(Halt::Abort(ScriptError::Cancelled.into()));
            }
            self.attempt(step, scope).await?;
        }
        Ok(())
    }

    /// Run one top-level step and apply its error handler. Only aborts escape.
    async fn run_guarded(&self, step: &Step, scope: &mut Map<String, Value>) -> Result<(), Halt> {
        let err = match self.attempt(step, scope).await {
            Ok(()) => return Ok(()),
            Err(Halt::Abort(err)) => return Err(Halt::Abort(err)),
            Err(Halt::Failed(err)) => err,
        };
        match step.error_handler {
            ErrorHandler::Continue => {
                self.record_error(step, &err);
                Ok(())
            }
            ErrorHandler::Stop => {
                self.record_error(step, &err);
                Err(Halt::Abort(err))
            }
            ErrorHandler::Retry => {
                tracing::debug!(step_id = %step.id, error = %err, "retrying script step");
                match self.attempt(step, scope).await {
                    Ok(()) => Ok(()),
                    Err(Halt::Abort(err) | Halt::Failed(err)) => {
                        self.record_error(step, &err);
                        Err(Halt::Abort(err))
                    }
                }
            }
        }
    }

    fn record_error(&self, step: &Step, err: &SimHubError) {
        let execution_id = {
            let mut execution = lock(&self.execution);
            execution.errors.push(format!("step {}: {err}", step.id));
            execution.execution_id
        };
        tracing::warn!(%execution_id, step_id = %step.id, error = %err, "script step failed");
    }

    /// One try at a step: delay, stack bookkeeping and the step timeout.
    fn attempt<'a>(&'a self, step: &'a Step, scope: &'a mut Map<String, Value>) -> StepFuture<'a> {
        Box::pin(async move {
            if !sleep_or_cancel(step.delay, &self.cancel).await {
                return Err(Halt::Abort(ScriptError::Cancelled.into()));
            }
            self.enter(step);
            let outcome = match step.timeout.or(self.default_step_timeout) {
                Some(after) => tokio::time::timeout(after, self.dispatch(step, scope))
                    .await
                    .unwrap_or_else(|_| {
                        Err(Halt::Failed(SimHubError::Timeout {
                            operation: "script step",
                            after,
                        }))
                    }),
                None => self.dispatch(step, scope).await,
            };
            self.leave(step);
            outcome
        })
    }

    fn enter(&self, step: &Step) {
        let mut execution = lock(&self.execution);
        execution.stack.push(step.id.clone());
        execution.current_step = Some(step.id.clone());
    }

    fn leave(&self, step: &Step) {
        let mut execution = lock(&self.execution);
        if let Some(pos) = execution.stack.iter().rposition(|id| *id == step.id) {
            execution.stack.remove(pos);
        }
    }

    async fn dispatch(&self, step: &Step, scope: &mut Map<String, Value>) -> Result<(), Halt> {
        match &step.kind {
            StepKind::Action { action } => self.run_action(action, scope).await.map_err(Halt::failed),
            StepKind::Condition { condition } => {
                let holds = condition
                    .expression
                    .evaluate_bool(scope)
                    .map_err(|e| Halt::Failed(e.into()))?;
                let branch = if holds {
                    &condition.true_steps
                } else {
                    &condition.false_steps
                };
                self.run_steps(branch, scope).await
            }
            StepKind::Loop { body } => self.run_loop(body, scope).await,
            StepKind::Parallel { steps } => self.run_parallel(steps, scope).await,
            StepKind::Sequence { steps } => self.run_steps(steps, scope).await,
        }
    }

    async fn run_loop(&self, body: &Loop, scope: &mut Map<String, Value>) -> Result<(), Halt> {
        match body {
            Loop::For { count, steps } => {
                for index in 0..*count {
                    scope.insert("index".to_string(), Value::from(index));
                    self.run_steps(steps, scope).await?;
                }
            }
            Loop::While { condition, steps } => {
                while condition.evaluate_bool(scope).map_err(|e| Halt::Failed(e.into()))? {
                    if self.cancel.is_cancelled() {
                        return Err(Halt::Abort(ScriptError::Cancelled.into()));
                    }
                    self.run_steps(steps, scope).await?;
                    tokio::task::yield_now().await;
                }
            }
            Loop::Foreach {
                variable,
                items,
                steps,
            } => {
                for (index, item) in items.iter().enumerate() {
                    let item = substitute(item, scope);
                    scope.insert(variable.clone(), item);
                    scope.insert("index".to_string(), Value::from(index));
                    self.run_steps(steps, scope).await?;
                }
            }
        }
        Ok(())
    }

    /// Branches run concurrently on copies of the scope. Their scopes are
    /// merged back in declared order; the first branch error is returned
    /// once every branch is done.
    async fn run_parallel(&self, steps: &[Step], scope: &mut Map<String, Value>) -> Result<(), Halt> {
        let mut branches = JoinSet::new();
        for (index, step) in steps.iter().enumerate() {
            let interpreter = self.clone();
            let step = step.clone();
            let mut branch_scope = scope.clone();
            branches.spawn(async move {
                let outcome = interpreter.attempt(&step, &mut branch_scope).await;
                (index, branch_scope, outcome)
            });
        }

        let mut finished = Vec::with_capacity(steps.len());
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok(branch) => finished.push(branch),
                Err(err) => {
                    tracing::error!(error = %err, "parallel script branch panicked");
                    lock(&self.execution).errors.push(format!("parallel branch panicked: {err}"));
                }
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut first_error = None;
        for (_, branch_scope, outcome) in finished {
            scope.extend(branch_scope);
            if let Err(halt) = outcome {
                first_error.get_or_insert(halt);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn run_action(&self, action: &ScriptAction, scope: &mut Map<String, Value>) -> Result<(), SimHubError> {
        let params = action.resolve_parameters(scope);
        let result = match action.kind {
            ActionKind::Device => {
                let target = plain(&substitute(&Value::String(action.target.clone()), scope));
                let devices = self.registry.resolve(&target);
                let command =
                    Command::new(action.method.clone(), self.command_timeout).with_parameters(params);
                let sent = broadcast(&devices, &target, &command).await?;
                Value::from(sent)
            }
            ActionKind::Scene => {
                let scene_id = plain(&substitute(&Value::String(action.target.clone()), scope));
                (self.emit)(Event::new(EventType::Scene, SOURCE, "activate").with_field("scene_id", scene_id));
                Value::Null
            }
            ActionKind::Wait => {
                let seconds = params.get("duration").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
                if !sleep_or_cancel(Duration::from_secs_f64(seconds), &self.cancel).await {
                    return Err(ScriptError::Cancelled.into());
                }
                Value::Null
            }
            ActionKind::Log => {
                let message = params.get("message").map(plain).unwrap_or_default();
                let execution_id = {
                    let mut execution = lock(&self.execution);
                    execution.output.push(message.clone());
                    execution.execution_id
                };
                tracing::info!(%execution_id, "{message}");
                Value::String(message)
            }
            ActionKind::Variable => params.get("value").cloned().unwrap_or(Value::Null),
            ActionKind::Function => {
                let function = self.functions.get(&action.method).ok_or_else(|| NotFoundError {
                    entity: "Function",
                    id: action.method.clone(),
                })?;
                let ctx = {
                    let execution = lock(&self.execution);
                    FunctionContext {
                        registry: self.registry.clone(),
                        script_id: execution.script_id.clone(),
                        execution_id: execution.execution_id,
                        cancel: self.cancel.clone(),
                    }
                };
                function(ctx, params).await?
            }
        };
        if let Some(variable) = &action.result {
            scope.insert(variable.clone(), result);
        }
        Ok(())
    }
}
