//! Functions callable from `function` actions, keyed by name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{Map, Number, Value, json};
use tokio_util::sync::CancellationToken;

use simhub_domain::error::{ScriptError, SimHubError};
use simhub_domain::id::ExecutionId;
use simhub_domain::script::plain;
use simhub_domain::time::now;

use crate::registry::DeviceRegistry;
use crate::runtime::{read, sleep_or_cancel, write};

pub type FunctionFuture = Pin<Box<dyn Future<Output = Result<Value, SimHubError>> + Send>>;

/// A registered function: resolved parameters in, a value out.
pub type ScriptFunction = Arc<dyn Fn(FunctionContext, Map<String, Value>) -> FunctionFuture + Send + Sync>;

/// What a function sees of the execution calling it.
#[derive(Debug, Clone)]
pub struct FunctionContext {
    pub registry: DeviceRegistry,
    pub script_id: String,
    pub execution_id: ExecutionId,
    /// Fires when the execution is stopped; long-running functions should watch it.
    pub cancel: CancellationToken,
}

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<RwLock<HashMap<String, ScriptFunction>>>,
}

impl FunctionRegistry {
    /// A registry holding the builtin functions.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::default();
        registry.register("add", |_, args| async move { arithmetic("add", &args, |a, b| Ok(a + b)) });
        registry.register("subtract", |_, args| async move {
            arithmetic("subtract", &args, |a, b| Ok(a - b))
        });
        registry.register("multiply", |_, args| async move {
            arithmetic("multiply", &args, |a, b| Ok(a * b))
        });
        registry.register("divide", |_, args| async move {
            arithmetic("divide", &args, |a, b| {
                if b == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(a / b)
                }
            })
        });
        registry.register("concat", |_, args| async move {
            let a = args.get("a").map(plain).unwrap_or_default();
            let b = args.get("b").map(plain).unwrap_or_default();
            Ok(Value::String(a + &b))
        });
        registry.register("upper", |_, args| async move {
            Ok(Value::String(text_arg(&args).to_uppercase()))
        });
        registry.register("lower", |_, args| async move {
            Ok(Value::String(text_arg(&args).to_lowercase()))
        });
        registry.register("length", |_, args| async move {
            let length = match args.get("value") {
                Some(Value::Array(items)) => items.len(),
                Some(Value::Object(map)) => map.len(),
                _ => text_arg(&args).chars().count(),
            };
            Ok(Value::from(length))
        });
        registry.register("now", |_, _| async move { Ok(Value::String(now().to_rfc3339())) });
        registry.register("sleep", |ctx, args| async move {
            let seconds = args.get("duration").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
            if sleep_or_cancel(Duration::from_secs_f64(seconds), &ctx.cancel).await {
                Ok(Value::Null)
            } else {
                Err(ScriptError::Cancelled.into())
            }
        });
        registry.register("random", |_, args| async move {
            let min = args.get("min").and_then(Value::as_f64).unwrap_or(0.0);
            let max = args.get("max").and_then(Value::as_f64).unwrap_or(1.0);
            if max < min {
                return Err(function_error("random", format!("max {max} is below min {min}")));
            }
            Ok(number(min + rand::random::<f64>() * (max - min)))
        });
        registry.register("getDeviceState", |ctx, args| async move {
            let device_id = args.get("device_id").map(plain).unwrap_or_default();
            let device = ctx.registry.require(&device_id)?;
            Ok(json!({
                "device_id": device.id(),
                "device_type": device.device_type(),
                "health": device.health().as_str(),
            }))
        });
        registry.register("log", |ctx, args| async move {
            let message = args.get("message").map(plain).unwrap_or_default();
            let level = args.get("level").and_then(Value::as_str).unwrap_or("info");
            let script_id = ctx.script_id.as_str();
            match level {
                "debug" => tracing::debug!(script_id, "{message}"),
                "warn" | "warning" => tracing::warn!(script_id, "{message}"),
                "error" => tracing::error!(script_id, "{message}"),
                _ => tracing::info!(script_id, "{message}"),
            }
            Ok(Value::String(message))
        });
        registry
    }

    /// Register `function` under `name`, replacing any previous one.
    pub fn register<F, Fut>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(FunctionContext, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, SimHubError>> + Send + 'static,
    {
        let function: ScriptFunction = Arc::new(move |ctx, args| Box::pin(function(ctx, args)));
        write(&self.functions).insert(name.into(), function);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ScriptFunction> {
        read(&self.functions).get(name).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.functions).keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

fn function_error(name: &str, message: impl Into<String>) -> SimHubError {
    ScriptError::Function {
        name: name.to_string(),
        message: message.into(),
    }
    .into()
}

fn text_arg(args: &Map<String, Value>) -> String {
    args.get("value").map(plain).unwrap_or_default()
}

fn arithmetic(
    name: &str,
    args: &Map<String, Value>,
    op: impl FnOnce(f64, f64) -> Result<f64, String>,
) -> Result<Value, SimHubError> {
    let operand = |key: &str| {
        args.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| function_error(name, format!("argument {key:?} must be a number")))
    };
    let (a, b) = (operand("a")?, operand("b")?);
    op(a, b).map(number).map_err(|message| function_error(name, message))
}

/// Integral results stay integers so `2 + 3` reads back as `5`, not `5.0`.
#[allow(clippy::cast_possible_truncation)]
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}
