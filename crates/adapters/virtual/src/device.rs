//! Virtual device: keeps a power flag, free-form properties and a health
//! level driven by fault effects and recovery commands.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use simhub_app::ports::Device;
use simhub_domain::device::{APPLY_FAULT, Command, Health};
use simhub_domain::error::{DeviceError, SimHubError};

/// Commands that undo fault effects.
pub const RECOVERY_COMMANDS: &[&str] = &[
    "restart",
    "reset",
    "failover",
    "reconfigure",
    "reconnect",
    "reflash_firmware",
    "restore_config",
    "restore_backup",
    "rebuild_index",
    "cool_down",
    "wait_power",
    "verify_services",
    "block_traffic",
    "rate_limit",
    "traffic_shaping",
    "qos_adjustment",
];

#[derive(Debug, Default)]
struct Status {
    power: bool,
    properties: Map<String, Value>,
    /// Effect types currently applied.
    faults: Vec<String>,
    health: Option<Health>,
}

/// A simulated device answering the engines' commands.
#[derive(Debug)]
pub struct VirtualDevice {
    id: String,
    device_type: String,
    status: Mutex<Status>,
    commands: Mutex<Vec<Command>>,
    latency: Duration,
    failing: AtomicBool,
    fail_next: AtomicUsize,
}

impl VirtualDevice {
    #[must_use]
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            status: Mutex::new(Status::default()),
            commands: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            failing: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// Delay every command by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject every command until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Reject the next `count` commands.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_health(&self, health: Health) {
        self.status().health = Some(health);
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        self.status().power
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<Value> {
        self.status().properties.get(key).cloned()
    }

    /// Effect types applied and not yet recovered.
    #[must_use]
    pub fn active_faults(&self) -> Vec<String> {
        self.status().faults.clone()
    }

    /// Every command received, accepted or not, oldest first.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn command_types(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.command_type).collect()
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn reject(&self, message: impl Into<String>) -> SimHubError {
        DeviceError {
            device_id: self.id.clone(),
            message: message.into(),
        }
        .into()
    }

    fn apply(&self, command: &Command) -> Result<(), SimHubError> {
        let mut status = self.status();
        let kind = command.command_type.as_str();
        match kind {
            APPLY_FAULT => {
                let severity = command.parameters.get("severity").and_then(Value::as_f64).unwrap_or(0.5);
                let effect = command
                    .parameters
                    .get("effect_type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let health = health_for(severity);
                status.health = Some(status.health.map_or(health, |current| worst(current, health)));
                status.faults.push(effect);
                tracing::debug!(device_id = %self.id, health = %health, "fault effect applied");
            }
            _ if RECOVERY_COMMANDS.contains(&kind) => {
                status.faults.clear();
                status.health = Some(Health::Healthy);
                tracing::debug!(device_id = %self.id, command = kind, "device recovered");
            }
            _ if status.health == Some(Health::Offline) => {
                return Err(self.reject(format!("{kind} rejected while offline")));
            }
            "turn_on" => status.power = true,
            "turn_off" | "standby" => status.power = false,
            "toggle" => status.power = !status.power,
            _ => {
                status.power = true;
                status.properties.insert("mode".to_string(), Value::from(kind));
            }
        }
        for (key, value) in &command.parameters {
            if kind != APPLY_FAULT && key != "target" {
                status.properties.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

fn health_for(severity: f64) -> Health {
    if severity >= 0.9 {
        Health::Offline
    } else if severity >= 0.7 {
        Health::Critical
    } else if severity >= 0.4 {
        Health::Degraded
    } else {
        Health::Warning
    }
}

fn rank(health: Health) -> u8 {
    match health {
        Health::Healthy => 0,
        Health::Warning => 1,
        Health::Degraded => 2,
        Health::Critical => 3,
        Health::Offline => 4,
    }
}

fn worst(a: Health, b: Health) -> Health {
    if rank(b) > rank(a) { b } else { a }
}

#[async_trait]
impl Device for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn health(&self) -> Health {
        self.status().health.unwrap_or(Health::Healthy)
    }

    async fn handle_command(&self, command: Command) -> Result<(), SimHubError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        if self.should_fail() {
            return Err(self.reject(format!("{} failed", command.command_type)));
        }
        self.apply(&command)
    }
}
