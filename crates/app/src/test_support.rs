//! Hand-written fakes shared by the engine tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use simhub_domain::device::{APPLY_FAULT, Command, Health};
use simhub_domain::error::{DeviceError, SimHubError};
use simhub_domain::event::Event;

use crate::ports::{Device, EventPublisher};

// ── Recording device ───────────────────────────────────────────

/// Records every command; `apply_fault` degrades it, `restart` heals it.
pub struct RecordingDevice {
    id: String,
    device_type: String,
    health: Mutex<Health>,
    commands: Mutex<Vec<Command>>,
    latency: Duration,
    failing: bool,
}

impl RecordingDevice {
    pub fn new(id: &str, device_type: &str) -> Self {
        Self {
            id: id.to_string(),
            device_type: device_type.to_string(),
            health: Mutex::new(Health::Healthy),
            commands: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            failing: false,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn set_health(&self, health: Health) {
        *self.health.lock().unwrap() = health;
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn command_types(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .map(|c| c.command_type)
            .collect()
    }
}

#[async_trait]
impl Device for RecordingDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn health(&self) -> Health {
        *self.health.lock().unwrap()
    }

    async fn handle_command(&self, command: Command) -> Result<(), SimHubError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let kind = command.command_type.clone();
        self.commands.lock().unwrap().push(command);
        if self.failing {
            return Err(DeviceError {
                device_id: self.id.clone(),
                message: format!("{kind} rejected"),
            }
            .into());
        }
        match kind.as_str() {
            APPLY_FAULT => self.set_health(Health::Degraded),
            "restart" => self.set_health(Health::Healthy),
            _ => {}
        }
        Ok(())
    }
}

// ── Spy publisher ──────────────────────────────────────────────

#[derive(Default)]
pub struct SpyPublisher {
    events: Mutex<Vec<Event>>,
}

impl SpyPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.events().iter().map(Event::compound_key).collect()
    }
}

impl EventPublisher for SpyPublisher {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), SimHubError>> + Send {
        self.events.lock().unwrap().push(event);
        async { Ok(()) }
    }
}

/// Poll `check` every few milliseconds until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
