//! Device registry: the shared id → [`Device`] map every engine routes through.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use simhub_domain::device::{ALL_DEVICES, ALL_LIGHTS, Command, LIGHT_DEVICE_TYPE};
use simhub_domain::error::{NotFoundError, SimHubError};
use simhub_domain::fault;

use crate::ports::Device;

/// Cheaply clonable handle on the shared fleet.
///
/// Engines only read it; registration is the host application's job.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<BTreeMap<String, Arc<dyn Device>>>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under its own id, replacing any previous one.
    pub fn register(&self, device: Arc<dyn Device>) {
        let id = device.id().to_string();
        tracing::debug!(device_id = %id, device_type = device.device_type(), "device registered");
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, device);
    }

    pub fn unregister(&self, device_id: &str) -> Option<Arc<dyn Device>> {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id)
    }

    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<Arc<dyn Device>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    /// Like [`get`](Self::get), but a missing device is an error.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] for an unknown id.
    pub fn require(&self, device_id: &str) -> Result<Arc<dyn Device>, SimHubError> {
        self.get(device_id).ok_or_else(|| {
            NotFoundError {
                entity: "Device",
                id: device_id.to_string(),
            }
            .into()
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every device, ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn Device>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn of_type(&self, device_type: &str) -> Vec<Arc<dyn Device>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|d| d.device_type() == device_type)
            .cloned()
            .collect()
    }

    /// The device type registered for `device_id`.
    #[must_use]
    pub fn type_of(&self, device_id: &str) -> Option<String> {
        self.get(device_id).map(|d| d.device_type().to_string())
    }

    /// Resolve an action target: `all_devices` / `all`, `all_lights`, a
    /// device id, or else every device of that type.
    #[must_use]
    pub fn resolve(&self, target: &str) -> Vec<Arc<dyn Device>> {
        match target {
            ALL_DEVICES | fault::ALL_DEVICES => self.all(),
            ALL_LIGHTS => self.of_type(LIGHT_DEVICE_TYPE),
            _ => match self.get(target) {
                Some(device) => vec![device],
                None => self.of_type(target),
            },
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.len())
            .finish()
    }
}

/// Send `command` to one device, bounded by the command's own timeout.
///
/// # Errors
///
/// Returns the device's error, or [`SimHubError::Timeout`] when it does not
/// answer within `command.timeout`.
pub async fn send(device: &dyn Device, command: Command) -> Result<(), SimHubError> {
    let after = command.timeout;
    let device_id = device.id().to_string();
    let kind = command.command_type.clone();
    match tokio::time::timeout(after, device.handle_command(command)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(device_id = %device_id, command = %kind, ?after, "device command timed out");
            Err(SimHubError::Timeout {
                operation: "device command",
                after,
            })
        }
    }
}

/// Send a copy of `command` to every device. Every device is tried; the
/// first failure is returned.
///
/// # Errors
///
/// Returns [`SimHubError::NotFound`] when `devices` is empty, or the first
/// device failure.
pub async fn broadcast(
    devices: &[Arc<dyn Device>],
    target: &str,
    command: &Command,
) -> Result<usize, SimHubError> {
    if devices.is_empty() {
        return Err(NotFoundError {
            entity: "Device",
            id: target.to_string(),
        }
        .into());
    }
    let mut first_error = None;
    for device in devices {
        if let Err(err) = send(device.as_ref(), command.clone()).await {
            tracing::warn!(device_id = device.id(), command = %command.command_type, error = %err, "device command failed");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(devices.len()),
    }
}
