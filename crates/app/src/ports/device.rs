//! Device port: the capability every engine actuates.
//!
//! Devices are owned by the hosting application. Engines only read their
//! identity and health and push [`Command`]s at them; control actions,
//! fault effects and recovery steps all go through
//! [`handle_command`](Device::handle_command).

use async_trait::async_trait;

use simhub_domain::device::{Command, Health};
use simhub_domain::error::SimHubError;

/// A simulated (or real) device reachable by the engines.
///
/// The trait is object-safe so the registry can hold a heterogeneous fleet.
#[async_trait]
pub trait Device: Send + Sync {
    fn id(&self) -> &str;

    /// Device type used for group targeting (`smart_bulb`, `router`, …).
    fn device_type(&self) -> &str;

    fn health(&self) -> Health;

    /// Apply a command.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::Device`] when the device rejects or fails the command.
    async fn handle_command(&self, command: Command) -> Result<(), SimHubError>;
}
