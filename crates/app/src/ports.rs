//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the engines and the outside world.
//! They are defined here (in `app`) so that both the engines and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod device;
pub mod event_bus;

pub use device::Device;
pub use event_bus::EventPublisher;
