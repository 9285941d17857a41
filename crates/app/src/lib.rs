//! # simhub-app
//!
//! Application layer: the engines and the **port definitions** (traits)
//! they drive.
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `Device`: a simulated (or real) device the engines actuate
//!   - `EventPublisher`: how engines announce what they did
//! - Provide **in-process infrastructure** that doesn't need IO: the event
//!   bus and the device registry
//! - Host the engines:
//!   - `AutomationEngine`: trigger/condition/action rules and scenes
//!   - `BehaviorEngine`: probabilistic occupant behavior patterns
//!   - `RoutineEngine`: daily routines in time windows
//!   - `FaultEngine`: fault scenarios, cascades and recovery
//!   - `ScriptEngine`: declarative scripts run as cancellable executions
//! - Share one rule core (`rule_engine`) between automation, behavior and
//!   routine engines
//!
//! ## Dependency rule
//! Depends on `simhub-domain` only (plus `tokio` for tasks and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod automation_engine;
pub mod behavior_engine;
pub mod config;
pub mod event_bus;
pub mod fault_engine;
pub mod ports;
pub mod registry;
pub mod routine_engine;
pub mod rule_engine;
mod runtime;
pub mod script_engine;

#[cfg(test)]
mod test_support;
