//! # simhub-domain
//!
//! Pure domain model for the simhub scenario and fault simulator.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps, comparison operators
//! - Define **Events** (typed records flowing through the bus)
//! - Define the generic **Rule** (triggers, condition fold, ordered actions, cooldown)
//! - Specialise it into **Automations**, **Behavior patterns** and **Daily routines**
//! - Define **Fault scenarios** (effects, recovery, cascades, impact)
//! - Define **Scripts** (step trees, expressions, schedules, executions)
//! - Ship a predefined **catalogue** of all of the above
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;
pub mod value;

pub mod automation;
pub mod behavior;
pub mod catalog;
pub mod device;
pub mod event;
pub mod fault;
pub mod routine;
pub mod rule;
pub mod script;
