//! Predefined definitions shipped with the simulator: a household's worth
//! of automation rules, scenes, behavior patterns, daily routines and
//! fault scenarios.
//!
//! Hosts load these at startup; every item passes its own `validate()`.

mod automation;
mod behavior;
mod fault;
mod routine;

pub use automation::{automation_rules, scenes};
pub use behavior::behavior_patterns;
pub use fault::fault_scenarios;
pub use routine::daily_routines;

use std::time::Duration;

const fn seconds(n: u64) -> Duration {
    Duration::from_secs(n)
}

const fn minutes(n: u64) -> Duration {
    seconds(n * 60)
}

const fn hours(n: u64) -> Duration {
    minutes(n * 60)
}
