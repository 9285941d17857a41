//! Engine configuration.
//!
//! Every field has a default so a config file only names what it changes.
//! Durations are written in (fractional) seconds.

use std::time::Duration;

use serde::Deserialize;

use simhub_domain::time::{opt_secs, secs};

/// Event bus sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Capacity of the dispatch queue.
    pub queue_size: usize,
    /// Events kept for [`EventBus::history`](crate::event_bus::EventBus::history).
    pub history_size: usize,
    /// Per-handler execution bound.
    #[serde(with = "secs")]
    pub handler_timeout: Duration,
    /// How long `publish` waits for a free queue slot.
    #[serde(with = "secs")]
    pub publish_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            history_size: 100,
            handler_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    #[serde(with = "secs")]
    pub evaluation_interval: Duration,
    #[serde(with = "secs")]
    pub cleanup_interval: Duration,
    /// Finished rule instances are kept this long.
    #[serde(with = "secs")]
    pub instance_retention: Duration,
    #[serde(with = "secs")]
    pub scene_check_interval: Duration,
    /// Ended scenes are kept this long.
    #[serde(with = "secs")]
    pub scene_retention: Duration,
    #[serde(with = "secs")]
    pub command_timeout: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(10),
            instance_retention: Duration::from_secs(5 * 60),
            scene_check_interval: Duration::from_secs(30),
            scene_retention: Duration::from_secs(10 * 60),
            command_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    #[serde(with = "secs")]
    pub selection_interval: Duration,
    #[serde(with = "secs")]
    pub cleanup_interval: Duration,
    #[serde(with = "secs")]
    pub instance_retention: Duration,
    /// Activity durations and delays are divided by this factor.
    pub simulation_speed: f64,
    #[serde(with = "secs")]
    pub command_timeout: Duration,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            selection_interval: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
            instance_retention: Duration::from_secs(10 * 60),
            simulation_speed: 1.0,
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl BehaviorConfig {
    /// `duration / simulation_speed`; a non-positive speed leaves it unchanged.
    #[must_use]
    pub fn scaled(&self, duration: Duration) -> Duration {
        if self.simulation_speed > 0.0 && self.simulation_speed.is_finite() {
            duration.div_f64(self.simulation_speed)
        } else {
            duration
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutineConfig {
    #[serde(with = "secs")]
    pub schedule_interval: Duration,
    #[serde(with = "secs")]
    pub cleanup_interval: Duration,
    #[serde(with = "secs")]
    pub instance_retention: Duration,
    #[serde(with = "secs")]
    pub command_timeout: Duration,
}

impl Default for RoutineConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            instance_retention: Duration::from_secs(5 * 60),
            command_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Run recovery actions automatically once a scenario's duration elapses.
    pub auto_recovery: bool,
    /// Verification passes before an instance is declared exhausted.
    pub max_recovery_attempts: u32,
    /// Cadence of the probability roll and the duration sweep.
    #[serde(with = "secs")]
    pub check_interval: Duration,
    /// Cadence of recovery verification.
    #[serde(with = "secs")]
    pub recovery_interval: Duration,
    pub cascade_enabled: bool,
    #[serde(with = "secs")]
    pub cascade_delay: Duration,
    /// Stop cascading past this depth. Off by default.
    pub max_cascade_depth: Option<u32>,
    /// Chance per sampler tick that a random scenario fires.
    pub random_failure_rate: f64,
    #[serde(with = "secs")]
    pub random_failure_interval: Duration,
    /// Fault history entries older than this are dropped.
    #[serde(with = "secs")]
    pub event_retention: Duration,
    /// Hard cap on retained fault history entries.
    pub history_limit: usize,
    /// Resolved instances are kept this long.
    #[serde(with = "secs")]
    pub resolved_retention: Duration,
    #[serde(with = "secs")]
    pub command_timeout: Duration,
    /// Default timeout of recovery commands without their own.
    #[serde(with = "secs")]
    pub recovery_command_timeout: Duration,
    /// Share of the fleet sampled for scenarios naming no devices.
    pub random_sample_ratio: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            max_recovery_attempts: 3,
            check_interval: Duration::from_secs(10),
            recovery_interval: Duration::from_secs(30),
            cascade_enabled: true,
            cascade_delay: Duration::from_secs(5),
            max_cascade_depth: None,
            random_failure_rate: 0.001,
            random_failure_interval: Duration::from_secs(60),
            event_retention: Duration::from_secs(24 * 60 * 60),
            history_limit: 10_000,
            resolved_retention: Duration::from_secs(10 * 60),
            command_timeout: Duration::from_secs(5),
            recovery_command_timeout: Duration::from_secs(30),
            random_sample_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Running executions allowed at once, across all scripts.
    pub max_concurrent_scripts: usize,
    #[serde(with = "secs")]
    pub max_execution_time: Duration,
    #[serde(with = "secs")]
    pub scheduler_interval: Duration,
    #[serde(with = "secs")]
    pub cleanup_interval: Duration,
    /// Finished executions are kept this long.
    #[serde(with = "secs")]
    pub execution_retention: Duration,
    #[serde(with = "secs")]
    pub command_timeout: Duration,
    /// Upper bound applied to steps without their own timeout.
    #[serde(default, with = "opt_secs")]
    pub default_step_timeout: Option<Duration>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scripts: 10,
            max_execution_time: Duration::from_secs(30 * 60),
            scheduler_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            execution_retention: Duration::from_secs(5 * 60),
            command_timeout: Duration::from_secs(5),
            default_step_timeout: None,
        }
    }
}
