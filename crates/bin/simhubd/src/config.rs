//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `simhub.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use serde::Deserialize;

use simhub_app::config::{
    AutomationConfig, BehaviorConfig, EventBusConfig, FaultConfig, RoutineConfig, ScriptConfig,
};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub bus: EventBusConfig,
    pub automation: AutomationConfig,
    pub behavior: BehaviorConfig,
    pub routine: RoutineConfig,
    pub fault: FaultConfig,
    pub script: ScriptConfig,
    pub simulation: SimulationConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// What the daemon loads at startup.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Register the virtual demo fleet.
    pub virtual_fleet: bool,
    /// Load the predefined rules, scenes, patterns, routines and scenarios.
    pub load_catalog: bool,
    /// Directory of `*.json` / `*.toml` scripts.
    pub scripts_dir: Option<String>,
}

impl Config {
    /// Load configuration from `simhub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("simhub.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("SIMHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("SIMHUB_SCRIPTS_DIR") {
            self.simulation.scripts_dir = Some(val);
        }
        if let Some(enabled) = var("SIMHUB_FAULT_AUTO_RECOVERY").and_then(|v| v.parse().ok()) {
            self.fault.auto_recovery = enabled;
        }
        if let Some(rate) = var("SIMHUB_RANDOM_FAILURE_RATE").and_then(|v| v.parse().ok()) {
            self.fault.random_failure_rate = rate;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.queue_size == 0 {
            return Err(ConfigError::Validation("bus.queue_size must be non-zero".to_string()));
        }
        if self.bus.history_size == 0 {
            return Err(ConfigError::Validation("bus.history_size must be non-zero".to_string()));
        }
        for (field, value) in [
            ("fault.random_failure_rate", self.fault.random_failure_rate),
            ("fault.random_sample_ratio", self.fault.random_sample_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!("{field} must be within [0, 1], got {value}")));
            }
        }
        if self.script.max_concurrent_scripts == 0 {
            return Err(ConfigError::Validation(
                "script.max_concurrent_scripts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "simhubd=info,simhub_app=info,simhub_adapter_virtual=info".to_string(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            virtual_fleet: true,
            load_catalog: true,
            scripts_dir: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn overridden(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).cloned());
        config
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert!(config.simulation.virtual_fleet);
        assert!(config.simulation.load_catalog);
        assert!(config.simulation.scripts_dir.is_none());
        assert_eq!(config.bus.queue_size, 1000);
        assert!(config.fault.auto_recovery);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.script.max_concurrent_scripts, 10);
    }

    #[test]
    fn should_parse_sections_with_fractional_seconds() {
        let toml = "
            [logging]
            filter = 'debug'

            [bus]
            queue_size = 64

            [automation]
            evaluation_interval = 0.5

            [fault]
            cascade_delay = 2
            max_cascade_depth = 3

            [simulation]
            virtual_fleet = false
            scripts_dir = 'scripts'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.bus.queue_size, 64);
        assert_eq!(config.bus.history_size, 100);
        assert_eq!(config.automation.evaluation_interval, Duration::from_millis(500));
        assert_eq!(config.fault.cascade_delay, Duration::from_secs(2));
        assert_eq!(config.fault.max_cascade_depth, Some(3));
        assert!(!config.simulation.virtual_fleet);
        assert!(config.simulation.load_catalog);
        assert_eq!(config.simulation.scripts_dir.as_deref(), Some("scripts"));
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.bus.queue_size, 1000);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_prefer_rust_log_over_simhub_log() {
        let config = overridden(&[("SIMHUB_LOG", "warn"), ("RUST_LOG", "trace")]);
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_apply_fault_and_script_overrides() {
        let config = overridden(&[
            ("SIMHUB_SCRIPTS_DIR", "/srv/scripts"),
            ("SIMHUB_FAULT_AUTO_RECOVERY", "false"),
            ("SIMHUB_RANDOM_FAILURE_RATE", "0.25"),
        ]);
        assert_eq!(config.simulation.scripts_dir.as_deref(), Some("/srv/scripts"));
        assert!(!config.fault.auto_recovery);
        assert!((config.fault.random_failure_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn should_ignore_unparseable_overrides() {
        let config = overridden(&[("SIMHUB_FAULT_AUTO_RECOVERY", "maybe")]);
        assert!(config.fault.auto_recovery);
    }

    #[test]
    fn should_reject_zero_queue_size() {
        let mut config = Config::default();
        config.bus.queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_failure_rate_out_of_range() {
        let mut config = Config::default();
        config.fault.random_failure_rate = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_zero_script_concurrency() {
        let mut config = Config::default();
        config.script.max_concurrent_scripts = 0;
        assert!(config.validate().is_err());
    }
}
