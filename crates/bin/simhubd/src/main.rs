//! # simhubd: simhub daemon
//!
//! Composition root that wires the bus, the engines and the virtual fleet
//! together and runs the simulation until interrupted.
//!
//! ## Responsibilities
//! - Load configuration (`simhub.toml` + env vars)
//! - Initialise `tracing`
//! - Build the device registry and register the virtual fleet
//! - Start the event bus and construct every engine against it
//! - Load the predefined catalogue and any scripts from disk
//! - Handle graceful shutdown (Ctrl-C)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer. No simulation logic belongs here.

mod config;

use std::path::Path;

use simhub_app::automation_engine::AutomationEngine;
use simhub_app::behavior_engine::BehaviorEngine;
use simhub_app::event_bus::EventBus;
use simhub_app::fault_engine::FaultEngine;
use simhub_app::registry::DeviceRegistry;
use simhub_app::routine_engine::RoutineEngine;
use simhub_app::script_engine::ScriptEngine;
use simhub_domain::catalog;
use simhub_domain::error::SimHubError;
use simhub_domain::script::ScriptFormat;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

struct Engines {
    automation: AutomationEngine<EventBus>,
    behavior: BehaviorEngine<EventBus>,
    routine: RoutineEngine<EventBus>,
    fault: FaultEngine<EventBus>,
    script: ScriptEngine<EventBus>,
}

impl Engines {
    fn new(config: &Config, registry: &DeviceRegistry, bus: &EventBus) -> Self {
        Self {
            automation: AutomationEngine::new(config.automation.clone(), registry.clone(), bus.clone()),
            behavior: BehaviorEngine::new(config.behavior.clone(), registry.clone(), bus.clone()),
            routine: RoutineEngine::new(config.routine.clone(), registry.clone(), bus.clone()),
            fault: FaultEngine::new(config.fault.clone(), registry.clone(), bus.clone()),
            script: ScriptEngine::new(config.script.clone(), registry.clone(), bus.clone()),
        }
    }

    fn attach(&self, bus: &EventBus) -> Result<(), SimHubError> {
        self.automation.attach(bus)?;
        self.behavior.attach(bus)?;
        self.routine.attach(bus)?;
        self.fault.attach(bus)?;
        self.script.attach(bus)?;
        Ok(())
    }

    fn start(&self) {
        self.automation.start();
        self.behavior.start();
        self.routine.start();
        self.fault.start();
        self.script.start();
    }

    fn stop(&self) {
        self.script.stop();
        self.fault.stop();
        self.routine.stop();
        self.behavior.stop();
        self.automation.stop();
    }
}

fn log_rejected(kind: &str, id: &str, result: Result<(), SimHubError>) {
    if let Err(err) = result {
        tracing::warn!(kind, id, error = %err, "catalogue entry rejected");
    }
}

fn load_catalog(engines: &Engines) -> Result<(), SimHubError> {
    for rule in catalog::automation_rules()? {
        let id = rule.id.clone();
        log_rejected("automation_rule", &id, engines.automation.load_rule(rule));
    }
    for scene in catalog::scenes() {
        let id = scene.id.clone();
        log_rejected("scene", &id, engines.automation.load_scene(scene));
    }
    for pattern in catalog::behavior_patterns()? {
        let id = pattern.rule.id.clone();
        log_rejected("behavior_pattern", &id, engines.behavior.load_pattern(pattern));
    }
    for routine in catalog::daily_routines()? {
        let id = routine.rule.id.clone();
        log_rejected("daily_routine", &id, engines.routine.load_routine(routine));
    }
    for scenario in catalog::fault_scenarios() {
        let id = scenario.id.clone();
        log_rejected("fault_scenario", &id, engines.fault.load_scenario(scenario));
    }
    tracing::info!(
        rules = engines.automation.get_rules().len(),
        scenes = engines.automation.get_scenes().len(),
        patterns = engines.behavior.get_patterns().len(),
        routines = engines.routine.get_routines().len(),
        scenarios = engines.fault.get_scenarios().len(),
        "catalogue loaded"
    );
    Ok(())
}

fn load_scripts(engine: &ScriptEngine<EventBus>, dir: &Path) -> std::io::Result<usize> {
    let mut loaded = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(format) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ScriptFormat::from_extension)
        else {
            continue;
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "script unreadable");
                continue;
            }
        };
        match engine.load_script_str(format, &text) {
            Ok(id) => {
                tracing::debug!(path = %path.display(), script_id = %id, "script loaded");
                loaded += 1;
            }
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "script rejected"),
        }
    }
    Ok(loaded)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Devices
    let registry = DeviceRegistry::new();
    if config.simulation.virtual_fleet {
        simhub_adapter_virtual::install(&registry, &simhub_adapter_virtual::default_fleet());
    }

    // Event bus
    let bus = EventBus::new(config.bus.clone());
    bus.start();

    // Engines
    let engines = Engines::new(&config, &registry, &bus);
    engines.attach(&bus)?;
    if config.simulation.load_catalog {
        load_catalog(&engines)?;
    }
    if let Some(dir) = &config.simulation.scripts_dir {
        let loaded = load_scripts(&engines.script, Path::new(dir))?;
        tracing::info!(dir = %dir, scripts = loaded, "scripts loaded");
    }
    engines.start();
    tracing::info!(devices = registry.len(), "simhubd running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    engines.stop();
    bus.stop();

    Ok(())
}
