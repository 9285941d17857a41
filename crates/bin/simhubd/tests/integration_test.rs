//! End-to-end tests for the full simhubd stack.
//!
//! Each test wires the real event bus, every engine and the virtual fleet
//! with intervals in the tens of milliseconds, then drives the system
//! through the bus the way the daemon does.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, json};
use simhub_adapter_virtual::{VirtualDevice, default_fleet, install};
use simhub_app::automation_engine::AutomationEngine;
use simhub_app::config::{AutomationConfig, EventBusConfig, FaultConfig, ScriptConfig};
use simhub_app::event_bus::{Dispatch, EventBus, EventHandler};
use simhub_app::fault_engine::FaultEngine;
use simhub_app::ports::Device;
use simhub_app::registry::DeviceRegistry;
use simhub_app::script_engine::ScriptEngine;
use simhub_domain::automation::{Action, AutomationRule, Trigger, TriggerKind};
use simhub_domain::catalog;
use simhub_domain::device::Health;
use simhub_domain::error::{CapacityError, SimHubError};
use simhub_domain::event::{Event, EventType};
use simhub_domain::fault::ScenarioState;
use simhub_domain::rule::{InstanceState, Rule};
use simhub_domain::script::{ExecutionState, ScriptFormat};

/// Everything the daemon wires, with short intervals.
struct App {
    bus: EventBus,
    registry: DeviceRegistry,
    fleet: Vec<Arc<VirtualDevice>>,
    automation: AutomationEngine<EventBus>,
    fault: FaultEngine<EventBus>,
    script: ScriptEngine<EventBus>,
}

impl App {
    fn device(&self, id: &str) -> Arc<VirtualDevice> {
        self.fleet
            .iter()
            .find(|d| d.id() == id)
            .cloned()
            .expect("device should be part of the fleet")
    }

    fn stop(&self) {
        self.script.stop();
        self.fault.stop();
        self.automation.stop();
        self.bus.stop();
    }
}

fn app() -> App {
    let registry = DeviceRegistry::new();
    let fleet = default_fleet();
    install(&registry, &fleet);

    let bus = EventBus::new(EventBusConfig::default());
    bus.start();

    let automation = AutomationEngine::new(
        AutomationConfig {
            evaluation_interval: Duration::from_millis(10),
            scene_check_interval: Duration::from_millis(10),
            ..AutomationConfig::default()
        },
        registry.clone(),
        bus.clone(),
    );
    let fault = FaultEngine::new(
        FaultConfig {
            cascade_delay: Duration::from_millis(20),
            random_failure_rate: 0.0,
            ..FaultConfig::default()
        },
        registry.clone(),
        bus.clone(),
    );
    let script = ScriptEngine::new(
        ScriptConfig {
            scheduler_interval: Duration::from_millis(20),
            ..ScriptConfig::default()
        },
        registry.clone(),
        bus.clone(),
    );

    automation.attach(&bus).expect("automation should attach");
    fault.attach(&bus).expect("fault engine should attach");
    script.attach(&bus).expect("script engine should attach");
    automation.start();
    fault.start();
    script.start();

    App {
        bus,
        registry,
        fleet,
        automation,
        fault,
        script,
    }
}

async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
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

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_fire_rule_when_sensor_event_arrives_on_bus() {
    let app = app();
    let rule: AutomationRule = Rule::builder("motion_light")
        .name("Motion light")
        .trigger(Trigger::new(TriggerKind::Sensor, "", true))
        .action(Action::device_control("on", "living_room_light", "turn_on"))
        .build()
        .unwrap();
    app.automation.load_rule(rule).unwrap();

    app.bus
        .publish(Event::new(EventType::Sensor, "motion_1", "motion_detected").with_data(json!(true)))
        .await
        .unwrap();

    let completed = || {
        app.automation
            .get_active_rules()
            .iter()
            .filter(|i| i.state == InstanceState::Completed)
            .count()
    };
    assert!(eventually(Duration::from_secs(2), || completed() == 1).await);
    let light = app.device("living_room_light");
    assert_eq!(light.command_types(), vec!["turn_on"]);
    assert!(light.is_on());
    assert!(
        eventually(Duration::from_secs(1), || {
            app.bus
                .history(usize::MAX)
                .iter()
                .any(|e| e.compound_key() == "automation.rule_completed")
        })
        .await
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(completed(), 1);
    app.stop();
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_cascade_catalogue_router_failure_onto_same_devices() {
    let app = app();
    for scenario in catalog::fault_scenarios() {
        app.fault.load_scenario(scenario).unwrap();
    }

    let parent = app.fault.trigger_scenario("router_failure", &[]).unwrap();
    let parent_devices = app.fault.get_instance(parent).unwrap().affected_devices;
    assert_eq!(parent_devices, vec!["main_router"]);

    assert!(
        eventually(Duration::from_secs(2), || {
            app.fault
                .get_active_scenarios()
                .iter()
                .any(|a| a.scenario_id == "client_disconnect")
        })
        .await
    );
    let child = app
        .fault
        .get_active_scenarios()
        .into_iter()
        .find(|a| a.scenario_id == "client_disconnect")
        .unwrap();
    assert_eq!(child.cascade_depth, 1);
    assert_eq!(child.state, ScenarioState::Active);
    assert!(child.affected_devices.iter().any(|d| parent_devices.contains(d)));

    let router = app.device("main_router");
    assert!(eventually(Duration::from_secs(1), || router.health() == Health::Offline).await);
    assert!(app.device("work_laptop").commands().is_empty());
    app.stop();
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_fan_out_parallel_script_steps_concurrently() {
    let app = app();
    let latency = Duration::from_millis(150);
    let fans: Vec<Arc<VirtualDevice>> = ["fan_a", "fan_b", "fan_c"]
        .into_iter()
        .map(|id| Arc::new(VirtualDevice::new(id, "smart_plug").with_latency(latency)))
        .collect();
    for fan in &fans {
        app.registry.register(fan.clone());
    }
    let script = json!({
        "id": "fan_out",
        "name": "Fan out",
        "steps": [{
            "id": "all",
            "type": "parallel",
            "steps": [
                {"id": "a", "type": "action", "action": {"type": "device", "target": "fan_a", "method": "turn_on"}},
                {"id": "b", "type": "action", "action": {"type": "device", "target": "fan_b", "method": "turn_on"}},
                {"id": "c", "type": "action", "action": {"type": "device", "target": "fan_c", "method": "turn_on"}}
            ]
        }]
    });
    let id = app
        .script
        .load_script_str(ScriptFormat::Json, &script.to_string())
        .unwrap();

    let started_at = tokio::time::Instant::now();
    let execution_id = app.script.execute_script(&id, Map::new()).unwrap();
    let finished = || {
        app.script
            .get_execution(execution_id)
            .is_some_and(|e| e.state == ExecutionState::Completed)
    };
    assert!(eventually(Duration::from_secs(2), finished).await);

    assert!(started_at.elapsed() < latency * 3);
    for fan in &fans {
        assert_eq!(fan.command_types(), vec!["turn_on"]);
        assert!(fan.is_on());
    }
    assert!(app.script.get_execution(execution_id).unwrap().errors.is_empty());
    app.stop();
}

// ---------------------------------------------------------------------------
// Event bus back-pressure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_reject_publish_when_queue_stays_full() {
    let bus = EventBus::new(EventBusConfig {
        queue_size: 2,
        publish_timeout: Duration::from_millis(20),
        ..EventBusConfig::default()
    });
    bus.start();
    bus.subscribe(
        "sensor",
        EventHandler::spawned("stall", |_| tokio::time::sleep(Duration::from_secs(2)))
            .with_dispatch(Dispatch::Inline),
    )
    .unwrap();

    let started_at = tokio::time::Instant::now();
    let mut results = Vec::new();
    for i in 0..4 {
        results.push(
            bus.publish(Event::new(EventType::Sensor, "motion_1", format!("m{i}")))
                .await,
        );
    }

    assert!(matches!(
        results.last(),
        Some(Err(SimHubError::Capacity(CapacityError::QueueFull)))
    ));
    assert!(started_at.elapsed() < Duration::from_secs(1));
    assert!(bus.statistics().rejected >= 1);
    bus.stop();
}
