//! # simhub-adapter-virtual
//!
//! Simulated devices implementing the [`Device`](simhub_app::ports::Device)
//! port, for demos and end-to-end tests.
//!
//! ## Behaviour
//!
//! | Command | Effect |
//! |---------|--------|
//! | `turn_on` / `turn_off` / `standby` / `toggle` | Power flag |
//! | `apply_fault` | Health drops by effect severity (`>=0.9` offline, `>=0.7` critical, `>=0.4` degraded, else warning) |
//! | recovery commands (`restart`, `failover`, …) | Faults cleared, health back to healthy |
//! | anything else | Recorded as the device mode; parameters kept as properties |
//!
//! An offline device rejects everything but faults and recovery commands.
//!
//! ## Dependency rule
//!
//! Depends on `simhub-app` (port traits) and `simhub-domain` only.

mod device;

use std::sync::Arc;

use simhub_app::registry::DeviceRegistry;

pub use device::{RECOVERY_COMMANDS, VirtualDevice};

/// Ids and types of the demo fleet, covering every device type and named
/// device the predefined catalogue addresses.
pub const DEFAULT_FLEET: &[(&str, &str)] = &[
    ("main_router", "router"),
    ("hallway_access_point", "access_point"),
    ("living_room_light", "smart_bulb"),
    ("kitchen_light", "smart_bulb"),
    ("office_light", "smart_bulb"),
    ("bedroom_light", "smart_bulb"),
    ("coffee_maker", "smart_plug"),
    ("microwave", "smart_plug"),
    ("kitchen_appliances", "smart_plug"),
    ("living_room_tv", "smart_tv"),
    ("living_room_ac", "air_conditioner"),
    ("front_door_camera", "security_camera"),
    ("home_alarm", "security_alarm"),
    ("kitchen_speaker", "smart_speaker"),
    ("game_console", "gaming_console"),
    ("home_hub", "smart_hub"),
    ("work_laptop", "laptop"),
    ("living_room_blinds", "smart_blinds"),
];

/// Build the demo fleet.
#[must_use]
pub fn default_fleet() -> Vec<Arc<VirtualDevice>> {
    DEFAULT_FLEET
        .iter()
        .map(|(id, device_type)| Arc::new(VirtualDevice::new(*id, *device_type)))
        .collect()
}

/// Register `devices` into `registry`, returning how many were added.
pub fn install(registry: &DeviceRegistry, devices: &[Arc<VirtualDevice>]) -> usize {
    for device in devices {
        registry.register(device.clone());
    }
    tracing::info!(devices = devices.len(), "virtual fleet registered");
    devices.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn should_build_fleet_with_unique_ids() {
        let fleet = default_fleet();
        let ids: HashSet<&str> = DEFAULT_FLEET.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), fleet.len());
    }

    #[test]
    fn should_register_fleet_into_registry() {
        let registry = DeviceRegistry::new();
        let fleet = default_fleet();

        assert_eq!(install(&registry, &fleet), DEFAULT_FLEET.len());
        assert_eq!(registry.type_of("main_router").as_deref(), Some("router"));
        assert_eq!(registry.resolve("all_lights").len(), 4);
    }

    #[test]
    fn should_cover_named_catalogue_devices() {
        let registry = DeviceRegistry::new();
        install(&registry, &default_fleet());
        for id in ["coffee_maker", "microwave", "office_light", "kitchen_appliances"] {
            assert!(registry.get(id).is_some(), "{id} missing from the fleet");
        }
    }
}
