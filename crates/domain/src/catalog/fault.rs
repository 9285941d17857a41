use crate::fault::{
    ALL_DEVICES, EffectKind, FaultEffect, FaultKind, FaultScenario, RecoveryAction, Severity,
};
use crate::rule::{Condition, ConditionKind};
use crate::value::Operator;

use super::{hours, minutes, seconds};

const CLIENT_TYPES: [&str; 3] = ["smartphone", "laptop", "tablet"];
const IOT_TYPES: [&str; 5] = [
    "smart_bulb",
    "smart_plug",
    "motion_sensor",
    "temperature_sensor",
    "security_camera",
];

/// The shipped fault catalogue. Every cascade target is defined here too.
#[must_use]
pub fn fault_scenarios() -> Vec<FaultScenario> {
    vec![
        FaultScenario::new(
            "power_outage",
            "Power Outage",
            FaultKind::PowerFailure,
            Severity::Critical,
            minutes(30),
        )
        .with_description("Complete power failure affecting all devices")
        .with_probability(0.01)
        .with_recovery_time(minutes(5))
        .affecting(ALL_DEVICES)
        .with_effect(FaultEffect::new(EffectKind::ServiceUnavailable, 1.0).on("all"))
        .with_effect(FaultEffect::new(EffectKind::DataLoss, 0.8).on("volatile"))
        .with_recovery(RecoveryAction::new("wait_power").on("power"))
        .with_recovery(RecoveryAction::new("restart").on("all").after(seconds(30)))
        .with_recovery(RecoveryAction::new("verify_services").on("all").after(minutes(1))),
        FaultScenario::new(
            "router_failure",
            "Router Failure",
            FaultKind::DeviceFailure,
            Severity::High,
            hours(2),
        )
        .with_description("Main router hardware failure")
        .with_probability(0.05)
        .with_recovery_time(minutes(30))
        .affecting("router")
        .with_effect(FaultEffect::new(EffectKind::NetworkIsolation, 1.0).on("network"))
        .with_effect(FaultEffect::new(EffectKind::ServiceUnavailable, 0.9).on("internet"))
        .with_recovery(RecoveryAction::new("failover").on("backup_router").after(minutes(1)))
        .with_recovery(RecoveryAction::new("reconfigure").on("network").after(minutes(5)))
        .cascading_to("client_disconnect")
        .cascading_to("iot_offline"),
        CLIENT_TYPES.iter().fold(
            FaultScenario::new(
                "client_disconnect",
                "Client Disconnect",
                FaultKind::NetworkOutage,
                Severity::Medium,
                minutes(15),
            )
            .with_description("Phones and laptops drop off the home network")
            .with_recovery_time(minutes(2))
            .with_effect(FaultEffect::new(EffectKind::NetworkIsolation, 0.8).on("wifi"))
            .with_recovery(RecoveryAction::new("reconnect").on("wifi").after(seconds(10))),
            |scenario, device_type| scenario.affecting(*device_type),
        ),
        IOT_TYPES.iter().fold(
            FaultScenario::new(
                "iot_offline",
                "IoT Devices Offline",
                FaultKind::NetworkOutage,
                Severity::Medium,
                minutes(20),
            )
            .with_description("Smart home devices lose their cloud connection")
            .with_recovery_time(minutes(5))
            .with_effect(FaultEffect::new(EffectKind::ServiceUnavailable, 0.7).on("cloud"))
            .with_recovery(RecoveryAction::new("reconnect").on("cloud").after(seconds(30))),
            |scenario, device_type| scenario.affecting(*device_type),
        ),
        FaultScenario::new(
            "ddos_attack",
            "DDoS Attack",
            FaultKind::SecurityIncident,
            Severity::High,
            hours(1),
        )
        .with_description("Distributed denial of service attack on network")
        .with_probability(0.02)
        .with_recovery_time(minutes(15))
        .affecting("router")
        .affecting("access_point")
        .with_effect(FaultEffect::new(EffectKind::PerformanceDegradation, 0.9).on("network"))
        .with_effect(FaultEffect::new(EffectKind::ServiceUnavailable, 0.7).on("internet"))
        .with_recovery(RecoveryAction::new("block_traffic").on("firewall"))
        .with_recovery(RecoveryAction::new("rate_limit").on("router").after(seconds(30))),
        FaultScenario::new(
            "memory_leak",
            "Memory Leak",
            FaultKind::SoftwareBug,
            Severity::Medium,
            hours(4),
        )
        .with_description("Gradual memory consumption increase")
        .with_probability(0.1)
        .with_recovery_time(minutes(2))
        .affecting("smart_tv")
        .affecting("gaming_console")
        .with_effect(FaultEffect::new(EffectKind::PerformanceDegradation, 0.6).on("device"))
        .with_recovery(RecoveryAction::new("restart").on("device")),
        FaultScenario::new(
            "firmware_corruption",
            "Firmware Corruption",
            FaultKind::SoftwareFailure,
            Severity::High,
            hours(3),
        )
        .with_description("Firmware corruption requiring reflash")
        .with_probability(0.01)
        .with_recovery_time(hours(1))
        .affecting("smart_bulb")
        .affecting("smart_plug")
        .with_effect(FaultEffect::new(EffectKind::DeviceMalfunction, 1.0).on("device"))
        .with_effect(FaultEffect::new(EffectKind::ConfigurationLoss, 0.8).on("settings"))
        .with_recovery(RecoveryAction::new("reflash_firmware").on("device"))
        .with_recovery(RecoveryAction::new("restore_config").on("device").after(minutes(10))),
        FaultScenario::new(
            "overheating",
            "Device Overheating",
            FaultKind::Environmental,
            Severity::Medium,
            hours(1),
        )
        .with_description("Device overheating due to high ambient temperature")
        .with_probability(0.05)
        .with_recovery_time(minutes(20))
        .affecting("router")
        .affecting("gaming_console")
        .with_condition(Condition::new(
            ConditionKind::Sensor,
            "temperature_sensor",
            "temperature",
            Operator::Gt,
            80,
        ))
        .with_effect(FaultEffect::new(EffectKind::ThermalThrottling, 0.7).on("device"))
        .with_effect(FaultEffect::new(EffectKind::PerformanceDegradation, 0.5).on("device"))
        .with_recovery(RecoveryAction::new("cool_down").on("device"))
        .with_recovery(RecoveryAction::new("restart").on("device").after(minutes(15))),
        FaultScenario::new(
            "network_congestion",
            "Network Congestion",
            FaultKind::NetworkIssue,
            Severity::Medium,
            minutes(30),
        )
        .with_description("High network traffic causing congestion")
        .with_probability(0.15)
        .with_recovery_time(minutes(5))
        .affecting("router")
        .affecting("access_point")
        .with_condition(Condition::new(
            ConditionKind::Custom,
            "router",
            "bandwidth_usage",
            Operator::Gt,
            0.9,
        ))
        .with_effect(FaultEffect::new(EffectKind::HighLatency, 0.8).on("network"))
        .with_effect(FaultEffect::new(EffectKind::PacketLoss, 0.3).on("network"))
        .with_recovery(RecoveryAction::new("traffic_shaping").on("router"))
        .with_recovery(RecoveryAction::new("qos_adjustment").on("router").after(minutes(1))),
        FaultScenario::new(
            "database_corruption",
            "Database Corruption",
            FaultKind::DataCorruption,
            Severity::High,
            hours(2),
        )
        .with_description("Home hub database corruption")
        .with_probability(0.02)
        .with_recovery_time(minutes(45))
        .affecting("smart_hub")
        .with_effect(FaultEffect::new(EffectKind::DataLoss, 0.6).on("database"))
        .with_effect(FaultEffect::new(EffectKind::ServiceDegradation, 0.8).on("automation"))
        .with_recovery(RecoveryAction::new("restore_backup").on("database"))
        .with_recovery(RecoveryAction::new("rebuild_index").on("database").after(minutes(10))),
    ]
}
