use std::time::Duration;

use crate::automation::{
    Action, ActionKind, AutomationRule, Curve, DeviceState, Scene, Transition, Trigger, TriggerKind,
};
use crate::device::ALL_LIGHTS;
use crate::error::SimHubError;
use crate::rule::{Condition, ConditionKind, Logic, Rule};
use crate::value::Operator;

use super::{hours, minutes};

/// `motion_lighting`, `temperature_control`, `security_alert`, `energy_saving`.
///
/// # Errors
///
/// Returns [`SimHubError::Validation`] if a definition is invalid.
pub fn automation_rules() -> Result<Vec<AutomationRule>, SimHubError> {
    Ok(vec![
        Rule::builder("motion_lighting")
            .name("Motion Activated Lighting")
            .description("Turn on lights when motion is detected after dark")
            .trigger(
                Trigger::new(TriggerKind::Sensor, "motion_sensor", true).with_event("motion_detected"),
            )
            // true && hour >= 18 || hour <= 6
            .condition(Condition::new(ConditionKind::Time, "", "hour", Operator::Ge, 18))
            .condition(
                Condition::new(ConditionKind::Time, "", "hour", Operator::Le, 6).with_logic(Logic::Or),
            )
            .action(
                Action::device_control("turn_on_lights", "smart_bulb", "turn_on")
                    .with_param("brightness", 80)
                    .with_param("transition", 2),
            )
            .action(Action::new("auto_off_timer", ActionKind::Delay).with_delay(minutes(10)))
            .action(
                Action::device_control("turn_off_lights", "smart_bulb", "turn_off")
                    .with_param("transition", 5),
            )
            .priority(8)
            .cooldown(minutes(1))
            .build()?,
        Rule::builder("temperature_control")
            .name("Smart Temperature Control")
            .description("Cool down when it gets hot and someone is home")
            .trigger(
                Trigger::new(TriggerKind::Sensor, "temperature_sensor", 28)
                    .with_event("temperature")
                    .with_operator(Operator::Gt),
            )
            .condition(Condition::new(
                ConditionKind::Presence,
                "",
                "occupied",
                Operator::Eq,
                true,
            ))
            .action(
                Action::device_control("adjust_ac", "air_conditioner", "set_temperature")
                    .with_param("temperature", 24)
                    .with_param("mode", "cool")
                    .with_param("fan_speed", "auto"),
            )
            .priority(7)
            .cooldown(minutes(5))
            .build()?,
        Rule::builder("security_alert")
            .name("Security Alert System")
            .description("Sound the alarm and light the house on intrusion")
            .trigger(Trigger::new(TriggerKind::DeviceState, "door_sensor", "open").with_event("state"))
            .trigger(Trigger::new(TriggerKind::DeviceState, "window_sensor", "open").with_event("state"))
            .condition(Condition::new(
                ConditionKind::DeviceState,
                "security_system",
                "armed",
                Operator::Eq,
                true,
            ))
            .action(
                Action::device_control("activate_alarm", "security_alarm", "trigger")
                    .with_param("volume", 100)
                    .with_param("type", "intrusion"),
            )
            .action(Action::new(
                "turn_on_all_lights",
                ActionKind::SceneActivation {
                    target: "all_lights_on".to_string(),
                },
            ))
            .action(Action::new(
                "send_notification",
                ActionKind::Notification {
                    message: "Security breach detected!".to_string(),
                    target: "owner".to_string(),
                },
            ))
            .priority(10)
            .cooldown(Duration::from_secs(10))
            .build()?,
        Rule::builder("energy_saving")
            .name("Energy Saving Mode")
            .description("Power down when everybody left")
            .trigger(Trigger::new(TriggerKind::Presence, "", true).with_event("all_away"))
            .action(Action::device_control("lights_off", ALL_LIGHTS, "turn_off"))
            .action(
                Action::device_control("ac_eco_mode", "air_conditioner", "set_mode")
                    .with_param("mode", "eco")
                    .with_param("temperature", 28),
            )
            .action(Action::device_control("appliances_standby", "smart_plug", "standby"))
            .priority(6)
            .cooldown(minutes(10))
            .build()?,
    ])
}

/// `movie_night`, `good_morning`, `romantic_dinner`, `all_lights_on`.
#[must_use]
pub fn scenes() -> Vec<Scene> {
    let mut movie_night = Scene::new("movie_night", "Movie Night")
        .with_state(
            DeviceState::for_type("smart_bulb", "on")
                .with_property("brightness", 20)
                .with_property("color", "warm"),
        )
        .with_state(
            DeviceState::for_type("smart_tv", "on")
                .with_property("input", "streaming")
                .with_property("picture_mode", "cinema"),
        )
        .with_state(
            DeviceState::for_type("air_conditioner", "on")
                .with_property("temperature", 23)
                .with_property("mode", "quiet"),
        )
        .with_transition(transition("current", "movie_night", Duration::from_secs(10), Curve::EaseInOut))
        .with_duration(hours(3));
    movie_night.description = "Optimal settings for watching movies".to_string();

    let mut good_morning = Scene::new("good_morning", "Good Morning")
        .with_state(
            DeviceState::for_device("bedroom_light", "on")
                .with_property("brightness", 30)
                .with_property("color_temp", 3000),
        )
        .with_state(DeviceState::for_type("smart_blinds", "open").with_property("position", 100))
        .with_state(
            DeviceState::for_type("air_conditioner", "on")
                .with_property("temperature", 24)
                .with_property("mode", "auto"),
        )
        .with_transition(transition("night", "morning", minutes(5), Curve::EaseIn))
        .with_duration(minutes(30));
    good_morning.description = "Wake up routine".to_string();

    let mut romantic_dinner = Scene::new("romantic_dinner", "Romantic Dinner")
        .with_state(
            DeviceState::for_device("dining_room_light", "on")
                .with_property("brightness", 40)
                .with_property("color", "warm_white"),
        )
        .with_state(
            DeviceState::for_type("smart_speaker", "on")
                .with_property("playlist", "romantic")
                .with_property("volume", 30),
        )
        .with_duration(hours(2));
    romantic_dinner.description = "Perfect ambiance for dinner".to_string();

    let mut all_lights_on = Scene::new("all_lights_on", "All Lights On")
        .with_state(DeviceState::for_type("smart_bulb", "on").with_property("brightness", 100));
    all_lights_on.description = "Turn on all lights".to_string();

    vec![movie_night, good_morning, romantic_dinner, all_lights_on]
}

fn transition(from: &str, to: &str, duration: Duration, curve: Curve) -> Transition {
    Transition {
        from: from.to_string(),
        to: to.to_string(),
        duration,
        curve,
        steps: None,
    }
}
