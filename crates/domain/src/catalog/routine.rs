use crate::error::SimHubError;
use crate::routine::{DailyRoutine, RoutineAction, RoutineKind, RoutineWindow, WORKDAYS};
use crate::rule::Rule;

use super::{hours, minutes};

fn window(start: &str, end: &str) -> Result<RoutineWindow, SimHubError> {
    Ok(RoutineWindow::new(start.parse()?, end.parse()?))
}

fn action(id: &str, device_type: &str, command: &str) -> RoutineAction {
    RoutineAction::on_type(id, device_type, command)
}

fn on_device(id: &str, device_type: &str, device_id: &str, command: &str) -> RoutineAction {
    RoutineAction {
        device_id: Some(device_id.to_string()),
        ..action(id, device_type, command)
    }
}

/// `morning_routine`, `daytime_routine`, `evening_routine`, `night_routine`.
///
/// # Errors
///
/// Returns [`SimHubError::Validation`] if a definition is invalid.
pub fn daily_routines() -> Result<Vec<DailyRoutine>, SimHubError> {
    let morning = Rule::builder("morning_routine")
        .name("Morning Routine")
        .description("Wake-up lights, comfortable temperature, coffee and news")
        .trigger(window("07:00", "09:00")?)
        .action(
            action("morning_lights_on", "smart_bulb", "turn_on")
                .with_param("brightness", 30)
                .with_param("color_temp", "warm"),
        )
        .action(
            action("morning_ac_adjust", "air_conditioner", "set_temperature")
                .with_param("temperature", 24)
                .with_param("mode", "auto")
                .with_delay(minutes(2)),
        )
        .action(
            on_device("morning_coffee", "smart_plug", "coffee_maker", "turn_on")
                .with_delay(minutes(5)),
        )
        .action(
            action("morning_news", "smart_tv", "turn_on")
                .with_param("channel", "news")
                .with_param("volume", 20)
                .with_delay(minutes(10)),
        )
        .action(
            action("morning_brightness_increase", "smart_bulb", "set_brightness")
                .with_param("brightness", 80)
                .with_param("transition", 600)
                .with_delay(minutes(15)),
        )
        .priority(10)
        .build()?;

    let daytime = Rule::builder("daytime_routine")
        .name("Daytime Energy Saving")
        .description("Energy saving and security monitoring during work hours")
        .trigger(window("09:00", "17:00")?.on(&WORKDAYS))
        .action(action("daytime_lights_off", "smart_bulb", "turn_off"))
        .action(
            action("daytime_security_on", "security_camera", "enable_monitoring")
                .with_param("motion_detection", true)
                .with_param("recording", true),
        )
        .action(
            action("daytime_ac_eco", "air_conditioner", "set_mode")
                .with_param("mode", "eco")
                .with_param("temperature", 26)
                .with_delay(minutes(5)),
        )
        .action(
            action("daytime_blinds_adjust", "smart_blinds", "set_position")
                .with_param("position", 50)
                .with_delay(minutes(5)),
        )
        .priority(8)
        .build()?;

    let evening = Rule::builder("evening_routine")
        .name("Evening Home")
        .description("Evening comfort and entertainment settings")
        .trigger(window("17:00", "23:00")?)
        .action(
            on_device("evening_lights_on", "smart_bulb", "living_room_light", "turn_on")
                .with_param("brightness", 70)
                .with_param("color_temp", "warm"),
        )
        .action(
            action("evening_ac_comfort", "air_conditioner", "set_temperature")
                .with_param("temperature", 23)
                .with_param("mode", "cool")
                .with_delay(minutes(5)),
        )
        .action(
            on_device("evening_kitchen_lights", "smart_bulb", "kitchen_light", "turn_on")
                .with_param("brightness", 90)
                .with_delay(minutes(25)),
        )
        .action(
            action("evening_entertainment", "smart_tv", "turn_on")
                .with_param("input", "streaming")
                .with_delay(minutes(30)),
        )
        .action(
            action("evening_ambient", "smart_bulb", "set_scene")
                .with_param("scene", "relax")
                .with_param("color", "orange")
                .with_delay(hours(1)),
        )
        .priority(9)
        .build()?;

    let night = Rule::builder("night_routine")
        .name("Night Sleep Mode")
        .description("Night time security and sleep environment")
        .trigger(window("23:00", "07:00")?)
        .action(
            action("night_lights_dim", "smart_bulb", "set_brightness")
                .with_param("brightness", 10)
                .with_param("transition", 300),
        )
        .action(action("night_tv_off", "smart_tv", "turn_off").with_delay(minutes(5)))
        .action(
            action("night_ac_sleep", "air_conditioner", "set_mode")
                .with_param("mode", "sleep")
                .with_param("temperature", 25)
                .with_delay(minutes(5)),
        )
        .action(
            action("night_security_arm", "security_camera", "arm_system")
                .with_param("mode", "night")
                .with_param("alerts", true)
                .with_delay(minutes(5)),
        )
        .action(action("night_lights_off", "smart_bulb", "turn_off").with_delay(minutes(15)))
        .action(
            on_device("night_pathway_light", "smart_bulb", "pathway_light", "turn_on")
                .with_param("brightness", 5),
        )
        .priority(10)
        .build()?;

    Ok(vec![
        DailyRoutine::new(RoutineKind::Morning, morning),
        DailyRoutine::new(RoutineKind::Daytime, daytime),
        DailyRoutine::new(RoutineKind::Evening, evening),
        DailyRoutine::new(RoutineKind::Night, night),
    ])
}
