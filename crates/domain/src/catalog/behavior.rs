use crate::behavior::{Activity, BehaviorPattern, DeviceInteraction, PatternKind, PatternTrigger};
use crate::error::SimHubError;
use crate::rule::Rule;

use super::{hours, minutes};

fn on(device_type: &str, action: &str) -> DeviceInteraction {
    DeviceInteraction::on_type(device_type, action)
}

fn on_device(device_type: &str, device_id: &str, action: &str) -> DeviceInteraction {
    DeviceInteraction {
        device_id: Some(device_id.to_string()),
        ..DeviceInteraction::on_type(device_type, action)
    }
}

/// `workday_pattern`, `weekend_pattern`, `vacation_pattern`, `party_pattern`.
///
/// # Errors
///
/// Returns [`SimHubError::Validation`] if a definition is invalid.
pub fn behavior_patterns() -> Result<Vec<BehaviorPattern>, SimHubError> {
    let workday = Rule::builder("workday_pattern")
        .name("Workday Pattern")
        .description("Typical weekday: morning rush, remote work, evening TV")
        .trigger(PatternTrigger::Workday)
        .action(
            Activity::new("morning_prep", "Morning Preparation")
                .with_device(on("smart_bulb", "gradual_on").with_param("brightness", 80))
                .with_device(on("air_conditioner", "set_temperature").with_param("temperature", 24))
                .with_device(on_device("smart_plug", "coffee_maker", "turn_on"))
                .lasting(hours(2))
                .with_probability(0.95)
                .with_usage(5.0, 1500.0),
        )
        .action(
            Activity::new("remote_work", "Remote Work Session")
                .with_device(on("laptop", "intensive_use").with_param("bandwidth", 25))
                .with_device(on_device("smart_bulb", "office_light", "maintain_brightness"))
                .lasting(hours(8))
                .with_probability(0.8)
                .with_usage(25.0, 120.0),
        )
        .action(
            Activity::new("lunch_break", "Lunch Break")
                .with_device(on_device("smart_plug", "microwave", "turn_on"))
                .with_device(on("smart_tv", "turn_on").with_param("channel", "news"))
                .lasting(hours(1))
                .with_probability(0.7),
        )
        .action(
            Activity::new("evening_entertainment", "Evening Entertainment")
                .with_device(on("smart_tv", "streaming").with_param("quality", "4k"))
                .with_device(on("smart_bulb", "dim_lights").with_param("brightness", 30))
                .lasting(hours(3))
                .with_probability(0.85)
                .with_usage(25.0, 200.0),
        )
        .priority(8)
        .build()?;

    let weekend = Rule::builder("weekend_pattern")
        .name("Weekend Pattern")
        .description("Late start, brunch, gaming and a movie")
        .trigger(PatternTrigger::Weekend)
        .action(
            Activity::new("late_morning", "Late Morning")
                .with_device(on("smart_bulb", "keep_off"))
                .with_device(on("air_conditioner", "maintain_temperature").with_param("temperature", 25))
                .lasting(hours(3))
                .with_probability(0.8),
        )
        .action(
            Activity::new("brunch", "Brunch Preparation")
                .with_device(on_device("smart_plug", "kitchen_appliances", "sequential_use"))
                .with_device(on("smart_tv", "background_music").with_param("volume", 20))
                .lasting(minutes(90))
                .with_probability(0.7),
        )
        .action(
            Activity::new("gaming_session", "Gaming Session")
                .with_device(on("gaming_console", "intensive_gaming").with_param("online", true))
                .with_device(on("smart_tv", "gaming_display"))
                .lasting(hours(4))
                .with_probability(0.6)
                .with_usage(50.0, 350.0),
        )
        .action(
            Activity::new("movie_night", "Movie Night")
                .with_device(on("smart_tv", "movie_streaming").with_param("quality", "4k"))
                .with_device(on("smart_bulb", "theater_mode").with_param("brightness", 10))
                .lasting(hours(3))
                .with_probability(0.75)
                .with_usage(25.0, 200.0),
        )
        .priority(7)
        .build()?;

    let vacation = Rule::builder("vacation_pattern")
        .name("Vacation Pattern")
        .description("Nobody home: keep watch and fake presence")
        .trigger(PatternTrigger::Manual)
        .action(
            Activity::new("security_check", "Security Check")
                .with_device(on("security_camera", "continuous_monitoring").with_param("recording", true))
                .lasting(hours(24)),
        )
        .action(
            Activity::new("presence_simulation", "Presence Simulation")
                .with_device(on("smart_bulb", "random_pattern").with_param("randomness", 0.3))
                .lasting(hours(4))
                .with_probability(0.9),
        )
        .priority(10)
        .build()?;

    let party = Rule::builder("party_pattern")
        .name("Party Pattern")
        .description("Lights, music and a guest network")
        .trigger(PatternTrigger::Manual)
        .action(
            Activity::new("party_setup", "Party Setup")
                .with_device(on("smart_bulb", "party_lights").with_param("mode", "disco"))
                .with_device(on("smart_speaker", "party_music").with_param("volume", 70))
                .lasting(hours(1))
                .with_usage(10.0, 400.0),
        )
        .action(
            Activity::new("guest_devices", "Guest Device Connections")
                .with_device(on("router", "guest_network").with_param("max_clients", 20))
                .lasting(hours(5))
                .with_probability(0.95)
                .with_usage(40.0, 0.0),
        )
        .priority(9)
        .build()?;

    Ok(vec![
        BehaviorPattern::new(PatternKind::Workday, workday)
            .with_probability(0.7)
            .with_duration(hours(24)),
        BehaviorPattern::new(PatternKind::Weekend, weekend)
            .with_probability(0.9)
            .with_duration(hours(24)),
        BehaviorPattern::new(PatternKind::Vacation, vacation).with_duration(hours(24)),
        BehaviorPattern::new(PatternKind::Party, party)
            .with_probability(0.1)
            .with_duration(hours(6)),
    ])
}
