//! Time and timestamp helpers.
//!
//! Two clocks are in play: UTC [`Timestamp`]s for bookkeeping (event times,
//! `last_triggered`, retention) and the local wall clock for anything a
//! human schedules (`07:30`, `Mon`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// UTC timestamp used for event times, trigger times and retention.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Return the current local wall-clock time.
#[must_use]
pub fn wall_clock() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Time elapsed between `earlier` and `later`, zero when `later` is before `earlier`.
#[must_use]
pub fn elapsed_between(earlier: Timestamp, later: Timestamp) -> Duration {
    (later - earlier).to_std().unwrap_or_default()
}

/// `ts + duration`, saturating at the maximum representable instant.
#[must_use]
pub fn after(ts: Timestamp, duration: Duration) -> Timestamp {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| ts.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

const MINUTES_PER_DAY: u16 = 24 * 60;

/// A minute of the day, written `HH:MM` in 24-hour format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Build from hour and minute, `None` when out of range.
    #[must_use]
    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self(hour * 60 + minute))
    }

    /// Minute-of-day of a wall-clock instant.
    #[must_use]
    pub fn of(at: &NaiveDateTime) -> Self {
        // hour < 24 and minute < 60, so the product always fits in u16
        let hour = u16::try_from(at.hour()).unwrap_or(0);
        let minute = u16::try_from(at.minute()).unwrap_or(0);
        Self(hour * 60 + minute)
    }

    #[must_use]
    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    #[must_use]
    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    /// Whether `self` lies inside the half-open window `start..end`.
    ///
    /// A window whose end is before its start crosses midnight
    /// (`22:00..06:00` contains `23:30` and `05:00`).
    #[must_use]
    pub fn within(self, start: Self, end: Self) -> bool {
        if start <= end {
            self >= start && self < end
        } else {
            self >= start || self < end
        }
    }

    /// Length of the window `self..end`, wrapping past midnight.
    #[must_use]
    pub fn span_to(self, end: Self) -> Duration {
        let minutes = (end.0 + MINUTES_PER_DAY - self.0) % MINUTES_PER_DAY;
        Duration::from_secs(u64::from(minutes) * 60)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidTimeOfDay(s.to_string());
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        let hour = hour.trim().parse().map_err(|_| invalid())?;
        let minute = minute.trim().parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helper storing a [`Duration`] as (fractional) seconds.
pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    /// # Errors
    ///
    /// Fails on negative, non-finite or non-numeric input.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(raw).map_err(serde::de::Error::custom)
    }
}

/// Same as [`secs`] for optional durations.
pub mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    ///
    /// Fails on negative, non-finite or non-numeric input.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|raw| Duration::try_from_secs_f64(raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_clamp_elapsed_to_zero_when_later_is_earlier() {
        let t = now();
        let earlier = t - TimeDelta::seconds(5);
        assert_eq!(elapsed_between(t, earlier), Duration::ZERO);
        assert_eq!(elapsed_between(earlier, t), Duration::from_secs(5));
    }

    #[test]
    fn should_add_duration_to_timestamp() {
        let t = now();
        assert_eq!(after(t, Duration::from_secs(60)) - t, TimeDelta::seconds(60));
    }

    #[test]
    fn should_parse_and_display_time_of_day() {
        let t: TimeOfDay = "07:05".parse().unwrap();
        assert_eq!(t.hour(), 7);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.to_string(), "07:05");
    }

    #[test]
    fn should_reject_time_of_day_when_out_of_range() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn should_contain_time_when_window_is_same_day() {
        let start: TimeOfDay = "08:00".parse().unwrap();
        let end: TimeOfDay = "10:00".parse().unwrap();
        assert!(TimeOfDay::of(&at(8, 0)).within(start, end));
        assert!(TimeOfDay::of(&at(9, 59)).within(start, end));
        assert!(!TimeOfDay::of(&at(10, 0)).within(start, end));
    }

    #[test]
    fn should_contain_time_when_window_crosses_midnight() {
        let start: TimeOfDay = "22:00".parse().unwrap();
        let end: TimeOfDay = "06:00".parse().unwrap();
        assert!(TimeOfDay::of(&at(23, 30)).within(start, end));
        assert!(TimeOfDay::of(&at(5, 0)).within(start, end));
        assert!(!TimeOfDay::of(&at(12, 0)).within(start, end));
        assert!(!TimeOfDay::of(&at(6, 0)).within(start, end));
    }

    #[test]
    fn should_measure_window_span_across_midnight() {
        let start: TimeOfDay = "23:00".parse().unwrap();
        let end: TimeOfDay = "07:00".parse().unwrap();
        assert_eq!(start.span_to(end), Duration::from_secs(8 * 3600));
        assert_eq!(end.span_to(start), Duration::from_secs(16 * 3600));
    }

    #[test]
    fn should_deserialize_fractional_seconds() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(with = "secs")]
            delay: Duration,
        }
        let w: Wrapper = serde_json::from_str(r#"{"delay": 0.25}"#).unwrap();
        assert_eq!(w.delay, Duration::from_millis(250));
    }

    #[test]
    fn should_reject_negative_seconds() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            #[serde(with = "secs")]
            #[allow(dead_code)]
            delay: Duration,
        }
        assert!(serde_json::from_str::<Wrapper>(r#"{"delay": -1}"#).is_err());
    }
}
