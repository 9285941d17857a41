//! Five-field cron expressions: `minute hour day-of-month month day-of-week`.
//!
//! Each field accepts `*`, single values, ranges `a-b`, steps `*/n` or
//! `a-b/n`, and comma lists. Day-of-week runs 0–7 with both 0 and 7 meaning
//! Sunday. When both day fields are restricted a time matches if either
//! does.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [Field; 5] = [
    Field { name: "minute", min: 0, max: 59 },
    Field { name: "hour", min: 0, max: 23 },
    Field { name: "day of month", min: 1, max: 31 },
    Field { name: "month", min: 1, max: 12 },
    Field { name: "day of week", min: 0, max: 7 },
];

impl CronSchedule {
    /// Parse a five-field expression.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCron`] when the field count is wrong
    /// or a field holds an out-of-range or malformed value.
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != FIELDS.len() {
            return Err(invalid(format!("expected 5 fields, got {}", parts.len())));
        }
        let mut masks = [0_u64; 5];
        for (mask, (part, field)) in masks.iter_mut().zip(parts.iter().zip(&FIELDS)) {
            *mask = parse_field(part, field).map_err(invalid)?;
        }
        // Sunday is both 0 and 7.
        if masks[4] & (1 << 7) != 0 {
            masks[4] = (masks[4] | 1) & !(1 << 7);
        }
        Ok(Self {
            expression: parts.join(" "),
            minutes: masks[0],
            hours: masks[1],
            days_of_month: masks[2],
            months: masks[3],
            days_of_week: masks[4],
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    /// Whether the minute containing `at` is selected.
    #[must_use]
    pub fn matches(&self, at: &NaiveDateTime) -> bool {
        let bit = |mask: u64, v: u32| mask & (1 << v) != 0;
        let dom = bit(self.days_of_month, at.day());
        let dow = bit(self.days_of_week, at.weekday().num_days_from_sunday());
        let day = match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            _ => dom && dow,
        };
        bit(self.minutes, at.minute()) && bit(self.hours, at.hour()) && bit(self.months, at.month()) && day
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expression
    }
}

fn parse_field(part: &str, field: &Field) -> Result<u64, String> {
    let mut mask = 0_u64;
    for item in part.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step {step:?} in {} field", field.name))?;
                if step == 0 {
                    return Err(format!("zero step in {} field", field.name));
                }
                (range, step)
            }
            None => (item, 1),
        };
        let (start, end) = if range == "*" {
            (field.min, field.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a, field)?, value(b, field)?)
        } else {
            let v = value(range, field)?;
            // `5/15` means from 5 to the end of the field.
            (v, if step > 1 { field.max } else { v })
        };
        if start > end {
            return Err(format!("descending range {range:?} in {} field", field.name));
        }
        for v in (start..=end).step_by(step as usize) {
            mask |= 1 << v;
        }
    }
    Ok(mask)
}

fn value(raw: &str, field: &Field) -> Result<u32, String> {
    let v: u32 = raw
        .parse()
        .map_err(|_| format!("bad value {raw:?} in {} field", field.name))?;
    if v < field.min || v > field.max {
        return Err(format!(
            "{v} outside {}..={} in {} field",
            field.min, field.max, field.name
        ));
    }
    Ok(v)
}

impl FromStr for CronSchedule {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronSchedule {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CronSchedule> for String {
    fn from(value: CronSchedule) -> Self {
        value.expression
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // March 2024: the 4th is a Monday, the 10th a Sunday.
    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn should_match_every_minute_with_all_wildcards() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        assert!(cron.matches(&at(4, 0, 0)));
        assert!(cron.matches(&at(10, 23, 59)));
    }

    #[test]
    fn should_match_steps_and_ranges() {
        let cron = CronSchedule::parse("*/15 9-17 * * 1-5").unwrap();
        assert!(cron.matches(&at(4, 9, 30)));
        assert!(!cron.matches(&at(4, 9, 31)));
        assert!(!cron.matches(&at(4, 18, 0)));
        assert!(!cron.matches(&at(10, 12, 0)));
    }

    #[test]
    fn should_match_lists() {
        let cron = CronSchedule::parse("0 7,19 * * *").unwrap();
        assert!(cron.matches(&at(5, 7, 0)));
        assert!(cron.matches(&at(5, 19, 0)));
        assert!(!cron.matches(&at(5, 8, 0)));
    }

    #[test]
    fn should_treat_seven_as_sunday() {
        let cron = CronSchedule::parse("0 10 * * 7").unwrap();
        assert!(cron.matches(&at(10, 10, 0)));
        assert!(!cron.matches(&at(4, 10, 0)));
    }

    #[test]
    fn should_match_either_day_field_when_both_restricted() {
        let cron = CronSchedule::parse("0 0 1 * 1").unwrap();
        assert!(cron.matches(&at(1, 0, 0)));
        assert!(cron.matches(&at(4, 0, 0)));
        assert!(!cron.matches(&at(5, 0, 0)));
    }

    #[test]
    fn should_reject_malformed_expressions() {
        for bad in ["* * * *", "60 * * * *", "*/0 * * * *", "5-1 * * * *", "a * * * *"] {
            assert!(
                matches!(CronSchedule::parse(bad), Err(ValidationError::InvalidCron { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn should_round_trip_through_serde_as_string() {
        let cron: CronSchedule = serde_json::from_str(r#""30 6 * * 1-5""#).unwrap();
        assert_eq!(serde_json::to_string(&cron).unwrap(), r#""30 6 * * 1-5""#);
        assert!(serde_json::from_str::<CronSchedule>(r#""nope""#).is_err());
    }
}
