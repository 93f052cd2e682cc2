//! Cron-expression cadence backed by a parsed [`cron::Schedule`].
//!
//! Accepts 5-field (minute hour dom month dow) and 6-field (leading
//! seconds) expressions. 5-field expressions are normalised by prepending a
//! zero seconds field before parsing. The expression is parsed exactly once,
//! at construction; occurrence queries reuse the parsed schedule.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A cron cadence. Equality and serialization work on the original
/// expression string; the parsed schedule is carried alongside.
#[derive(Debug, Clone)]
pub struct CronInterval {
    expr: String,
    schedule: Schedule,
}

impl CronInterval {
    /// Parse a 5- or 6-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, cron::error::Error> {
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        let schedule = Schedule::from_str(&normalized)?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    /// The expression as originally supplied.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Next UTC instant strictly after `current` matching the expression.
    pub fn next_occurrence(&self, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&current).next()
    }

    /// Estimated gap between occurrences, sampled from the schedule.
    pub fn estimated_period(&self) -> Duration {
        let mut upcoming = self.schedule.upcoming(Utc);
        match (upcoming.next(), upcoming.next()) {
            (Some(a), Some(b)) => b - a,
            _ => Duration::days(365),
        }
    }
}

impl PartialEq for CronInterval {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl fmt::Display for CronInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl Serialize for CronInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expr)
    }
}

impl<'de> Deserialize<'de> for CronInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        CronInterval::parse(&expr).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn six_field_expression_with_seconds() {
        let cron = CronInterval::parse("0 */5 * * * *").unwrap();
        let current = Utc.with_ymd_and_hms(2024, 3, 1, 12, 7, 34).unwrap();
        assert_eq!(
            cron.next_occurrence(current),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 10, 0).unwrap())
        );
    }

    #[test]
    fn five_field_expression_is_normalised() {
        let cron = CronInterval::parse("30 4 * * *").unwrap();
        let current = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            cron.next_occurrence(current),
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 4, 30, 0).unwrap())
        );
        assert_eq!(cron.expression(), "30 4 * * *");
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(CronInterval::parse("not a cron").is_err());
    }

    #[test]
    fn serde_round_trips_the_expression() {
        let cron = CronInterval::parse("0 0 12 * * *").unwrap();
        let json = serde_json::to_string(&cron).unwrap();
        assert_eq!(json, "\"0 0 12 * * *\"");
        let back: CronInterval = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cron);
    }

    #[test]
    fn estimated_period_for_frequent_schedule() {
        let cron = CronInterval::parse("0 * * * * *").unwrap();
        assert_eq!(cron.estimated_period(), Duration::minutes(1));
    }
}
