//! Recurring task configuration and next-run computation.
//!
//! A [`RecurringTask`] combines at most one first-run anchor (`run_now`, a
//! specific instant, or an initial delay) with at most one [`Interval`]
//! cadence and optional bounds (`max_runs`, `run_until`). The scheduler asks
//! it one question, [`RecurringTask::next_valid_run`], and treats `None` as
//! "this configuration produces no further runs".

mod cron;
mod interval;

pub use cron::CronInterval;
pub use interval::{
    DayInterval, HourInterval, Interval, MinuteInterval, MonthInterval, SecondInterval,
    WeekInterval,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Window inside which a `run_now` candidate is coalesced into the
/// interval's first tick, so scheduling lag cannot double-fire the task.
const RUN_NOW_COALESCE_WINDOW: i64 = 1_000; // milliseconds

/// Configuration of a recurring task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurringTask {
    /// Fire once immediately, then follow the interval.
    pub run_now: bool,
    /// First run at an absolute instant (may lie in the past).
    pub specific_run_time: Option<DateTime<Utc>>,
    /// First run after a relative delay.
    pub initial_delay: Option<std::time::Duration>,
    /// The cadence followed after the first run.
    pub interval: Option<Interval>,
    /// Upper bound on the number of runs.
    pub max_runs: Option<u32>,
    /// No run is scheduled past this instant.
    pub run_until: Option<DateTime<Utc>>,
}

impl RecurringTask {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Cadence constructors
    // ------------------------------------------------------------------

    pub fn every_seconds(n: u32) -> Self {
        Self::new().with_interval(Interval::Second(SecondInterval::new(n)))
    }

    pub fn every_minutes(n: u32) -> Self {
        Self::new().with_interval(Interval::Minute(MinuteInterval::new(n)))
    }

    pub fn every_hours(n: u32) -> Self {
        Self::new().with_interval(Interval::Hour(HourInterval::new(n)))
    }

    pub fn every_days(n: u32) -> Self {
        Self::new().with_interval(Interval::Day(DayInterval::new(n)))
    }

    pub fn every_weeks(n: u32) -> Self {
        Self::new().with_interval(Interval::Week(WeekInterval::new(n)))
    }

    pub fn every_months(n: u32) -> Self {
        Self::new().with_interval(Interval::Month(MonthInterval::new(n)))
    }

    /// Cadence from a 5- or 6-field cron expression.
    pub fn cron(expr: &str) -> Result<Self, ::cron::error::Error> {
        Ok(Self::new().with_interval(Interval::Cron(CronInterval::parse(expr)?)))
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    // ------------------------------------------------------------------
    // First-run anchors and bounds
    // ------------------------------------------------------------------

    pub fn run_now(mut self) -> Self {
        self.run_now = true;
        self
    }

    pub fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.specific_run_time = Some(at);
        self
    }

    pub fn after_delay(mut self, delay: std::time::Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    pub fn with_max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    pub fn with_run_until(mut self, until: DateTime<Utc>) -> Self {
        self.run_until = Some(until);
        self
    }

    // ------------------------------------------------------------------
    // Next-run computation
    // ------------------------------------------------------------------

    /// Compute the next valid run, or `None` when the configuration yields
    /// no further runs.
    ///
    /// `scheduled_time` is the instant the previous run was scheduled for
    /// (the dispatcher passes the reference instant for both arguments so a
    /// millisecond of drift cannot elide a `run_now`). `current_run` is the
    /// number of runs already performed.
    ///
    /// The first run prefers the explicit anchor (`run_now`, specific
    /// instant, initial delay) and may surface a past instant unchanged;
    /// the queue fires it immediately. Subsequent runs follow the interval.
    /// A `run_now` whose interval first tick lands within one second is
    /// coalesced into that tick.
    pub fn next_valid_run(
        &self,
        scheduled_time: Option<DateTime<Utc>>,
        current_run: u32,
        reference_time: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if let Some(max) = self.max_runs {
            if current_run >= max {
                return None;
            }
        }
        if let Some(until) = self.run_until {
            if reference_time > until {
                return None;
            }
        }

        let candidate = self.candidate_run(scheduled_time, current_run, reference_time)?;

        if let Some(until) = self.run_until {
            if candidate > until {
                return None;
            }
        }
        Some(candidate)
    }

    fn candidate_run(
        &self,
        scheduled_time: Option<DateTime<Utc>>,
        current_run: u32,
        reference_time: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let base = if self.run_now {
            Some(reference_time)
        } else {
            self.specific_run_time.or_else(|| {
                self.initial_delay
                    .and_then(|d| Duration::from_std(d).ok())
                    .map(|d| reference_time + d)
            })
        };

        if current_run == 0 {
            if let Some(base) = base {
                if self.run_now {
                    if let Some(interval) = &self.interval {
                        if let Some(first_tick) = interval.next_occurrence(reference_time) {
                            if (first_tick - base).num_milliseconds().abs()
                                <= RUN_NOW_COALESCE_WINDOW
                            {
                                return Some(first_tick);
                            }
                        }
                    }
                }
                // A past base is only valid on the first run and surfaces
                // unchanged; the queue fires it immediately.
                return Some(base);
            }
            return self.interval.as_ref()?.next_occurrence(reference_time);
        }

        // Past anchors never re-fire; subsequent runs follow the interval.
        let interval = self.interval.as_ref()?;
        let from = scheduled_time.map_or(reference_time, |s| s.max(reference_time));
        interval.next_occurrence(from)
    }

    /// Lower bound on the gap between runs, when an interval is configured.
    pub fn min_interval(&self) -> Option<Duration> {
        self.interval.as_ref().map(|i| i.min_period())
    }

    /// Human-readable description of the configuration.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.run_now {
            parts.push("run immediately".to_string());
        } else if let Some(at) = self.specific_run_time {
            parts.push(format!("first run at {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
        } else if let Some(delay) = self.initial_delay {
            parts.push(format!("first run after {delay:?}"));
        }
        if let Some(interval) = &self.interval {
            parts.push(interval.describe());
        }
        if let Some(max) = self.max_runs {
            parts.push(format!("at most {max} run(s)"));
        }
        if let Some(until) = self.run_until {
            parts.push(format!("until {}", until.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if parts.is_empty() {
            "unscheduled".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn max_runs_exhausted_yields_none() {
        let cfg = RecurringTask::every_seconds(1).with_max_runs(3);
        let now = utc(2024, 3, 1, 12, 0, 0);
        assert!(cfg.next_valid_run(Some(now), 3, now).is_none());
        assert!(cfg.next_valid_run(Some(now), 2, now).is_some());
    }

    #[test]
    fn run_until_in_the_past_yields_none() {
        let cfg = RecurringTask::every_minutes(1).with_run_until(utc(2024, 3, 1, 11, 0, 0));
        let now = utc(2024, 3, 1, 12, 0, 0);
        assert!(cfg.next_valid_run(Some(now), 0, now).is_none());
    }

    #[test]
    fn run_until_bounds_the_computed_candidate() {
        // The next tick would land a minute out, past the bound.
        let now = utc(2024, 3, 1, 12, 0, 0);
        let cfg = RecurringTask::every_minutes(1).with_run_until(now + Duration::seconds(30));
        assert!(cfg.next_valid_run(Some(now), 1, now).is_none());
    }

    #[test]
    fn run_now_fires_at_the_reference_instant() {
        let cfg = RecurringTask::every_hours(1).run_now();
        let now = utc(2024, 3, 1, 12, 0, 0);
        assert_eq!(cfg.next_valid_run(Some(now), 0, now), Some(now));
    }

    #[test]
    fn run_now_never_lands_before_the_reference() {
        let cfg = RecurringTask::every_seconds(1).run_now();
        let now = Utc::now();
        let next = cfg.next_valid_run(Some(now), 0, now).unwrap();
        assert!(next >= now - Duration::milliseconds(1));
    }

    #[test]
    fn run_now_coalesces_into_a_close_first_tick() {
        // Every second: the first tick is within the coalesce window, so the
        // immediate run folds into it instead of double-firing.
        let cfg = RecurringTask::every_seconds(1).run_now();
        let now = utc(2024, 3, 1, 12, 0, 0);
        assert_eq!(
            cfg.next_valid_run(Some(now), 0, now),
            Some(now + Duration::seconds(1))
        );
    }

    #[test]
    fn past_specific_run_time_surfaces_unchanged_on_first_run() {
        let past = utc(2024, 3, 1, 10, 0, 0);
        let now = utc(2024, 3, 1, 12, 0, 0);
        let cfg = RecurringTask::every_hours(1).starting_at(past);
        assert_eq!(cfg.next_valid_run(Some(now), 0, now), Some(past));
    }

    #[test]
    fn past_anchor_without_interval_yields_none_after_first_run() {
        let past = utc(2024, 3, 1, 10, 0, 0);
        let now = utc(2024, 3, 1, 12, 0, 0);
        let cfg = RecurringTask::new().starting_at(past);
        assert!(cfg.next_valid_run(Some(now), 1, now).is_none());
    }

    #[test]
    fn initial_delay_offsets_the_first_run() {
        let now = utc(2024, 3, 1, 12, 0, 0);
        let cfg = RecurringTask::every_minutes(5).after_delay(std::time::Duration::from_secs(90));
        assert_eq!(
            cfg.next_valid_run(Some(now), 0, now),
            Some(now + Duration::seconds(90))
        );
    }

    #[test]
    fn subsequent_runs_follow_the_interval() {
        let cfg = RecurringTask::every_minutes(5).run_now();
        let last = utc(2024, 3, 1, 12, 0, 0);
        let now = utc(2024, 3, 1, 12, 0, 1);
        assert_eq!(
            cfg.next_valid_run(Some(last), 1, now),
            Some(now + Duration::minutes(5))
        );
    }

    #[test]
    fn interval_only_config_starts_at_first_occurrence() {
        let cfg = RecurringTask::every_seconds(10);
        let now = utc(2024, 3, 1, 12, 0, 0);
        assert_eq!(
            cfg.next_valid_run(Some(now), 0, now),
            Some(now + Duration::seconds(10))
        );
    }

    #[test]
    fn cron_config_matches_expression() {
        let cfg = RecurringTask::cron("0 */5 * * * *").unwrap();
        let now = utc(2024, 3, 1, 12, 7, 34);
        assert_eq!(
            cfg.next_valid_run(Some(now), 1, now),
            Some(utc(2024, 3, 1, 12, 10, 0))
        );
    }

    #[test]
    fn serde_round_trips_the_whole_configuration() {
        let cfg = RecurringTask::every_days(2)
            .run_now()
            .with_max_runs(10)
            .with_run_until(utc(2025, 1, 1, 0, 0, 0));
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RecurringTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn describe_mentions_anchor_and_bounds() {
        let cfg = RecurringTask::every_minutes(2).run_now().with_max_runs(5);
        let text = cfg.describe();
        assert!(text.contains("run immediately"));
        assert!(text.contains("every 2 minute(s)"));
        assert!(text.contains("at most 5 run(s)"));
    }
}
