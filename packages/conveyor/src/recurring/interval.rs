//! Calendar interval variants and their next-occurrence arithmetic.
//!
//! Each variant answers `next_occurrence(current)`: the first instant
//! strictly after `current` that matches the cadence. All instants are UTC;
//! time-of-day anchors (`on_times`) are normalised to a sorted, duplicate-free
//! list on assignment and on deserialization, so lookups can rely on order.

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

use super::cron::CronInterval;

/// A cadence variant. Exactly one of these backs a recurring task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Second(SecondInterval),
    Minute(MinuteInterval),
    Hour(HourInterval),
    Day(DayInterval),
    Week(WeekInterval),
    Month(MonthInterval),
    Cron(CronInterval),
}

impl Interval {
    /// First instant strictly after `current` matching this cadence.
    pub fn next_occurrence(&self, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Interval::Second(i) => Some(i.next_occurrence(current)),
            Interval::Minute(i) => Some(i.next_occurrence(current)),
            Interval::Hour(i) => Some(i.next_occurrence(current)),
            Interval::Day(i) => Some(i.next_occurrence(current)),
            Interval::Week(i) => Some(i.next_occurrence(current)),
            Interval::Month(i) => i.next_occurrence(current),
            Interval::Cron(i) => i.next_occurrence(current),
        }
    }

    /// Lower bound on the gap between two occurrences.
    ///
    /// Used to decide whether a recurring task is worth resolving lazily.
    /// For cron expressions this is an estimate sampled from the schedule.
    pub fn min_period(&self) -> Duration {
        match self {
            Interval::Second(i) => Duration::seconds(i.every as i64),
            Interval::Minute(i) => Duration::minutes(i.every as i64),
            Interval::Hour(i) => Duration::hours(i.every as i64),
            Interval::Day(i) => {
                // Several times per day shrink the effective period.
                if i.on_times.len() > 1 {
                    Duration::days(i.every as i64) / i.on_times.len() as i32
                } else {
                    Duration::days(i.every as i64)
                }
            }
            Interval::Week(i) => {
                if i.on_days.len() > 1 || i.on_times.len() > 1 {
                    Duration::days(1)
                } else {
                    Duration::weeks(i.every as i64)
                }
            }
            Interval::Month(i) => {
                if i.on_days.len() > 1 || i.on_times.len() > 1 {
                    Duration::days(1)
                } else {
                    Duration::days(28) * i.every as i32
                }
            }
            Interval::Cron(i) => i.estimated_period(),
        }
    }

    /// Human-readable cadence description, persisted for dashboards.
    pub fn describe(&self) -> String {
        match self {
            Interval::Second(i) => format!("every {} second(s)", i.every),
            Interval::Minute(i) => match i.on_second {
                Some(s) => format!("every {} minute(s) at second {s}", i.every),
                None => format!("every {} minute(s)", i.every),
            },
            Interval::Hour(i) => match (i.on_minute, i.on_second) {
                (Some(m), _) => format!("every {} hour(s) at minute {m}", i.every),
                (None, Some(s)) => format!("every {} hour(s) at second {s}", i.every),
                (None, None) => format!("every {} hour(s)", i.every),
            },
            Interval::Day(i) => {
                let mut out = format!("every {} day(s)", i.every);
                if !i.on_times.is_empty() {
                    out.push_str(&format!(" at {}", join_times(&i.on_times)));
                }
                if !i.on_days.is_empty() {
                    out.push_str(&format!(" on {}", join_days(&i.on_days)));
                }
                out
            }
            Interval::Week(i) => {
                let mut out = format!("every {} week(s)", i.every);
                if !i.on_days.is_empty() {
                    out.push_str(&format!(" on {}", join_days(&i.on_days)));
                }
                if !i.on_times.is_empty() {
                    out.push_str(&format!(" at {}", join_times(&i.on_times)));
                }
                out
            }
            Interval::Month(i) => {
                let mut out = format!("every {} month(s)", i.every);
                if let Some(wd) = i.on_first {
                    out.push_str(&format!(" on the first {wd}"));
                } else if !i.on_days.is_empty() {
                    let days: Vec<String> = i.on_days.iter().map(|d| d.to_string()).collect();
                    out.push_str(&format!(" on day(s) {}", days.join(", ")));
                } else if let Some(d) = i.on_day {
                    out.push_str(&format!(" on day {d}"));
                }
                if !i.on_times.is_empty() {
                    out.push_str(&format!(" at {}", join_times(&i.on_times)));
                }
                out
            }
            Interval::Cron(i) => format!("cron {}", i.expression()),
        }
    }
}

fn join_times(times: &[NaiveTime]) -> String {
    times
        .iter()
        .map(|t| t.format("%H:%M:%S").to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_days(days: &[Weekday]) -> String {
    days.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sorted, duplicate-free times-of-day. The invariant holds for every path
/// into the field, including deserialization.
pub(crate) fn normalize_times(mut times: Vec<NaiveTime>) -> Vec<NaiveTime> {
    times.sort();
    times.dedup();
    times
}

fn deserialize_times<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NaiveTime>, D::Error> {
    Ok(normalize_times(Vec::deserialize(d)?))
}

fn at_time(dt: DateTime<Utc>, t: NaiveTime) -> DateTime<Utc> {
    dt.date_naive().and_time(t).and_utc()
}

// ============================================================================
// Sub-day intervals
// ============================================================================

/// Every N seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondInterval {
    pub every: u32,
}

impl SecondInterval {
    pub fn new(every: u32) -> Self {
        Self { every: every.max(1) }
    }

    pub fn next_occurrence(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        current + Duration::seconds(self.every as i64)
    }
}

/// Every N minutes, optionally anchored to a second of the minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteInterval {
    pub every: u32,
    pub on_second: Option<u32>,
}

impl MinuteInterval {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            on_second: None,
        }
    }

    pub fn with_on_second(mut self, second: u32) -> Self {
        self.on_second = Some(second.min(59));
        self
    }

    pub fn next_occurrence(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        let next = current + Duration::minutes(self.every as i64);
        match self.on_second {
            Some(s) => snap_to_second(next, s),
            None => next,
        }
    }
}

/// Every N hours, optionally anchored to a minute (and second) of the hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourInterval {
    pub every: u32,
    pub on_minute: Option<u32>,
    pub on_second: Option<u32>,
}

impl HourInterval {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            on_minute: None,
            on_second: None,
        }
    }

    pub fn with_on_minute(mut self, minute: u32) -> Self {
        self.on_minute = Some(minute.min(59));
        self
    }

    pub fn with_on_second(mut self, second: u32) -> Self {
        self.on_second = Some(second.min(59));
        self
    }

    pub fn next_occurrence(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        let next = current + Duration::hours(self.every as i64);
        match (self.on_minute, self.on_second) {
            (Some(m), s) => snap_to_minute(next, m, s.unwrap_or(0)),
            (None, Some(s)) => snap_to_second(next, s),
            (None, None) => next,
        }
    }
}

/// Snap up to the next instant whose second-of-minute is `s`, at or after `dt`.
fn snap_to_second(dt: DateTime<Utc>, s: u32) -> DateTime<Utc> {
    let base = dt.with_nanosecond(0).unwrap_or(dt);
    let candidate = base.with_second(s).unwrap_or(base);
    if candidate < dt {
        candidate + Duration::minutes(1)
    } else {
        candidate
    }
}

/// Snap up to the next instant at minute `m`, second `s`, at or after `dt`.
fn snap_to_minute(dt: DateTime<Utc>, m: u32, s: u32) -> DateTime<Utc> {
    let base = dt.with_nanosecond(0).unwrap_or(dt);
    let candidate = base
        .with_minute(m)
        .and_then(|d| d.with_second(s))
        .unwrap_or(base);
    if candidate < dt {
        candidate + Duration::hours(1)
    } else {
        candidate
    }
}

// ============================================================================
// Day interval
// ============================================================================

/// Every N days, optionally at fixed times of day and/or restricted to
/// certain weekdays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayInterval {
    pub every: u32,
    #[serde(deserialize_with = "deserialize_times", default)]
    on_times: Vec<NaiveTime>,
    #[serde(default)]
    on_days: Vec<Weekday>,
}

impl DayInterval {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            on_times: Vec::new(),
            on_days: Vec::new(),
        }
    }

    pub fn with_on_times(mut self, times: Vec<NaiveTime>) -> Self {
        self.on_times = normalize_times(times);
        self
    }

    pub fn with_on_days(mut self, days: Vec<Weekday>) -> Self {
        self.on_days = days;
        self
    }

    pub fn on_times(&self) -> &[NaiveTime] {
        &self.on_times
    }

    pub fn on_days(&self) -> &[Weekday] {
        &self.on_days
    }

    pub fn next_occurrence(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        let mut candidate = if self.on_times.is_empty() {
            current + Days::new(self.every as u64)
        } else if let Some(t) = self.on_times.iter().find(|t| **t > current.time()) {
            // A configured time later today still lies ahead.
            at_time(current, *t)
        } else {
            at_time(current + Days::new(self.every as u64), self.on_times[0])
        };

        if !self.on_days.is_empty() && !self.on_days.contains(&candidate.weekday()) {
            for _ in 0..7 {
                candidate = candidate + Days::new(1);
                if self.on_days.contains(&candidate.weekday()) {
                    break;
                }
            }
            if let Some(t) = self.on_times.first() {
                candidate = at_time(candidate, *t);
            }
        }
        candidate
    }
}

// ============================================================================
// Week interval
// ============================================================================

/// Every N weeks on the given weekdays at the given times.
///
/// N-week periods are anchored on ISO weeks (Monday start). Without
/// `on_times` the time-of-day defaults to midnight; without `on_days` the
/// current weekday is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekInterval {
    pub every: u32,
    #[serde(default)]
    on_days: Vec<Weekday>,
    #[serde(deserialize_with = "deserialize_times", default)]
    on_times: Vec<NaiveTime>,
}

impl WeekInterval {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            on_days: Vec::new(),
            on_times: Vec::new(),
        }
    }

    pub fn with_on_days(mut self, days: Vec<Weekday>) -> Self {
        self.on_days = days;
        self
    }

    pub fn with_on_times(mut self, times: Vec<NaiveTime>) -> Self {
        self.on_times = normalize_times(times);
        self
    }

    pub fn on_times(&self) -> &[NaiveTime] {
        &self.on_times
    }

    pub fn on_days(&self) -> &[Weekday] {
        &self.on_days
    }

    pub fn next_occurrence(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = NaiveTime::MIN;
        let times: &[NaiveTime] = if self.on_times.is_empty() {
            std::slice::from_ref(&midnight)
        } else {
            &self.on_times
        };
        let current_day = current.weekday();
        let permitted = |d: Weekday| {
            if self.on_days.is_empty() {
                d == current_day
            } else {
                self.on_days.contains(&d)
            }
        };

        // A configured time later today.
        if permitted(current_day) {
            if let Some(t) = times.iter().find(|t| **t > current.time()) {
                return at_time(current, *t);
            }
        }

        // Remaining permitted days within the current ISO week.
        let mut date = current.date_naive() + Days::new(1);
        while date.weekday() != Weekday::Mon {
            if permitted(date.weekday()) {
                return date.and_time(times[0]).and_utc();
            }
            date = date + Days::new(1);
        }

        // First permitted day of the next N-week period.
        let week_start = current.date_naive().week(Weekday::Mon).first_day();
        let mut date = week_start + Days::new(7 * self.every as u64);
        for _ in 0..7 {
            if permitted(date.weekday()) {
                return date.and_time(times[0]).and_utc();
            }
            date = date + Days::new(1);
        }
        // Unreachable: every weekday occurs within the scanned week.
        current + Duration::weeks(self.every as i64)
    }
}

// ============================================================================
// Month interval
// ============================================================================

/// Every N months, anchored to a day-of-month, a day set, or the first
/// occurrence of a weekday; optionally restricted to certain months and
/// fixed times of day.
///
/// Day-of-month anchors clamp to the target month's length (day 31 in
/// February becomes the 28th or 29th).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthInterval {
    pub every: u32,
    pub on_day: Option<u32>,
    #[serde(default)]
    on_days: Vec<u32>,
    pub on_first: Option<Weekday>,
    #[serde(default)]
    on_months: Vec<u32>,
    #[serde(deserialize_with = "deserialize_times", default)]
    on_times: Vec<NaiveTime>,
}

impl MonthInterval {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            on_day: None,
            on_days: Vec::new(),
            on_first: None,
            on_months: Vec::new(),
            on_times: Vec::new(),
        }
    }

    pub fn with_on_day(mut self, day: u32) -> Self {
        self.on_day = Some(day.clamp(1, 31));
        self
    }

    pub fn with_on_days(mut self, mut days: Vec<u32>) -> Self {
        days.sort_unstable();
        days.dedup();
        days.retain(|d| (1..=31).contains(d));
        self.on_days = days;
        self
    }

    pub fn with_on_first(mut self, weekday: Weekday) -> Self {
        self.on_first = Some(weekday);
        self
    }

    pub fn with_on_months(mut self, mut months: Vec<u32>) -> Self {
        months.sort_unstable();
        months.dedup();
        months.retain(|m| (1..=12).contains(m));
        self.on_months = months;
        self
    }

    pub fn with_on_times(mut self, times: Vec<NaiveTime>) -> Self {
        self.on_times = normalize_times(times);
        self
    }

    pub fn on_days(&self) -> &[u32] {
        &self.on_days
    }

    pub fn on_months(&self) -> &[u32] {
        &self.on_months
    }

    pub fn on_times(&self) -> &[NaiveTime] {
        &self.on_times
    }

    pub fn next_occurrence(&self, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut anchor = current.checked_add_months(Months::new(self.every))?;

        // Month stepping is bounded: a non-empty month filter matches within
        // 12 steps, day filters within one extra step each.
        for _ in 0..=48 {
            if !self.on_months.is_empty() && !self.on_months.contains(&anchor.month()) {
                anchor = first_of_next_month(anchor)?;
                continue;
            }

            let date = if let Some(wd) = self.on_first {
                first_weekday_of_month(anchor.year(), anchor.month(), wd)?
            } else if !self.on_days.is_empty() {
                let last = days_in_month(anchor.year(), anchor.month());
                match self
                    .on_days
                    .iter()
                    .find(|d| **d >= anchor.day() && **d <= last)
                {
                    Some(d) => NaiveDate::from_ymd_opt(anchor.year(), anchor.month(), *d)?,
                    None => {
                        anchor = first_of_next_month(anchor)?;
                        continue;
                    }
                }
            } else if let Some(d) = self.on_day {
                let last = days_in_month(anchor.year(), anchor.month());
                NaiveDate::from_ymd_opt(anchor.year(), anchor.month(), d.min(last))?
            } else {
                anchor.date_naive()
            };

            let time = if self.on_times.is_empty() {
                current.time()
            } else if date == current.date_naive() {
                *self
                    .on_times
                    .iter()
                    .find(|t| **t > current.time())
                    .unwrap_or(&self.on_times[0])
            } else {
                self.on_times[0]
            };

            let result = date.and_time(time).and_utc();
            if result > current {
                return Some(result);
            }
            anchor = first_of_next_month(anchor)?;
        }
        None
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_y, next_m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_y, next_m, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn first_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let mut date = NaiveDate::from_ymd_opt(year, month, 1)?;
    while date.weekday() != weekday {
        date = date.succ_opt()?;
    }
    Some(date)
}

fn first_of_next_month(dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let first = dt.date_naive().with_day(1)?;
    let next = first.checked_add_months(Months::new(1))?;
    Some(next.and_time(dt.time()).and_utc())
}
