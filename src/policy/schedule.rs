//! Time-window gates on rules.
//!
//! A schedule is a pair of independent filters: day-of-week and hour-of-day.
//! An empty filter matches everything. Both are evaluated after converting
//! the evaluation timestamp into the schedule's timezone (UTC if unset).

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// Day and hour window in which a rule is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Active weekdays. Empty means every day.
    pub days: Vec<Weekday>,

    /// Active hours (0-23). Empty means every hour.
    pub hours: Vec<u32>,

    /// Timezone the window is expressed in
    pub timezone: Option<Tz>,
}

impl Schedule {
    pub fn new(days: Vec<Weekday>, hours: Vec<u32>, timezone: Option<Tz>) -> Self {
        Self {
            days,
            hours,
            timezone,
        }
    }

    /// Returns `true` if the window contains `at`.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        match self.timezone {
            Some(tz) => self.contains_local(&at.with_timezone(&tz)),
            None => self.contains_local(&at),
        }
    }

    /// One-line description of the window relative to `at`, for traces.
    pub fn describe(&self, at: DateTime<Utc>) -> String {
        let local = match self.timezone {
            Some(tz) => at.with_timezone(&tz).format("%a %H:%M").to_string(),
            None => at.format("%a %H:%M").to_string(),
        };
        let state = if self.is_active(at) {
            "active"
        } else {
            "inactive"
        };
        format!("{state} at {local} {} ({})", self.zone_name(), self.window())
    }

    fn contains_local<T: TimeZone>(&self, local: &DateTime<T>) -> bool {
        let day_ok = self.days.is_empty() || self.days.contains(&local.weekday());
        let hour_ok = self.hours.is_empty() || self.hours.contains(&local.hour());
        day_ok && hour_ok
    }

    fn zone_name(&self) -> String {
        self.timezone
            .map(|tz| tz.name().to_string())
            .unwrap_or_else(|| "UTC".to_string())
    }

    fn window(&self) -> String {
        let days = if self.days.is_empty() {
            "any day".to_string()
        } else {
            let names: Vec<String> = self.days.iter().map(|d| d.to_string()).collect();
            format!("days {}", names.join(","))
        };
        let hours = if self.hours.is_empty() {
            "any hour".to_string()
        } else {
            let names: Vec<String> = self.hours.iter().map(|h| h.to_string()).collect();
            format!("hours {}", names.join(","))
        };
        format!("{days}; {hours}")
    }
}
