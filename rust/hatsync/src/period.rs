//! Time windows used to pick samples for map display.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Map filter buttons: today, yesterday, last seven days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    Today,
    Yesterday,
    LastWeek,
}

/// Inclusive `[from, to]` range in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from <= t && t <= self.to
    }
}

impl TimePeriod {
    /// Resolve against `now` in the user's time zone.
    ///
    /// Day boundaries follow the zone of `now`. Yesterday ends one millisecond
    /// before today starts, so a sample at local midnight belongs to today
    /// only.
    pub fn range<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> TimeRange {
        let now_utc = now.with_timezone(&Utc);
        let start_of_today = start_of_day(now);

        match self {
            TimePeriod::Today => TimeRange {
                from: start_of_today,
                to: now_utc,
            },
            TimePeriod::Yesterday => TimeRange {
                from: start_of_today - Duration::hours(24),
                to: start_of_today - Duration::milliseconds(1),
            },
            TimePeriod::LastWeek => TimeRange {
                from: now_utc - Duration::days(7),
                to: now_utc,
            },
        }
    }
}

fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let tz = now.timezone();
    let Some(midnight) = now.date_naive().and_hms_opt(0, 0, 0) else {
        return now.with_timezone(&Utc);
    };
    // A DST jump can skip local midnight; fall back to the UTC reading
    match tz.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&midnight),
    }
}
