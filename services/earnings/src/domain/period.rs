//! Pay-period boundaries.
//!
//! Weekly periods start Monday 04:00 America/New_York. A period is keyed by
//! that Monday's date and its inclusive end date is the following Sunday.
//! Daily periods (short mode) run midnight to midnight local time and have
//! `start_date == end_date`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const PAY_PERIOD_TZ: Tz = chrono_tz::America::New_York;
pub const WEEK_START_HOUR: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayPeriod {
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub starts_at: DateTime<Utc>,
    /// Exclusive.
    pub ends_at: DateTime<Utc>,
}

impl PayPeriod {
    pub fn weekly(start_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date: start_date + Duration::days(6),
            starts_at: local_instant(start_date, WEEK_START_HOUR),
            ends_at: local_instant(start_date + Duration::days(7), WEEK_START_HOUR),
        }
    }

    pub fn daily(date: NaiveDate) -> Self {
        Self {
            start_date: date,
            end_date: date,
            starts_at: local_instant(date, 0),
            ends_at: local_instant(date + Duration::days(1), 0),
        }
    }

    /// The weekly period `at` falls into.
    pub fn weekly_containing(at: DateTime<Utc>) -> Self {
        let local = at.with_timezone(&PAY_PERIOD_TZ);
        let offset = i64::from(local.weekday().num_days_from_monday());
        let monday = local.date_naive() - Duration::days(offset);
        if at < local_instant(monday, WEEK_START_HOUR) {
            Self::weekly(monday - Duration::days(7))
        } else {
            Self::weekly(monday)
        }
    }

    pub fn daily_containing(at: DateTime<Utc>) -> Self {
        Self::daily(at.with_timezone(&PAY_PERIOD_TZ).date_naive())
    }

    /// The most recent period that has fully ended by `now`.
    pub fn last_closed(now: DateTime<Utc>, short: bool) -> Self {
        if short {
            Self::daily(Self::daily_containing(now).start_date - Duration::days(1))
        } else {
            Self::weekly(Self::weekly_containing(now).start_date - Duration::days(7))
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }
}

// `hour` o'clock local time on `date`. Transitions happen at 02:00, so the
// hours used here always exist; the UTC fallback only guards the type.
fn local_instant(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour));
    PAY_PERIOD_TZ
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}
