//! Look-back windows from caller-supplied day and hour counts.
//!
//! Counts come straight from the command line, so the arithmetic saturates
//! instead of panicking. Negative counts mean an empty window and nothing is
//! ever placed before the Unix epoch.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// `date` minus `days`, no earlier than 1970-01-01.
pub fn days_before(date: NaiveDate, days: i64) -> NaiveDate {
    let floor = epoch().date_naive();
    TimeDelta::try_days(days.max(0))
        .and_then(|delta| date.checked_sub_signed(delta))
        .map_or(floor, |from| from.max(floor))
}

/// `at` minus `hours`, no earlier than the Unix epoch.
pub fn hours_before(at: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    TimeDelta::try_hours(hours.max(0))
        .and_then(|delta| at.checked_sub_signed(delta))
        .map_or(epoch(), |from| from.max(epoch()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn days_before_subtracts_ordinary_windows() {
        assert_eq!(days_before(date(2026, 3, 10), 7), date(2026, 3, 3));
        assert_eq!(days_before(date(2026, 3, 10), 0), date(2026, 3, 10));
        assert_eq!(days_before(date(2026, 3, 10), -5), date(2026, 3, 10));
    }

    #[test]
    fn days_before_saturates_at_epoch() {
        let floor = date(1970, 1, 1);
        assert_eq!(days_before(date(2026, 3, 10), 200_000_000), floor);
        assert_eq!(days_before(date(2026, 3, 10), 90_000_000), floor);
        assert_eq!(days_before(date(2026, 3, 10), i64::MAX), floor);
    }

    #[test]
    fn hours_before_saturates_at_epoch() {
        let now = Utc::now();
        assert_eq!(hours_before(now, 48), now - TimeDelta::hours(48));
        assert_eq!(hours_before(now, -1), now);
        assert_eq!(hours_before(now, i64::MAX), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(hours_before(now, 5_000_000_000_000), DateTime::<Utc>::UNIX_EPOCH);
    }
}
