//! Business-day arithmetic for shipping deadlines. A business day is a weekday; Saturdays and Sundays never count
//! towards a deadline.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

pub fn is_business_day(t: DateTime<Utc>) -> bool {
    !matches!(t.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The instant `days` business days after `start`, at the same time of day. Weekend days are skipped, so a deadline
/// computed on a Friday afternoon lands the following week.
pub fn add_business_days(start: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    let mut t = start;
    let mut remaining = days;
    while remaining > 0 {
        t += Duration::days(1);
        if is_business_day(t) {
            remaining -= 1;
        }
    }
    t
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 15, 30, 0).unwrap()
    }

    #[test]
    fn midweek_stays_in_week() {
        // Monday 2026-08-03 + 3 business days = Thursday
        assert_eq!(add_business_days(at(2026, 8, 3), 3), at(2026, 8, 6));
    }

    #[test]
    fn weekend_is_skipped() {
        // Thursday 2026-08-06 + 3 business days = Tuesday next week
        assert_eq!(add_business_days(at(2026, 8, 6), 3), at(2026, 8, 11));
        // Friday + 1 business day = Monday
        assert_eq!(add_business_days(at(2026, 8, 7), 1), at(2026, 8, 10));
    }

    #[test]
    fn saturday_start_counts_from_monday() {
        // Saturday 2026-08-08 + 2 business days = Tuesday
        assert_eq!(add_business_days(at(2026, 8, 8), 2), at(2026, 8, 11));
    }

    #[test]
    fn zero_days_is_identity() {
        let t = at(2026, 8, 8);
        assert_eq!(add_business_days(t, 0), t);
    }
}
