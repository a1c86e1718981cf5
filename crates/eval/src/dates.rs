//! Calendar helpers for the date operators.
//!
//! Dates travel as ISO `YYYY-MM-DD` text. RFC 3339 date-times are also
//! accepted on input; only their calendar date (in their own offset) is
//! used.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};

/// Wall clock captured once per evaluation pass, so every `today` / `now`
/// in one pass agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    now: OffsetDateTime,
}

impl Clock {
    pub fn system(offset_minutes: Option<i32>) -> Clock {
        let now = OffsetDateTime::now_utc();
        let offset = offset_minutes
            .and_then(|m| UtcOffset::from_whole_seconds(m.saturating_mul(60)).ok())
            .unwrap_or(UtcOffset::UTC);
        Clock {
            now: now.to_offset(offset),
        }
    }

    pub fn fixed(now: OffsetDateTime) -> Clock {
        Clock { now }
    }

    pub fn today(&self) -> String {
        format_date(self.now.date())
    }

    pub fn now(&self) -> String {
        self.now
            .format(&Rfc3339)
            .unwrap_or_else(|_| format_date(self.now.date()))
    }
}

pub fn parse_date(text: &str) -> Option<Date> {
    let t = text.trim();
    let ymd = format_description!("[year]-[month]-[day]");
    if let Ok(d) = Date::parse(t, &ymd) {
        return Some(d);
    }
    OffsetDateTime::parse(t, &Rfc3339).ok().map(|dt| dt.date())
}

pub fn format_date(d: Date) -> String {
    let ymd = format_description!("[year]-[month]-[day]");
    d.format(&ymd)
        .unwrap_or_else(|_| format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day()))
}

pub fn from_parts(year: i64, month: i64, day: i64) -> Option<Date> {
    let year = i32::try_from(year).ok()?;
    let month = Month::try_from(u8::try_from(month).ok()?).ok()?;
    let day = u8::try_from(day).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

pub fn days_between(start: Date, end: Date) -> i64 {
    (end - start).whole_days()
}

pub fn add_days(d: Date, days: i64) -> Option<Date> {
    // well beyond the representable year range
    if days.unsigned_abs() > 10_000_000 {
        return None;
    }
    d.checked_add(Duration::days(days))
}

/// Month arithmetic clamps the day to the target month's length.
pub fn add_months(d: Date, months: i64) -> Option<Date> {
    let zero_based = (i64::from(d.year()) * 12 + i64::from(d.month() as u8) - 1).checked_add(months)?;
    let year = i32::try_from(zero_based.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(zero_based.rem_euclid(12) + 1).ok()?).ok()?;
    let last = time::util::days_in_year_month(year, month);
    Date::from_calendar_date(year, month, d.day().min(last)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_plain_and_rfc3339() {
        assert_eq!(parse_date("2024-02-29"), from_parts(2024, 2, 29));
        assert_eq!(parse_date("2024-03-01T10:00:00Z"), from_parts(2024, 3, 1));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn month_addition_clamps_day() {
        let jan31 = from_parts(2023, 1, 31).unwrap();
        assert_eq!(add_months(jan31, 1), from_parts(2023, 2, 28));
        assert_eq!(add_months(jan31, -2), from_parts(2022, 11, 30));
        assert_eq!(add_months(jan31, 12), from_parts(2024, 1, 31));
    }

    #[test]
    fn day_difference() {
        let a = from_parts(2024, 1, 1).unwrap();
        let b = from_parts(2024, 3, 1).unwrap();
        assert_eq!(days_between(a, b), 60);
        assert_eq!(days_between(b, a), -60);
    }

    #[test]
    fn fixed_clock_formats() {
        let clock = Clock::fixed(datetime!(2024-05-06 07:08:09 UTC));
        assert_eq!(clock.today(), "2024-05-06");
        assert_eq!(clock.now(), "2024-05-06T07:08:09Z");
    }

    #[test]
    fn invalid_parts_are_none() {
        assert_eq!(from_parts(2023, 2, 29), None);
        assert_eq!(from_parts(2023, 13, 1), None);
    }
}
