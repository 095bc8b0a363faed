//! Billing period value object.
//!
//! Periods are calendar months: the 1st through the last day of the
//! month containing the anchor instant, not a rolling 30-day window.
//! Read and write paths derive the period with the same function, which
//! pins the quota reset cadence precisely.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::Timestamp;

/// A contiguous, non-overlapping billing window.
///
/// Half-open: `start` is the first instant of the month, `end` the first
/// instant of the following month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    start: Timestamp,
    end: Timestamp,
}

impl BillingPeriod {
    /// Returns the calendar-month period containing the given instant.
    pub fn month_containing(at: Timestamp) -> Self {
        let date = at.as_datetime().date_naive();
        Self {
            start: month_start(date.year(), date.month()),
            end: next_month_start(date.year(), date.month()),
        }
    }

    /// Reconstructs a period from stored bounds.
    pub fn from_bounds(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// First instant of the period (inclusive).
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// First instant of the following period (exclusive).
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// The period immediately following this one.
    pub fn next(&self) -> Self {
        Self::month_containing(self.end)
    }

    /// Checks whether an instant falls inside this period.
    pub fn contains(&self, at: Timestamp) -> bool {
        !at.is_before(&self.start) && at.is_before(&self.end)
    }

    /// Human-readable period label, e.g. "2026-08".
    pub fn label(&self) -> String {
        self.start.as_datetime().format("%Y-%m").to_string()
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn month_start(year: i32, month: u32) -> Timestamp {
    // Day 1 at midnight always exists for a valid (year, month).
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    Timestamp::from_datetime(date.and_hms_opt(0, 0, 0).unwrap().and_utc())
}

fn next_month_start(year: i32, month: u32) -> Timestamp {
    if month == 12 {
        month_start(year + 1, 1)
    } else {
        month_start(year, month + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(y: i32, m: u32, d: u32, h: u32) -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
    }

    #[test]
    fn period_spans_first_to_first_of_next_month() {
        let period = BillingPeriod::month_containing(ts(2026, 8, 15, 12));
        assert_eq!(period.start(), ts(2026, 8, 1, 0));
        assert_eq!(period.end(), ts(2026, 9, 1, 0));
    }

    #[test]
    fn first_instant_of_month_belongs_to_that_month() {
        let period = BillingPeriod::month_containing(ts(2026, 8, 1, 0));
        assert_eq!(period.start(), ts(2026, 8, 1, 0));
        assert!(period.contains(ts(2026, 8, 1, 0)));
    }

    #[test]
    fn last_day_of_month_belongs_to_that_month() {
        let period = BillingPeriod::month_containing(ts(2026, 8, 15, 0));
        assert!(period.contains(ts(2026, 8, 31, 23)));
        assert!(!period.contains(ts(2026, 9, 1, 0)));
    }

    #[test]
    fn december_rolls_over_to_next_year() {
        let period = BillingPeriod::month_containing(ts(2026, 12, 31, 23));
        assert_eq!(period.start(), ts(2026, 12, 1, 0));
        assert_eq!(period.end(), ts(2027, 1, 1, 0));
    }

    #[test]
    fn february_covers_leap_day() {
        let period = BillingPeriod::month_containing(ts(2028, 2, 10, 0));
        assert!(period.contains(ts(2028, 2, 29, 12)));
        assert_eq!(period.end(), ts(2028, 3, 1, 0));
    }

    #[test]
    fn next_period_is_contiguous_and_non_overlapping() {
        let period = BillingPeriod::month_containing(ts(2026, 8, 15, 0));
        let next = period.next();

        assert_eq!(next.start(), period.end());
        assert!(!period.contains(next.start()));
        assert!(next.contains(next.start()));
    }

    #[test]
    fn periods_derived_from_any_instant_in_month_are_equal() {
        let a = BillingPeriod::month_containing(ts(2026, 8, 1, 0));
        let b = BillingPeriod::month_containing(ts(2026, 8, 31, 23));
        assert_eq!(a, b);
    }

    #[test]
    fn label_formats_year_and_month() {
        let period = BillingPeriod::month_containing(ts(2026, 8, 15, 0));
        assert_eq!(period.label(), "2026-08");
    }
}
