//! Date range arithmetic for the event cache.
//!
//! The cache reasons about inclusive calendar-date ranges: which window is
//! synchronized, whether a request falls inside it, and how an out-of-window
//! request splits into the parts that must be fetched fresh versus read from
//! storage.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Weeks of history covered by a full refresh.
pub const REFRESH_LOOKBEHIND_WEEKS: u64 = 4;

/// Weeks of future covered by a full refresh.
pub const REFRESH_LOOKAHEAD_WEEKS: u64 = 8;

/// An inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First date, inclusive.
    pub start: NaiveDate,
    /// Last date, inclusive.
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a new range.
    ///
    /// # Panics
    ///
    /// Panics if `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        assert!(start <= end, "date range start must not be after end");
        Self { start, end }
    }

    /// A range covering a single date.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Returns true if `date` falls inside the range.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Returns true if `other` is entirely inside this range.
    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Number of days covered, inclusive of both endpoints.
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// How a requested range relates to the synchronized window.
///
/// At most three pieces: dates strictly before the window, the part covered
/// by the window, and dates strictly after it. `before` and `after` must be
/// fetched from upstream; `overlap` can be served from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSplit {
    /// Requested dates before the window, if any.
    pub before: Option<DateRange>,
    /// Requested dates inside the window, if any.
    pub overlap: Option<DateRange>,
    /// Requested dates after the window, if any.
    pub after: Option<DateRange>,
}

impl RangeSplit {
    /// Splits `requested` around `window`.
    pub fn around(requested: DateRange, window: DateRange) -> Self {
        let before = if requested.start < window.start {
            let end = requested.end.min(window.start - Days::new(1));
            Some(DateRange::new(requested.start, end))
        } else {
            None
        };

        let overlap_start = requested.start.max(window.start);
        let overlap_end = requested.end.min(window.end);
        let overlap = if overlap_start <= overlap_end {
            Some(DateRange::new(overlap_start, overlap_end))
        } else {
            None
        };

        let after = if requested.end > window.end {
            let start = requested.start.max(window.end + Days::new(1));
            Some(DateRange::new(start, requested.end))
        } else {
            None
        };

        Self {
            before,
            overlap,
            after,
        }
    }

    /// True if the request was entirely inside the window.
    pub fn is_full_hit(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }
}

/// The window a full refresh targets: four weeks back, eight weeks ahead.
pub fn refresh_window(today: NaiveDate) -> DateRange {
    DateRange::new(
        today - Days::new(REFRESH_LOOKBEHIND_WEEKS * 7),
        today + Days::new(REFRESH_LOOKAHEAD_WEEKS * 7),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn r(start: &str, end: &str) -> DateRange {
        DateRange::new(d(start), d(end))
    }

    #[test]
    fn range_contains() {
        let range = r("2024-03-01", "2024-05-01");
        assert!(range.contains_date(d("2024-03-01")));
        assert!(range.contains_date(d("2024-05-01")));
        assert!(!range.contains_date(d("2024-02-29")));
        assert!(range.contains_range(&r("2024-03-10", "2024-04-10")));
        assert!(!range.contains_range(&r("2024-02-20", "2024-03-10")));
    }

    #[test]
    fn range_num_days() {
        assert_eq!(DateRange::single(d("2024-03-01")).num_days(), 1);
        assert_eq!(r("2024-03-01", "2024-03-07").num_days(), 7);
    }

    #[test]
    #[should_panic]
    fn inverted_range_panics() {
        DateRange::new(d("2024-03-02"), d("2024-03-01"));
    }

    #[test]
    fn split_full_hit() {
        let split = RangeSplit::around(r("2024-03-10", "2024-04-10"), r("2024-03-01", "2024-05-01"));
        assert!(split.is_full_hit());
        assert_eq!(split.overlap, Some(r("2024-03-10", "2024-04-10")));
    }

    #[test]
    fn split_extends_before() {
        // Window [2024-03-01, 2024-05-01], request [2024-02-20, 2024-03-10]:
        // fetch [2024-02-20, 2024-02-29] fresh, read [2024-03-01, 2024-03-10].
        let split = RangeSplit::around(r("2024-02-20", "2024-03-10"), r("2024-03-01", "2024-05-01"));
        assert_eq!(split.before, Some(r("2024-02-20", "2024-02-29")));
        assert_eq!(split.overlap, Some(r("2024-03-01", "2024-03-10")));
        assert_eq!(split.after, None);
    }

    #[test]
    fn split_extends_after() {
        let split = RangeSplit::around(r("2024-04-20", "2024-05-10"), r("2024-03-01", "2024-05-01"));
        assert_eq!(split.before, None);
        assert_eq!(split.overlap, Some(r("2024-04-20", "2024-05-01")));
        assert_eq!(split.after, Some(r("2024-05-02", "2024-05-10")));
    }

    #[test]
    fn split_extends_both_sides() {
        let split = RangeSplit::around(r("2024-02-01", "2024-06-01"), r("2024-03-01", "2024-05-01"));
        assert_eq!(split.before, Some(r("2024-02-01", "2024-02-29")));
        assert_eq!(split.overlap, Some(r("2024-03-01", "2024-05-01")));
        assert_eq!(split.after, Some(r("2024-05-02", "2024-06-01")));
    }

    #[test]
    fn split_entirely_before_window() {
        let split = RangeSplit::around(r("2024-01-01", "2024-01-31"), r("2024-03-01", "2024-05-01"));
        assert_eq!(split.before, Some(r("2024-01-01", "2024-01-31")));
        assert_eq!(split.overlap, None);
        assert_eq!(split.after, None);
    }

    #[test]
    fn split_entirely_after_window() {
        let split = RangeSplit::around(r("2024-06-01", "2024-06-30"), r("2024-03-01", "2024-05-01"));
        assert_eq!(split.before, None);
        assert_eq!(split.overlap, None);
        assert_eq!(split.after, Some(r("2024-06-01", "2024-06-30")));
    }

    #[test]
    fn refresh_window_spans_twelve_weeks() {
        let window = refresh_window(d("2024-03-15"));
        assert_eq!(window.start, d("2024-02-16"));
        assert_eq!(window.end, d("2024-05-10"));
        assert_eq!(window.num_days(), 12 * 7 + 1);
    }
}
