//! Cached calendar event and cache metadata types.
//!
//! These are the rows the sync subsystem persists: one [`CachedEvent`] per
//! expanded calendar occurrence, filed under its calendar date, and a
//! singleton [`CacheMetadata`] record describing the contiguous date window
//! the store is known to fully cover.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::DateRange;

/// One normalized calendar occurrence, as stored in the event cache.
///
/// All timestamps are naive wall-clock values: any timezone information the
/// upstream calendar carried has already been discarded by the provider
/// layer. This is a deliberate, documented simplification — the household
/// view always renders local wall-clock times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEvent {
    /// Name of the upstream calendar this occurrence came from.
    pub calendar_name: String,

    /// The date bucket the occurrence is filed under. Always equals
    /// `start.date()`.
    pub date: NaiveDate,

    /// Event title. May be empty.
    pub title: String,

    /// Start of the occurrence (wall clock).
    pub start: NaiveDateTime,

    /// End of the occurrence, when the upstream data carried one.
    pub end: Option<NaiveDateTime>,

    /// True iff the upstream start value was date-only.
    pub all_day: bool,

    /// When this row was created locally.
    pub created_at: NaiveDateTime,
}

impl CachedEvent {
    /// Creates a new cached event. The date bucket is derived from `start`.
    pub fn new(
        calendar_name: impl Into<String>,
        title: impl Into<String>,
        start: NaiveDateTime,
        end: Option<NaiveDateTime>,
        all_day: bool,
    ) -> Self {
        Self {
            calendar_name: calendar_name.into(),
            date: start.date(),
            title: title.into(),
            start,
            end,
            all_day,
            created_at: Utc::now().naive_utc(),
        }
    }
}

/// Sorts events by start timestamp, in place.
pub fn sort_by_start(events: &mut [CachedEvent]) {
    events.sort_by(|a, b| a.start.cmp(&b.start));
}

/// Singleton record describing the currently-synchronized window.
///
/// Absence of this record means "never synchronized". When present, every
/// date in `[cache_start, cache_end]` is assumed fully represented by
/// [`CachedEvent`] rows: no rows for a date inside the window means "no
/// events that day", not "not yet synced".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the last full refresh completed.
    pub last_refresh: NaiveDateTime,

    /// First date of the synchronized window (inclusive).
    pub cache_start: NaiveDate,

    /// Last date of the synchronized window (inclusive).
    pub cache_end: NaiveDate,
}

impl CacheMetadata {
    /// Returns the synchronized window as a [`DateRange`].
    pub fn window(&self) -> DateRange {
        DateRange::new(self.cache_start, self.cache_end)
    }
}
