//! Raw occurrence type produced by the upstream client.
//!
//! A [`RawOccurrence`] is one concrete calendar occurrence after the server
//! has expanded recurrence. Times are naive wall-clock values: whatever
//! timezone the upstream data carried is discarded at parse time, on
//! purpose — the application renders wall-clock times only, and documents
//! this as a known limitation.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// The start or end value of an occurrence.
///
/// iCalendar allows both date-only values (all-day events) and datetimes.
/// The distinction matters: a midnight datetime is not an all-day event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum OccurrenceTime {
    /// A wall-clock datetime.
    DateTime(NaiveDateTime),
    /// A date-only value (all-day).
    Date(NaiveDate),
}

impl OccurrenceTime {
    /// Returns true iff this is a date-only value.
    pub fn is_date_only(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// Collapses to a wall-clock datetime; date-only values become midnight.
    pub fn as_datetime(&self) -> NaiveDateTime {
        match self {
            Self::DateTime(dt) => *dt,
            Self::Date(d) => d.and_hms_opt(0, 0, 0).expect("midnight is valid"),
        }
    }
}

/// One expanded occurrence as parsed from the upstream wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOccurrence {
    /// UID from the upstream data. Stable within one sync cycle only.
    pub uid: String,

    /// Start of the occurrence.
    pub start: OccurrenceTime,

    /// End of the occurrence, if present upstream.
    pub end: Option<OccurrenceTime>,

    /// Event summary (title). Absent summaries are treated as empty titles.
    pub summary: Option<String>,

    /// iCalendar STATUS, when present (e.g. "Cancelled").
    pub status: Option<String>,

    /// Name of the calendar this occurrence came from.
    pub calendar_name: String,
}

impl RawOccurrence {
    /// Creates a new occurrence with the required fields.
    pub fn new(
        uid: impl Into<String>,
        start: OccurrenceTime,
        calendar_name: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            start,
            end: None,
            summary: None,
            status: None,
            calendar_name: calendar_name.into(),
        }
    }

    /// Builder: sets the end time.
    pub fn with_end(mut self, end: OccurrenceTime) -> Self {
        self.end = Some(end);
        self
    }

    /// Builder: sets the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Builder: sets the status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// The title, empty when the upstream data has no summary.
    pub fn title(&self) -> &str {
        self.summary.as_deref().unwrap_or("")
    }

    /// True iff DTSTART was date-only. A `00:00:00` datetime is not all-day.
    pub fn is_all_day(&self) -> bool {
        self.start.is_date_only()
    }

    /// The calendar date this occurrence is filed under.
    pub fn date(&self) -> NaiveDate {
        self.start.as_datetime().date()
    }

    /// True if the upstream STATUS marks this occurrence cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    }
}
