//! ICS/iCalendar parsing into [`RawOccurrence`].
//!
//! Converts iCalendar (RFC 5545) payloads to occurrences with naive
//! wall-clock times. Timezone offsets are discarded here by design: only
//! the wall-clock value survives. Non-VEVENT components are ignored, and a
//! component that fails to parse is skipped without aborting the rest of
//! the payload.

use icalendar::{Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, Event};
use tracing::{debug, warn};

use crate::occurrence::{OccurrenceTime, RawOccurrence};

/// Parses ICS content into occurrences for the named calendar.
///
/// Recurring events are expected to be pre-expanded by the server (the
/// REPORT time-range query requests expansion); this layer never expands
/// recurrence itself.
pub fn parse_ics_content(ics: &str, calendar_name: &str) -> Vec<RawOccurrence> {
    let calendar = match ics.parse::<Calendar>() {
        Ok(cal) => cal,
        Err(e) => {
            warn!(error = %e, calendar = %calendar_name, "failed to parse ICS content, skipping");
            return Vec::new();
        }
    };

    calendar
        .iter()
        .filter_map(|component| match component {
            CalendarComponent::Event(event) => parse_event(event, calendar_name),
            _ => None,
        })
        .collect()
}

/// Parses a single VEVENT. Returns `None` for entries missing a start.
fn parse_event(event: &Event, calendar_name: &str) -> Option<RawOccurrence> {
    let uid = event.get_uid()?;
    let start = to_occurrence_time(event.get_start()?);

    let mut occurrence = RawOccurrence::new(uid, start, calendar_name);

    if let Some(end) = event.get_end() {
        occurrence = occurrence.with_end(to_occurrence_time(end));
    }
    if let Some(summary) = event.get_summary() {
        occurrence = occurrence.with_summary(summary);
    }
    if let Some(status) = event.get_status() {
        occurrence = occurrence.with_status(format!("{:?}", status));
    }

    debug!(
        uid = %occurrence.uid,
        summary = ?occurrence.summary,
        all_day = occurrence.is_all_day(),
        "parsed occurrence"
    );

    Some(occurrence)
}

/// Converts an iCalendar date-or-datetime to a naive occurrence time.
///
/// All three datetime flavors collapse to their wall-clock value; only a
/// true date-only DTSTART keeps the all-day distinction.
fn to_occurrence_time(dt: DatePerhapsTime) -> OccurrenceTime {
    match dt {
        DatePerhapsTime::Date(date) => OccurrenceTime::Date(date),
        DatePerhapsTime::DateTime(cdt) => {
            let naive = match cdt {
                CalendarDateTime::Utc(dt) => dt.naive_utc(),
                CalendarDateTime::Floating(naive) => naive,
                CalendarDateTime::WithTimezone { date_time, tzid: _ } => date_time,
            };
            OccurrenceTime::DateTime(naive)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn timed_ics() -> &'static str {
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Test//Test//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:dinner-1@example.com\r\n\
         DTSTART:20240215T180000Z\r\n\
         DTEND:20240215T193000Z\r\n\
         SUMMARY:Dinner with grandparents\r\n\
         STATUS:CONFIRMED\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR"
    }

    fn all_day_ics() -> &'static str {
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         BEGIN:VEVENT\r\n\
         UID:holiday-1@example.com\r\n\
         DTSTART;VALUE=DATE:20240215\r\n\
         DTEND;VALUE=DATE:20240216\r\n\
         SUMMARY:School holiday\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR"
    }

    #[test]
    fn parse_timed_event() {
        let occurrences = parse_ics_content(timed_ics(), "Family");

        assert_eq!(occurrences.len(), 1);
        let occ = &occurrences[0];
        assert_eq!(occ.uid, "dinner-1@example.com");
        assert_eq!(occ.title(), "Dinner with grandparents");
        assert_eq!(occ.calendar_name, "Family");
        assert!(!occ.is_all_day());
        assert_eq!(
            occ.start.as_datetime(),
            "2024-02-15T18:00:00".parse::<NaiveDateTime>().unwrap()
        );
    }

    #[test]
    fn parse_all_day_event() {
        let occurrences = parse_ics_content(all_day_ics(), "Family");

        assert_eq!(occurrences.len(), 1);
        let occ = &occurrences[0];
        assert!(occ.is_all_day());
        assert_eq!(occ.date(), "2024-02-15".parse::<NaiveDate>().unwrap());
    }

    #[test]
    fn midnight_datetime_is_not_all_day() {
        let ics = "BEGIN:VCALENDAR\r\n\
                   VERSION:2.0\r\n\
                   BEGIN:VEVENT\r\n\
                   UID:midnight@example.com\r\n\
                   DTSTART:20240215T000000Z\r\n\
                   SUMMARY:Midnight snack prep\r\n\
                   END:VEVENT\r\n\
                   END:VCALENDAR";

        let occurrences = parse_ics_content(ics, "Family");
        assert_eq!(occurrences.len(), 1);
        assert!(!occurrences[0].is_all_day());
    }

    #[test]
    fn timezone_offset_is_discarded() {
        // TZID-qualified datetimes keep their wall-clock value.
        let ics = "BEGIN:VCALENDAR\r\n\
                   VERSION:2.0\r\n\
                   BEGIN:VEVENT\r\n\
                   UID:tz@example.com\r\n\
                   DTSTART;TZID=America/New_York:20240215T090000\r\n\
                   SUMMARY:Breakfast\r\n\
                   END:VEVENT\r\n\
                   END:VCALENDAR";

        let occurrences = parse_ics_content(ics, "Family");
        assert_eq!(occurrences.len(), 1);
        assert_eq!(
            occurrences[0].start.as_datetime(),
            "2024-02-15T09:00:00".parse::<NaiveDateTime>().unwrap()
        );
    }

    #[test]
    fn non_event_components_ignored() {
        let ics = "BEGIN:VCALENDAR\r\n\
                   VERSION:2.0\r\n\
                   BEGIN:VTODO\r\n\
                   UID:todo-1@example.com\r\n\
                   SUMMARY:Buy flour\r\n\
                   END:VTODO\r\n\
                   END:VCALENDAR";

        assert!(parse_ics_content(ics, "Family").is_empty());
    }

    #[test]
    fn event_without_dtstart_skipped() {
        let ics = "BEGIN:VCALENDAR\r\n\
                   VERSION:2.0\r\n\
                   BEGIN:VEVENT\r\n\
                   UID:broken@example.com\r\n\
                   SUMMARY:No start\r\n\
                   END:VEVENT\r\n\
                   BEGIN:VEVENT\r\n\
                   UID:ok@example.com\r\n\
                   DTSTART:20240215T120000Z\r\n\
                   SUMMARY:Lunch\r\n\
                   END:VEVENT\r\n\
                   END:VCALENDAR";

        let occurrences = parse_ics_content(ics, "Family");
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].uid, "ok@example.com");
    }

    #[test]
    fn garbage_input_yields_empty() {
        assert!(parse_ics_content("not an ics payload", "Family").is_empty());
    }
}
