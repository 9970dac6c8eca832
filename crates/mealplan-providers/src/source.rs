//! The `CalendarSource` trait - the seam between the cache and upstream.
//!
//! The event cache and the selection cache consume this trait rather than
//! the concrete CalDAV client, so tests can substitute an in-memory source.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::occurrence::RawOccurrence;
use mealplan_core::DateRange;

/// A boxed future, used by the trait to stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A named upstream calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarHandle {
    /// Display name, used for selection matching.
    pub name: String,
    /// Opaque location of the calendar on the upstream server.
    pub href: String,
}

impl CalendarHandle {
    /// Creates a new handle.
    pub fn new(name: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            href: href.into(),
        }
    }
}

/// An upstream calendar service.
///
/// Both operations hit the network and may be slow or fail; callers are
/// expected to degrade gracefully rather than propagate these failures to
/// request paths.
pub trait CalendarSource: Send + Sync {
    /// Enumerates the calendars available upstream.
    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarHandle>>>;

    /// Searches one calendar for occurrences in a date range, with
    /// recurring events expanded server-side. Occurrences dated outside
    /// `range` and cancelled occurrences are already filtered out.
    fn search_events<'a>(
        &'a self,
        calendar: &'a CalendarHandle,
        range: DateRange,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawOccurrence>>>;
}
