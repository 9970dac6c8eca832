//! CalDAV implementation of [`CalendarSource`].

use tracing::{debug, info, warn};

use mealplan_core::DateRange;

use crate::error::ProviderResult;
use crate::occurrence::RawOccurrence;
use crate::source::{BoxFuture, CalendarHandle, CalendarSource};

use super::client::CalDavClient;
use super::config::CalDavConfig;
use super::ics::parse_ics_content;
use super::xml::{
    calendar_query_body, parse_propfind_response, parse_report_response, propfind_calendars_body,
};

/// Fetches calendars and events from a CalDAV server.
pub struct CalDavProvider {
    client: CalDavClient,
    config: CalDavConfig,
}

impl CalDavProvider {
    /// Creates a new provider with the given configuration.
    pub fn new(config: CalDavConfig) -> ProviderResult<Self> {
        let client = CalDavClient::new(config.clone())?;
        Ok(Self { client, config })
    }

    /// Discovers calendars at the configured URL via PROPFIND.
    async fn discover_calendars(&self) -> ProviderResult<Vec<CalendarHandle>> {
        let url = self.config.url_str();
        let body = propfind_calendars_body();

        debug!(url = %url, "discovering calendars via PROPFIND");

        let response = self.client.propfind(url, &body, 1).await?;
        let discovered = parse_propfind_response(&response);

        let calendars: Vec<CalendarHandle> = discovered
            .into_iter()
            .map(|c| {
                let name = c.display_name.unwrap_or_else(|| c.href.clone());
                let href = resolve_href(&self.config.url, &c.href);
                CalendarHandle::new(name, href)
            })
            .collect();

        info!(count = calendars.len(), "discovered calendars");
        Ok(calendars)
    }

    /// Fetches one calendar's occurrences for a date range via REPORT.
    async fn fetch_range(
        &self,
        calendar: &CalendarHandle,
        range: DateRange,
    ) -> ProviderResult<Vec<RawOccurrence>> {
        debug!(calendar = %calendar.name, range = %range, "fetching events with REPORT");

        let query_body = calendar_query_body(range);
        let response = self.client.report(&calendar.href, &query_body).await?;

        let mut occurrences = Vec::new();
        for (_href, ics) in parse_report_response(&response) {
            occurrences.extend(parse_ics_content(&ics, &calendar.name));
        }

        // Cancelled entries and server over-fetch outside the requested
        // range are dropped before the cache ever sees them.
        let occurrences: Vec<_> = occurrences
            .into_iter()
            .filter(|o| !o.is_cancelled() && range.contains_date(o.date()))
            .collect();

        info!(
            calendar = %calendar.name,
            count = occurrences.len(),
            "fetched and parsed occurrences"
        );

        Ok(occurrences)
    }
}

impl CalendarSource for CalDavProvider {
    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarHandle>>> {
        Box::pin(async move { self.discover_calendars().await })
    }

    fn search_events<'a>(
        &'a self,
        calendar: &'a CalendarHandle,
        range: DateRange,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawOccurrence>>> {
        Box::pin(async move {
            match self.fetch_range(calendar, range).await {
                Ok(occurrences) => Ok(occurrences),
                Err(e) => {
                    warn!(calendar = %calendar.name, error = %e, "calendar fetch failed");
                    Err(e)
                }
            }
        })
    }
}

/// Resolves a possibly-relative href against the configured base URL.
fn resolve_href(base: &url::Url, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        base.join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}
