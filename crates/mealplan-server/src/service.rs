//! The calendar service: wiring for store, caches, scheduler, sessions and
//! the SSE broadcaster.
//!
//! This is the composition root the HTTP layer talks to. It owns the
//! background refresh task and pushes a `calendar.refreshed` event with the
//! freshly cached window after every successful sync.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mealplan_core::{CachedEvent, DateRange};
use mealplan_providers::{
    BoxFuture, CalDavConfig, CalDavProvider, CalendarHandle, CalendarSource, ProviderResult,
    RawOccurrence,
};

use crate::broadcast::EventBroadcaster;
use crate::cache::{CacheStatus, EventRangeCache};
use crate::config::Settings;
use crate::error::ServerResult;
use crate::scheduler::{RefreshScheduler, SchedulerConfig, SchedulerHandle};
use crate::selection::SelectionCache;
use crate::session::TokenValidator;
use crate::store::EventStore;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Result of a manual refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A refresh was started (or queued behind the scheduler).
    Started,
    /// A refresh is already running; nothing was started.
    AlreadyRunning,
}

/// Calendars visible upstream and the subset currently selected.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarListing {
    pub available: Vec<String>,
    pub selected: Vec<String>,
}

/// A [`CalendarSource`] used when no CalDAV credentials are configured.
///
/// Every operation succeeds with an empty result, so an unconfigured
/// deployment runs normally with an empty calendar.
struct UnconfiguredSource;

impl CalendarSource for UnconfiguredSource {
    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarHandle>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn search_events<'a>(
        &'a self,
        _calendar: &'a CalendarHandle,
        _range: DateRange,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawOccurrence>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// The assembled calendar sync service.
pub struct CalendarService {
    settings: Settings,
    store: EventStore,
    selection: Arc<SelectionCache>,
    cache: Arc<EventRangeCache>,
    broadcaster: Arc<EventBroadcaster>,
    validator: TokenValidator,
    scheduler: Option<SchedulerHandle>,
    scheduler_task: Option<JoinHandle<()>>,
}

impl CalendarService {
    /// Builds the service with a CalDAV source from `settings`.
    pub fn new(settings: Settings) -> ServerResult<Self> {
        let source: Arc<dyn CalendarSource> = if settings.has_caldav_credentials() {
            let config = CalDavConfig::new(&settings.caldav_url)
                .map_err(|e| crate::error::ServerError::config(format!("caldav url: {e}")))?
                .with_credentials(
                settings.caldav_username.clone().unwrap_or_default(),
                settings.caldav_password.clone().unwrap_or_default(),
            );
            Arc::new(CalDavProvider::new(config)?)
        } else {
            info!("no CalDAV credentials configured, calendar features disabled");
            Arc::new(UnconfiguredSource)
        };
        Self::with_source(settings, source)
    }

    /// Builds the service around an arbitrary source. Used by tests.
    pub fn with_source(settings: Settings, source: Arc<dyn CalendarSource>) -> ServerResult<Self> {
        let store = EventStore::open(&settings.database_path)?;
        let selection = Arc::new(SelectionCache::new(
            source.clone(),
            settings.calendar_names.clone(),
            settings.selection_ttl,
        ));
        let cache = Arc::new(
            EventRangeCache::new(store.clone(), source, selection.clone())
                .with_debug_timing(settings.debug_timing),
        );
        let broadcaster = Arc::new(EventBroadcaster::default());
        let validator = TokenValidator::new(
            settings.oidc.clone(),
            settings.revalidation_interval,
            settings.identity_timeout,
            settings.network_error_policy,
        )?;

        Ok(Self {
            settings,
            store,
            selection,
            cache,
            broadcaster,
            validator,
            scheduler: None,
            scheduler_task: None,
        })
    }

    /// Starts the background refresh scheduler. Idempotent.
    pub fn start(&mut self) {
        if self.scheduler.is_some() {
            return;
        }

        let scheduler = RefreshScheduler::new(SchedulerConfig::new(self.settings.refresh_interval));
        self.scheduler = Some(scheduler.handle());

        let cache = self.cache.clone();
        let store = self.store.clone();
        let broadcaster = self.broadcaster.clone();
        self.scheduler_task = Some(tokio::spawn(scheduler.run(move || {
            let cache = cache.clone();
            let store = store.clone();
            let broadcaster = broadcaster.clone();
            Box::pin(async move { refresh_and_broadcast(&cache, &store, &broadcaster).await })
                as std::pin::Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        })));
    }

    /// Stops the scheduler and closes every SSE stream.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.scheduler.take() {
            handle.stop().await;
        }
        if let Some(task) = self.scheduler_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler task did not shut down cleanly");
            }
        }
        self.broadcaster.close();
        info!("calendar service stopped");
    }

    /// Events for `range`, served through the range cache.
    pub async fn events(&self, range: DateRange) -> ServerResult<Vec<CachedEvent>> {
        self.cache.fetch(range).await
    }

    /// Triggers a refresh unless one is already running.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        if self.cache.is_refreshing() {
            return RefreshOutcome::AlreadyRunning;
        }
        match &self.scheduler {
            Some(handle) => {
                handle.refresh_now().await;
            }
            None => {
                if let Err(e) =
                    refresh_and_broadcast(&self.cache, &self.store, &self.broadcaster).await
                {
                    warn!(error = %e, "manual refresh failed");
                }
            }
        }
        RefreshOutcome::Started
    }

    pub async fn cache_status(&self) -> ServerResult<CacheStatus> {
        self.cache.status().await
    }

    /// Upstream calendars and the selected subset.
    pub async fn calendars(&self) -> CalendarListing {
        let available = self.selection.list_available().await;
        let selected = match self.selection.resolve().await {
            Ok(handles) => handles.into_iter().map(|h| h.name).collect(),
            Err(e) => {
                warn!(error = %e, "selection resolution failed");
                Vec::new()
            }
        };
        CalendarListing {
            available,
            selected,
        }
    }

    pub fn subscribe(&self) -> crate::broadcast::Subscription {
        self.broadcaster.subscribe()
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }
}

/// Runs one cache refresh and, when it actually ran, broadcasts the fresh
/// window as a `calendar.refreshed` event.
async fn refresh_and_broadcast(
    cache: &EventRangeCache,
    store: &EventStore,
    broadcaster: &EventBroadcaster,
) -> Result<(), String> {
    let ran = cache.refresh().await.map_err(|e| e.to_string())?;
    if !ran {
        return Ok(());
    }

    let Some(meta) = store.metadata().await.map_err(|e| e.to_string())? else {
        return Ok(());
    };
    let events = store
        .events_in_range(meta.window())
        .await
        .map_err(|e| e.to_string())?;

    let payload = json!({
        "events_by_date": group_events_by_date(&events),
        "last_refresh": meta.last_refresh.format(DATETIME_FORMAT).to_string(),
    });
    broadcaster.publish("calendar.refreshed", &payload);
    Ok(())
}

/// Groups events into a JSON object keyed by ISO date.
fn group_events_by_date(events: &[CachedEvent]) -> Value {
    let mut by_date: Map<String, Value> = Map::new();
    for event in events {
        let entry = by_date
            .entry(event.date.format("%Y-%m-%d").to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(json!({
                "title": event.title,
                "start_time": event.start.format(DATETIME_FORMAT).to_string(),
                "end_time": event.end.map(|e| e.format(DATETIME_FORMAT).to_string()),
                "all_day": event.all_day,
                "calendar": event.calendar_name,
            }));
        }
    }
    Value::Object(by_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Local;
    use tempfile::TempDir;

    struct StaticSource {
        occurrences: Vec<RawOccurrence>,
    }

    impl CalendarSource for StaticSource {
        fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarHandle>>> {
            Box::pin(async { Ok(vec![CalendarHandle::new("Family", "/cal/family/")]) })
        }

        fn search_events<'a>(
            &'a self,
            _calendar: &'a CalendarHandle,
            range: DateRange,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawOccurrence>>> {
            let matching: Vec<RawOccurrence> = self
                .occurrences
                .iter()
                .filter(|o| range.contains_date(o.date()))
                .cloned()
                .collect();
            Box::pin(async move { Ok(matching) })
        }
    }

    fn service_with_today_event(dir: &TempDir) -> CalendarService {
        use mealplan_providers::OccurrenceTime;

        let today = Local::now().date_naive();
        let start = today.and_hms_opt(18, 0, 0).unwrap();
        let source = Arc::new(StaticSource {
            occurrences: vec![
                RawOccurrence::new("dinner", OccurrenceTime::DateTime(start), "Family")
                    .with_summary("Dinner"),
            ],
        });
        let settings = Settings::default()
            .with_database_path(dir.path().join("cache.db"))
            .with_refresh_interval(Duration::from_secs(3600));
        CalendarService::with_source(settings, source).unwrap()
    }

    #[tokio::test]
    async fn unconfigured_service_serves_empty_calendar() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::default().with_database_path(dir.path().join("cache.db"));
        let service =
            CalendarService::with_source(settings, Arc::new(UnconfiguredSource)).unwrap();

        let today = Local::now().date_naive();
        let events = service.events(DateRange::single(today)).await.unwrap();
        assert!(events.is_empty());

        let listing = service.calendars().await;
        assert!(listing.available.is_empty());
        assert!(listing.selected.is_empty());
    }

    #[tokio::test]
    async fn manual_refresh_broadcasts_refreshed_event() {
        let dir = TempDir::new().unwrap();
        let service = service_with_today_event(&dir);
        let sub = service.subscribe();

        assert_eq!(service.refresh_now().await, RefreshOutcome::Started);

        let frame = sub.recv().await.unwrap();
        let body: Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(body["type"], "calendar.refreshed");

        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let day = &body["payload"]["events_by_date"][&today];
        assert_eq!(day[0]["title"], "Dinner");
        assert_eq!(day[0]["all_day"], false);
        assert!(body["payload"]["last_refresh"].is_string());
    }

    #[tokio::test]
    async fn start_syncs_and_stop_closes_streams() {
        let dir = TempDir::new().unwrap();
        let mut service = service_with_today_event(&dir);
        let sub = service.subscribe();

        service.start();
        // The cold-start sync produces a broadcast.
        let frame = sub.recv().await.unwrap();
        assert!(frame.contains("calendar.refreshed"));

        service.stop().await;
        assert!(sub.recv().await.is_none(), "streams end on shutdown");

        let status = service.cache_status().await.unwrap();
        assert!(status.last_refresh.is_some());
    }

    #[tokio::test]
    async fn calendars_lists_available_and_selected() {
        let dir = TempDir::new().unwrap();
        let service = service_with_today_event(&dir);

        let listing = service.calendars().await;
        assert_eq!(listing.available, vec!["Family"]);
        assert_eq!(listing.selected, vec!["Family"]);
    }

    #[test]
    fn grouping_buckets_by_date() {
        let events = vec![
            CachedEvent::new("Family", "Dinner", "2024-03-10T18:00:00".parse().unwrap(), None, false),
            CachedEvent::new("Family", "Lunch", "2024-03-10T12:00:00".parse().unwrap(), None, false),
            CachedEvent::new("Family", "Trip", "2024-03-11T00:00:00".parse().unwrap(), None, true),
        ];
        let grouped = group_events_by_date(&events);

        assert_eq!(grouped["2024-03-10"].as_array().unwrap().len(), 2);
        assert_eq!(grouped["2024-03-11"][0]["all_day"], true);
    }
}
