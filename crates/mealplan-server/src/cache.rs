//! The event range cache.
//!
//! Read requests are served from SQLite whenever the requested dates fall
//! inside the synchronized window. Dates outside it are fetched from
//! upstream on demand and persisted, without widening the window metadata:
//! the first request against a never-synchronized cache establishes the
//! window, and after that only a full [`refresh`](EventRangeCache::refresh)
//! moves it.
//!
//! Upstream is always treated as optional. A dead CalDAV server degrades a
//! cold read to an empty list and leaves warm cache content untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{Local, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use mealplan_core::{CachedEvent, DateRange, RangeSplit, refresh_window, sort_by_start};
use mealplan_providers::{CalendarSource, ProviderError, ProviderResult};

use crate::error::ServerResult;
use crate::selection::SelectionCache;
use crate::store::EventStore;

/// Upper bound on concurrent upstream fetches across all callers.
const MAX_CONCURRENT_UPSTREAM: usize = 2;

/// A snapshot of cache state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub last_refresh: Option<NaiveDateTime>,
    pub cache_start: Option<NaiveDate>,
    pub cache_end: Option<NaiveDate>,
    pub is_refreshing: bool,
}

/// Range-based event cache over an [`EventStore`] and a [`CalendarSource`].
pub struct EventRangeCache {
    store: EventStore,
    source: Arc<dyn CalendarSource>,
    selection: Arc<SelectionCache>,
    upstream_permits: Semaphore,
    refreshing: AtomicBool,
    debug_timing: bool,
}

/// Clears the in-progress flag when a refresh ends, even on error.
struct RefreshFlagGuard<'a>(&'a AtomicBool);

impl Drop for RefreshFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EventRangeCache {
    pub fn new(
        store: EventStore,
        source: Arc<dyn CalendarSource>,
        selection: Arc<SelectionCache>,
    ) -> Self {
        Self {
            store,
            source,
            selection,
            upstream_permits: Semaphore::new(MAX_CONCURRENT_UPSTREAM),
            refreshing: AtomicBool::new(false),
            debug_timing: false,
        }
    }

    /// Logs per-request timings at debug level.
    pub fn with_debug_timing(mut self, enabled: bool) -> Self {
        self.debug_timing = enabled;
        self
    }

    /// Events for `range`, ordered by start time.
    ///
    /// Dates covered by the synchronized window come from storage; the rest
    /// is fetched from upstream and persisted before being returned.
    pub async fn fetch(&self, range: DateRange) -> ServerResult<Vec<CachedEvent>> {
        let started = Instant::now();

        let mut events = match self.store.metadata().await? {
            None => {
                debug!(range = %range, "cache never synchronized, fetching range from upstream");
                self.fetch_initial(range).await?
            }
            Some(meta) => {
                let split = RangeSplit::around(range, meta.window());
                if split.is_full_hit() {
                    debug!(range = %range, "full cache hit");
                    self.store.events_in_range(range).await?
                } else {
                    self.fetch_split(range, split).await?
                }
            }
        };

        sort_by_start(&mut events);

        if self.debug_timing {
            debug!(
                range = %range,
                count = events.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetch complete"
            );
        }
        Ok(events)
    }

    /// Serves a partial hit: gaps from upstream, the overlap from storage.
    async fn fetch_split(
        &self,
        range: DateRange,
        split: RangeSplit,
    ) -> ServerResult<Vec<CachedEvent>> {
        debug!(
            range = %range,
            before = ?split.before,
            after = ?split.after,
            "partial cache hit, filling gaps from upstream"
        );

        let mut events = Vec::new();
        if let Some(before) = split.before {
            events.extend(self.fetch_and_store(before).await?);
        }
        if let Some(overlap) = split.overlap {
            events.extend(self.store.events_in_range(overlap).await?);
        }
        if let Some(after) = split.after {
            events.extend(self.fetch_and_store(after).await?);
        }
        Ok(events)
    }

    /// First-ever fetch: persists the range and establishes it as the
    /// synchronized window, so a repeat of the same request is a full hit.
    ///
    /// An unreachable upstream leaves the cache unsynchronized; an empty
    /// window must not be recorded as covered.
    async fn fetch_initial(&self, range: DateRange) -> ServerResult<Vec<CachedEvent>> {
        match self.fetch_upstream(range).await {
            Ok(events) => {
                self.store
                    .replace_window(range, events.clone(), Utc::now().naive_utc())
                    .await?;
                Ok(events)
            }
            Err(e) => {
                warn!(range = %range, error = %e, "upstream unavailable, serving without fresh data");
                Ok(Vec::new())
            }
        }
    }

    /// Fetches `range` from upstream and persists it.
    ///
    /// When upstream is entirely unreachable the stored rows are left alone
    /// and an empty list is returned; a dead server must not erase cache.
    async fn fetch_and_store(&self, range: DateRange) -> ServerResult<Vec<CachedEvent>> {
        match self.fetch_upstream(range).await {
            Ok(events) => {
                self.store.replace_range(range, events.clone()).await?;
                Ok(events)
            }
            Err(e) => {
                warn!(range = %range, error = %e, "upstream unavailable, serving without fresh data");
                Ok(Vec::new())
            }
        }
    }

    /// Fetches all selected calendars for `range`, sequentially.
    ///
    /// A single failing calendar is skipped for this cycle; only a failure
    /// to resolve the selection at all is an error.
    async fn fetch_upstream(&self, range: DateRange) -> ProviderResult<Vec<CachedEvent>> {
        let calendars = self.selection.resolve().await?;

        let _permit = self
            .upstream_permits
            .acquire()
            .await
            .map_err(|_| ProviderError::internal("upstream semaphore closed"))?;

        let mut events = Vec::new();
        for calendar in &calendars {
            match self.source.search_events(calendar, range).await {
                Ok(occurrences) => {
                    events.extend(occurrences.into_iter().map(|occ| {
                        CachedEvent::new(
                            occ.calendar_name.clone(),
                            occ.title(),
                            occ.start.as_datetime(),
                            occ.end.map(|t| t.as_datetime()),
                            occ.is_all_day(),
                        )
                    }));
                }
                Err(e) => {
                    warn!(
                        calendar = %calendar.name,
                        error = %e,
                        "calendar fetch failed, skipping it this cycle"
                    );
                }
            }
        }
        Ok(events)
    }

    /// Runs a full refresh of the standard window around today.
    ///
    /// Returns `Ok(false)` when another refresh is already in progress. On
    /// failure the previous window content and metadata stay untouched.
    pub async fn refresh(&self) -> ServerResult<bool> {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            debug!("refresh already in progress, skipping");
            return Ok(false);
        }
        let _guard = RefreshFlagGuard(&self.refreshing);

        let window = refresh_window(Local::now().date_naive());
        info!(window = %window, "refreshing event cache");
        let started = Instant::now();

        let events = self.fetch_upstream(window).await?;
        let count = events.len();
        self.store
            .replace_window(window, events, Utc::now().naive_utc())
            .await?;

        info!(
            count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "event cache refreshed"
        );
        Ok(true)
    }

    /// Whether a refresh is currently running in this process.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> ServerResult<CacheStatus> {
        let meta = self.store.metadata().await?;
        Ok(CacheStatus {
            last_refresh: meta.as_ref().map(|m| m.last_refresh),
            cache_start: meta.as_ref().map(|m| m.cache_start),
            cache_end: meta.as_ref().map(|m| m.cache_end),
            is_refreshing: self.is_refreshing(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tempfile::TempDir;

    use mealplan_providers::{BoxFuture, CalendarHandle, OccurrenceTime, RawOccurrence};

    struct FakeSource {
        occurrences: Vec<RawOccurrence>,
        search_calls: AtomicUsize,
        searched_ranges: Mutex<Vec<DateRange>>,
        fail: bool,
    }

    impl FakeSource {
        fn new(occurrences: Vec<RawOccurrence>) -> Self {
            Self {
                occurrences,
                search_calls: AtomicUsize::new(0),
                searched_ranges: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            let mut source = Self::new(Vec::new());
            source.fail = true;
            source
        }
    }

    impl CalendarSource for FakeSource {
        fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarHandle>>> {
            let result = if self.fail {
                Err(ProviderError::network("connection refused"))
            } else {
                Ok(vec![CalendarHandle::new("Family", "/cal/family/")])
            };
            Box::pin(async move { result })
        }

        fn search_events<'a>(
            &'a self,
            _calendar: &'a CalendarHandle,
            range: DateRange,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawOccurrence>>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.searched_ranges.lock().unwrap().push(range);
            let matching: Vec<RawOccurrence> = self
                .occurrences
                .iter()
                .filter(|o| range.contains_date(o.date()))
                .cloned()
                .collect();
            Box::pin(async move { Ok(matching) })
        }
    }

    fn occurrence(uid: &str, start: &str, summary: &str) -> RawOccurrence {
        RawOccurrence::new(
            uid,
            OccurrenceTime::DateTime(start.parse().unwrap()),
            "Family",
        )
        .with_summary(summary)
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn build_cache(dir: &TempDir, source: Arc<FakeSource>) -> EventRangeCache {
        let store = EventStore::open(dir.path().join("cache.db")).unwrap();
        let selection = Arc::new(SelectionCache::new(
            source.clone(),
            Vec::new(),
            Duration::from_secs(600),
        ));
        EventRangeCache::new(store, source, selection)
    }

    #[tokio::test]
    async fn cold_fetch_hits_upstream_and_persists() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new(vec![occurrence(
            "a",
            "2024-03-10T18:00:00",
            "Dinner",
        )]));
        let cache = build_cache(&dir, source.clone());

        let range = DateRange::new(date("2024-03-01"), date("2024-03-31"));
        let events = cache.fetch(range).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Dinner");
        assert_eq!(source.search_calls.load(Ordering::SeqCst), 1);

        // The first fetch established the window; repeating the request is
        // a full hit returning the same events.
        let again = cache.fetch(range).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].title, "Dinner");
        assert_eq!(again[0].start, events[0].start);
        assert_eq!(source.search_calls.load(Ordering::SeqCst), 1);

        let meta = cache.store.metadata_blocking().unwrap().unwrap();
        assert_eq!(meta.window(), range);
    }

    #[tokio::test]
    async fn refresh_then_fetch_is_served_from_storage() {
        let dir = TempDir::new().unwrap();
        let today = Local::now().date_naive();
        let start = today.and_hms_opt(18, 0, 0).unwrap();
        let source = Arc::new(FakeSource::new(vec![occurrence(
            "a",
            &start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "Dinner",
        )]));
        let cache = build_cache(&dir, source.clone());

        assert!(cache.refresh().await.unwrap());
        let after_refresh = source.search_calls.load(Ordering::SeqCst);

        let events = cache.fetch(DateRange::single(today)).await.unwrap();
        assert_eq!(events.len(), 1);
        // The request was inside the refreshed window: no new upstream call.
        assert_eq!(source.search_calls.load(Ordering::SeqCst), after_refresh);
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let today = Local::now().date_naive();
        let start = today.and_hms_opt(12, 0, 0).unwrap();
        let source = Arc::new(FakeSource::new(vec![occurrence(
            "a",
            &start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "Lunch",
        )]));
        let cache = build_cache(&dir, source.clone());

        cache.refresh().await.unwrap();
        cache.refresh().await.unwrap();

        let events = cache.fetch(DateRange::single(today)).await.unwrap();
        assert_eq!(events.len(), 1, "re-sync must not duplicate rows");
    }

    #[tokio::test]
    async fn gap_before_window_fetches_only_the_gap() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new(vec![
            occurrence("gap", "2024-02-22T18:00:00", "Gap dinner"),
            occurrence("in", "2024-03-05T18:00:00", "Window dinner"),
        ]));
        let cache = build_cache(&dir, source.clone());

        // Seed a synchronized window directly.
        let window = DateRange::new(date("2024-03-01"), date("2024-05-01"));
        let stored = CachedEvent::new(
            "Family",
            "Window dinner",
            "2024-03-05T18:00:00".parse().unwrap(),
            None,
            false,
        );
        cache
            .store
            .replace_window_blocking(window, &[stored], "2024-03-01T06:00:00".parse().unwrap())
            .unwrap();

        let events = cache
            .fetch(DateRange::new(date("2024-02-20"), date("2024-03-10")))
            .await
            .unwrap();

        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Gap dinner", "Window dinner"]);

        // Upstream only saw the uncovered prefix.
        let ranges = source.searched_ranges.lock().unwrap().clone();
        assert_eq!(
            ranges,
            vec![DateRange::new(date("2024-02-20"), date("2024-02-29"))]
        );

        // The window metadata did not widen.
        let meta = cache.store.metadata_blocking().unwrap().unwrap();
        assert_eq!(meta.cache_start, date("2024-03-01"));
        assert_eq!(meta.cache_end, date("2024-05-01"));
    }

    #[tokio::test]
    async fn full_hit_never_touches_upstream() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new(Vec::new()));
        let cache = build_cache(&dir, source.clone());

        let window = DateRange::new(date("2024-03-01"), date("2024-05-01"));
        cache
            .store
            .replace_window_blocking(window, &[], "2024-03-01T06:00:00".parse().unwrap())
            .unwrap();

        cache
            .fetch(DateRange::new(date("2024-03-10"), date("2024-04-10")))
            .await
            .unwrap();
        assert_eq!(source.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cold_fetch_with_dead_upstream_returns_empty() {
        let dir = TempDir::new().unwrap();
        let cache = build_cache(&dir, Arc::new(FakeSource::failing()));

        let events = cache
            .fetch(DateRange::new(date("2024-03-01"), date("2024-03-31")))
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_preserves_previous_window() {
        let dir = TempDir::new().unwrap();
        let cache = build_cache(&dir, Arc::new(FakeSource::failing()));

        let window = DateRange::new(date("2024-03-01"), date("2024-05-01"));
        cache
            .store
            .replace_window_blocking(window, &[], "2024-03-01T06:00:00".parse().unwrap())
            .unwrap();

        assert!(cache.refresh().await.is_err());
        assert!(!cache.is_refreshing());

        let meta = cache.store.metadata_blocking().unwrap().unwrap();
        assert_eq!(meta.last_refresh, "2024-03-01T06:00:00".parse().unwrap());
    }

    #[tokio::test]
    async fn status_reflects_metadata() {
        let dir = TempDir::new().unwrap();
        let cache = build_cache(&dir, Arc::new(FakeSource::new(Vec::new())));

        let status = cache.status().await.unwrap();
        assert!(status.last_refresh.is_none());
        assert!(!status.is_refreshing);

        cache.refresh().await.unwrap();
        let status = cache.status().await.unwrap();
        assert!(status.last_refresh.is_some());
        assert!(status.cache_start.is_some());
    }
}
