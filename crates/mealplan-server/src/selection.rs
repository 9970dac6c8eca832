//! Calendar selection with a short-lived cache.
//!
//! Calendar enumeration is an expensive upstream round trip, so the resolved
//! selection is cached for a TTL. A cached selection is only reused while the
//! configured name list it was resolved against is unchanged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use mealplan_providers::{CalendarHandle, CalendarSource, ProviderResult};

struct CachedSelection {
    calendars: Vec<CalendarHandle>,
    configured: Vec<String>,
    resolved_at: Instant,
}

/// Resolves which upstream calendars to sync, caching the answer.
pub struct SelectionCache {
    source: Arc<dyn CalendarSource>,
    configured_names: Vec<String>,
    ttl: Duration,
    state: Mutex<Option<CachedSelection>>,
}

impl SelectionCache {
    pub fn new(source: Arc<dyn CalendarSource>, configured_names: Vec<String>, ttl: Duration) -> Self {
        Self {
            source,
            configured_names,
            ttl,
            state: Mutex::new(None),
        }
    }

    /// The calendars to sync, from cache when fresh.
    ///
    /// The lock is held across the upstream call so concurrent callers never
    /// enumerate calendars twice for one expiry.
    pub async fn resolve(&self) -> ProviderResult<Vec<CalendarHandle>> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref()
            && cached.resolved_at.elapsed() < self.ttl
            && cached.configured == self.configured_names
        {
            debug!(count = cached.calendars.len(), "calendar selection served from cache");
            return Ok(cached.calendars.clone());
        }

        let available = self.source.list_calendars().await?;
        let selection = select_calendars(&available, &self.configured_names);

        *state = Some(CachedSelection {
            calendars: selection.clone(),
            configured: self.configured_names.clone(),
            resolved_at: Instant::now(),
        });

        Ok(selection)
    }

    /// Names of all calendars visible upstream, bypassing the cache.
    ///
    /// An unreachable upstream yields an empty list rather than an error.
    pub async fn list_available(&self) -> Vec<String> {
        match self.source.list_calendars().await {
            Ok(calendars) => calendars.into_iter().map(|c| c.name).collect(),
            Err(e) => {
                warn!(error = %e, "calendar enumeration failed");
                Vec::new()
            }
        }
    }

    /// Drops the cached selection so the next resolve hits upstream.
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}

/// Picks the configured calendars from the available set.
///
/// With no names configured, the first available calendar is selected. When
/// names are configured but none match, the first available calendar is used
/// as a fallback so a misconfiguration degrades instead of going dark.
fn select_calendars(available: &[CalendarHandle], configured: &[String]) -> Vec<CalendarHandle> {
    let Some(first) = available.first() else {
        return Vec::new();
    };

    if configured.is_empty() {
        info!(calendar = %first.name, "no calendars configured, using first available");
        return vec![first.clone()];
    }

    let matched: Vec<CalendarHandle> = available
        .iter()
        .filter(|c| configured.iter().any(|name| name == &c.name))
        .cloned()
        .collect();

    if matched.is_empty() {
        warn!(
            configured = ?configured,
            fallback = %first.name,
            "no configured calendar matched, falling back to first available"
        );
        return vec![first.clone()];
    }

    info!(count = matched.len(), "resolved configured calendars");
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mealplan_core::DateRange;
    use mealplan_providers::{BoxFuture, ProviderError, RawOccurrence};

    struct FakeSource {
        calendars: Vec<CalendarHandle>,
        list_calls: AtomicUsize,
        fail: bool,
    }

    impl FakeSource {
        fn with_names(names: &[&str]) -> Self {
            Self {
                calendars: names
                    .iter()
                    .map(|n| CalendarHandle::new(*n, format!("/cal/{n}/")))
                    .collect(),
                list_calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calendars: Vec::new(),
                list_calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    impl CalendarSource for FakeSource {
        fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarHandle>>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let result = if self.fail {
                Err(ProviderError::network("connection refused"))
            } else {
                Ok(self.calendars.clone())
            };
            Box::pin(async move { result })
        }

        fn search_events<'a>(
            &'a self,
            _calendar: &'a CalendarHandle,
            _range: DateRange,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawOccurrence>>> {
            Box::pin(async move { Ok(Vec::new()) })
        }
    }

    fn names(calendars: &[CalendarHandle]) -> Vec<&str> {
        calendars.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn exact_names_are_selected() {
        let source = Arc::new(FakeSource::with_names(&["Personal", "Work", "Meals"]));
        let cache = SelectionCache::new(
            source,
            vec!["Meals".into(), "Work".into()],
            Duration::from_secs(600),
        );

        let selected = cache.resolve().await.unwrap();
        assert_eq!(names(&selected), vec!["Work", "Meals"]);
    }

    #[tokio::test]
    async fn unmatched_names_fall_back_to_first() {
        let source = Arc::new(FakeSource::with_names(&["Personal", "Work"]));
        let cache = SelectionCache::new(
            source,
            vec!["NonExistent".into()],
            Duration::from_secs(600),
        );

        let selected = cache.resolve().await.unwrap();
        assert_eq!(names(&selected), vec!["Personal"]);
    }

    #[tokio::test]
    async fn no_configured_names_select_first() {
        let source = Arc::new(FakeSource::with_names(&["Personal", "Work"]));
        let cache = SelectionCache::new(source, Vec::new(), Duration::from_secs(600));

        let selected = cache.resolve().await.unwrap();
        assert_eq!(names(&selected), vec!["Personal"]);
    }

    #[tokio::test]
    async fn empty_upstream_selects_nothing() {
        let source = Arc::new(FakeSource::with_names(&[]));
        let cache = SelectionCache::new(source, vec!["Family".into()], Duration::from_secs(600));

        assert!(cache.resolve().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_resolve_within_ttl_skips_upstream() {
        let source = Arc::new(FakeSource::with_names(&["Family"]));
        let cache = SelectionCache::new(source.clone(), Vec::new(), Duration::from_secs(600));

        cache.resolve().await.unwrap();
        cache.resolve().await.unwrap();
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_resolves_every_time() {
        let source = Arc::new(FakeSource::with_names(&["Family"]));
        let cache = SelectionCache::new(source.clone(), Vec::new(), Duration::ZERO);

        cache.resolve().await.unwrap();
        cache.resolve().await.unwrap();
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_upstream() {
        let source = Arc::new(FakeSource::with_names(&["Family"]));
        let cache = SelectionCache::new(source.clone(), Vec::new(), Duration::from_secs(600));

        cache.resolve().await.unwrap();
        cache.invalidate().await;
        cache.resolve().await.unwrap();
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn list_available_tolerates_failure() {
        let cache = SelectionCache::new(
            Arc::new(FakeSource::failing()),
            Vec::new(),
            Duration::from_secs(600),
        );

        assert!(cache.list_available().await.is_empty());
    }

    #[tokio::test]
    async fn resolve_propagates_upstream_error() {
        let cache = SelectionCache::new(
            Arc::new(FakeSource::failing()),
            Vec::new(),
            Duration::from_secs(600),
        );

        assert!(cache.resolve().await.is_err());
    }
}
