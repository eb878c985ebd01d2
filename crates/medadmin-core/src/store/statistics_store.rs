use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::constants::MISSING_TOKEN_MESSAGE;
use crate::models::StatisticsSnapshot;
use crate::services::StatisticsService;
use crate::store::CacheEntry;

/// Persisted subset of the statistics store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedStatistics {
    pub value: Option<StatisticsSnapshot>,
    pub fetched_at: Option<DateTime<Utc>>,
}

struct StatisticsState {
    entry: CacheEntry<StatisticsSnapshot>,
    error: Option<String>,
    /// Bumped by `clear`; a fetch started under an older generation only
    /// releases `in_flight` when it resolves.
    generation: u64,
}

struct Inner {
    service: Arc<dyn StatisticsService>,
    clock: Arc<dyn Clock>,
    state: Mutex<StatisticsState>,
    revision: watch::Sender<u64>,
}

impl Inner {
    fn changed(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

/// Clears `in_flight` if a fetch future is dropped before the service answers.
struct InFlightGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().entry.fail();
            self.inner.changed();
        }
    }
}

/// TTL-bounded cache around the dashboard statistics, with at most one
/// outstanding fetch.
#[derive(Clone)]
pub struct StatisticsStore {
    inner: Arc<Inner>,
}

impl StatisticsStore {
    pub fn new(service: Arc<dyn StatisticsService>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                service,
                clock,
                state: Mutex::new(StatisticsState {
                    entry: CacheEntry::new(ttl),
                    error: None,
                    generation: 0,
                }),
                revision,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    // ===== Getters =====

    pub fn statistics(&self) -> Option<StatisticsSnapshot> {
        self.inner.state.lock().entry.value().cloned()
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().entry.fetched_at()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().entry.is_in_flight()
    }

    pub fn is_stale(&self) -> bool {
        let now = self.inner.clock.now();
        self.inner.state.lock().entry.is_stale(now)
    }

    pub fn should_fetch(&self, auth_token: Option<&str>) -> bool {
        let now = self.inner.clock.now();
        self.inner.state.lock().entry.should_fetch(now, auth_token)
    }

    // ===== Actions =====

    /// Fetch a fresh snapshot unless one is in flight or the cached one is
    /// still valid. Failures land in `error()`; the previous value stays.
    pub async fn fetch(&self, auth_token: Option<&str>, force_refresh: bool) {
        let (token, generation) = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now();

            if state.entry.is_in_flight() {
                debug!("statistics fetch skipped: already in flight");
                return;
            }
            if !force_refresh && state.entry.value().is_some() && !state.entry.is_stale(now) {
                debug!("statistics fetch skipped: cached value is fresh");
                return;
            }

            let token = match auth_token.map(str::trim).filter(|t| !t.is_empty()) {
                Some(token) => token.to_string(),
                None => {
                    state.error = Some(MISSING_TOKEN_MESSAGE.to_string());
                    drop(state);
                    self.inner.changed();
                    return;
                }
            };

            state.entry.begin_fetch();
            state.error = None;
            (token, state.generation)
        };
        self.inner.changed();

        let mut guard = InFlightGuard {
            inner: &self.inner,
            armed: true,
        };
        let result = self.inner.service.fetch_statistics(&token).await;
        guard.armed = false;

        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                debug!("statistics fetch result dropped: store was cleared");
                state.entry.fail();
                drop(state);
                self.inner.changed();
                return;
            }
            match result {
                Ok(snapshot) => {
                    let now = self.inner.clock.now();
                    state.entry.complete(snapshot, now);
                    state.error = None;
                }
                Err(e) => {
                    warn!(error = %e, "statistics fetch failed");
                    state.entry.fail();
                    state.error = Some(e.to_string());
                }
            }
        }
        self.inner.changed();
    }

    /// Back to the empty state (logout/teardown). A fetch still outstanding
    /// keeps blocking new ones, and its result is discarded.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            state.entry.clear();
            state.error = None;
            state.generation = state.generation.wrapping_add(1);
        }
        self.inner.changed();
    }

    // ===== Persistence =====

    pub fn snapshot(&self) -> PersistedStatistics {
        let state = self.inner.state.lock();
        PersistedStatistics {
            value: state.entry.value().cloned(),
            fetched_at: state.entry.fetched_at(),
        }
    }

    pub fn restore(&self, persisted: PersistedStatistics) {
        let Some(value) = persisted.value else {
            return;
        };
        {
            let mut state = self.inner.state.lock();
            if state.entry.is_in_flight() || state.entry.value().is_some() {
                return;
            }
            state.entry.restore(value, persisted.fetched_at);
        }
        self.inner.changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::testing::{sample_statistics, ManualClock, MockStatisticsService};

    fn store_with(service: Arc<MockStatisticsService>, clock: Arc<ManualClock>) -> StatisticsStore {
        StatisticsStore::new(service, clock, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_should_fetch_before_and_after_fetch() {
        let service = Arc::new(MockStatisticsService::returning(Ok(sample_statistics(10))));
        let clock = Arc::new(ManualClock::default());
        let store = store_with(service.clone(), clock.clone());

        assert!(store.should_fetch(Some("abc")));
        store.fetch(Some("abc"), false).await;
        assert!(!store.should_fetch(Some("abc")));
        assert_eq!(store.statistics(), Some(sample_statistics(10)));
        assert_eq!(store.last_fetched(), Some(clock.now()));
        assert!(store.error().is_none());
    }

    #[tokio::test]
    async fn test_fresh_value_is_served_without_network() {
        let service = Arc::new(MockStatisticsService::returning(Ok(sample_statistics(1))));
        let clock = Arc::new(ManualClock::default());
        let store = store_with(service.clone(), clock.clone());

        store.fetch(Some("abc"), false).await;
        clock.advance(Duration::from_secs(299));
        store.fetch(Some("abc"), false).await;
        assert_eq!(service.calls(), 1);

        clock.advance(Duration::from_secs(1));
        assert!(store.is_stale());
        store.fetch(Some("abc"), false).await;
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_ttl() {
        let service = Arc::new(MockStatisticsService::returning(Ok(sample_statistics(1))));
        let store = store_with(service.clone(), Arc::new(ManualClock::default()));

        store.fetch(Some("abc"), false).await;
        service.set_result(Ok(sample_statistics(2)));
        store.fetch(Some("abc"), true).await;

        assert_eq!(service.calls(), 2);
        assert_eq!(store.statistics(), Some(sample_statistics(2)));
    }

    #[tokio::test]
    async fn test_concurrent_fetches_issue_one_call() {
        let service = Arc::new(MockStatisticsService::gated(Ok(sample_statistics(3))));
        let store = store_with(service.clone(), Arc::new(ManualClock::default()));

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(Some("abc"), false).await }
        });
        while !store.is_loading() {
            tokio::task::yield_now().await;
        }

        store.fetch(Some("abc"), false).await;
        store.fetch(Some("abc"), true).await;
        assert_eq!(service.calls(), 1);

        service.release();
        first.await.unwrap();
        assert_eq!(service.calls(), 1);
        assert!(!store.is_loading());
        assert_eq!(store.statistics(), Some(sample_statistics(3)));
    }

    #[tokio::test]
    async fn test_missing_token_sets_error_without_network() {
        let service = Arc::new(MockStatisticsService::returning(Ok(sample_statistics(1))));
        let store = store_with(service.clone(), Arc::new(ManualClock::default()));

        store.fetch(None, false).await;
        store.fetch(Some("  "), false).await;

        assert_eq!(service.calls(), 0);
        assert_eq!(store.error().as_deref(), Some(MISSING_TOKEN_MESSAGE));
        assert!(!store.should_fetch(None));
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_value() {
        let service = Arc::new(MockStatisticsService::returning(Ok(sample_statistics(5))));
        let clock = Arc::new(ManualClock::default());
        let store = store_with(service.clone(), clock.clone());

        store.fetch(Some("abc"), false).await;
        let fetched_at = store.last_fetched();

        service.set_result(Err(SyncError::Transport("connection refused".to_string())));
        clock.advance(Duration::from_secs(600));
        store.fetch(Some("abc"), false).await;

        assert_eq!(store.statistics(), Some(sample_statistics(5)));
        assert_eq!(store.last_fetched(), fetched_at);
        assert_eq!(
            store.error().as_deref(),
            Some("Network error: connection refused")
        );
        assert!(!store.is_loading());

        service.set_result(Ok(sample_statistics(6)));
        store.fetch(Some("abc"), false).await;
        assert!(store.error().is_none());
        assert_eq!(store.statistics(), Some(sample_statistics(6)));
    }

    #[tokio::test]
    async fn test_dropped_fetch_releases_in_flight() {
        let service = Arc::new(MockStatisticsService::gated(Ok(sample_statistics(1))));
        let store = store_with(service.clone(), Arc::new(ManualClock::default()));

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(Some("abc"), false).await }
        });
        while !store.is_loading() {
            tokio::task::yield_now().await;
        }
        pending.abort();
        let _ = pending.await;

        assert!(!store.is_loading());
        assert!(store.should_fetch(Some("abc")));
    }

    #[tokio::test]
    async fn test_clear_during_fetch_discards_result() {
        let service = Arc::new(MockStatisticsService::gated(Ok(sample_statistics(8))));
        let store = store_with(service.clone(), Arc::new(ManualClock::default()));

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(Some("abc"), false).await }
        });
        while !store.is_loading() {
            tokio::task::yield_now().await;
        }

        store.clear();
        store.fetch(Some("abc"), true).await;
        assert_eq!(service.calls(), 1);
        assert!(store.statistics().is_none());

        service.release();
        first.await.unwrap();
        assert!(store.statistics().is_none());
        assert!(store.last_fetched().is_none());
        assert!(!store.is_loading());

        service.release();
        store.fetch(Some("abc"), false).await;
        assert_eq!(service.calls(), 2);
        assert_eq!(store.statistics(), Some(sample_statistics(8)));
    }

    #[tokio::test]
    async fn test_clear_and_restore() {
        let service = Arc::new(MockStatisticsService::returning(Ok(sample_statistics(4))));
        let store = store_with(service.clone(), Arc::new(ManualClock::default()));

        store.fetch(Some("abc"), false).await;
        let persisted = store.snapshot();
        assert_eq!(persisted.value, Some(sample_statistics(4)));

        store.clear();
        assert!(store.statistics().is_none());
        assert!(store.is_stale());

        store.restore(persisted.clone());
        assert_eq!(store.statistics(), Some(sample_statistics(4)));
        assert_eq!(store.last_fetched(), persisted.fetched_at);
        assert!(!store.should_fetch(Some("abc")));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let service = Arc::new(MockStatisticsService::returning(Ok(sample_statistics(1))));
        let store = store_with(service, Arc::new(ManualClock::default()));
        let mut rx = store.subscribe();

        store.fetch(Some("abc"), false).await;
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.clear();
        assert!(rx.has_changed().unwrap());
    }
}
