//! Fetch-with-staleness record shared by cached aggregates.
//!
//! The entry itself is plain data; the owning store decides when to call
//! `begin_fetch`/`complete`/`fail` and holds it behind its own lock, which
//! is what makes the at-most-one-in-flight rule hold.

use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    value: Option<T>,
    fetched_at: Option<DateTime<Utc>>,
    ttl: Duration,
    in_flight: bool,
}

impl<T> CacheEntry<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            fetched_at: None,
            ttl,
            in_flight: false,
        }
    }

    /// Drops the cached value. An outstanding fetch keeps its `in_flight`
    /// claim; the owner releases it with `fail` once that fetch resolves.
    pub fn clear(&mut self) {
        self.value = None;
        self.fetched_at = None;
    }

    // ===== Getters =====

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Stale when never fetched or at least `ttl` has elapsed.
    /// A `fetched_at` in the future (clock moved back) counts as zero elapsed.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.fetched_at {
            None => true,
            Some(fetched_at) => {
                let elapsed = (now - fetched_at).to_std().unwrap_or(Duration::ZERO);
                elapsed >= self.ttl
            }
        }
    }

    /// Whether a fetch is worth starting. Pure; no side effects.
    pub fn should_fetch(&self, now: DateTime<Utc>, token: Option<&str>) -> bool {
        let has_token = token.map(|t| !t.trim().is_empty()).unwrap_or(false);
        !self.in_flight && (self.value.is_none() || self.is_stale(now)) && has_token
    }

    // ===== Mutations =====

    /// Marks the entry in flight. Returns false if another fetch already is.
    pub fn begin_fetch(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn complete(&mut self, value: T, now: DateTime<Utc>) {
        self.value = Some(value);
        self.fetched_at = Some(now);
        self.in_flight = false;
    }

    /// Ends the outstanding fetch without touching the cached value.
    pub fn fail(&mut self) {
        self.in_flight = false;
    }

    /// Reinstate a previously persisted value.
    pub fn restore(&mut self, value: T, fetched_at: Option<DateTime<Utc>>) {
        self.value = Some(value);
        self.fetched_at = fetched_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_entry_is_stale() {
        let entry: CacheEntry<u32> = CacheEntry::new(Duration::from_secs(300));
        assert!(entry.is_stale(t0()));
        assert!(entry.value().is_none());
        assert!(!entry.is_in_flight());
    }

    #[test]
    fn test_staleness_boundary() {
        let ttl_values = [0u64, 1, 60, 300];
        for ttl in ttl_values {
            let mut entry = CacheEntry::new(Duration::from_secs(ttl));
            entry.complete(1u32, t0());
            for elapsed in [0u64, 1, 59, 60, 299, 300, 301] {
                let now = t0() + chrono::Duration::seconds(elapsed as i64);
                assert_eq!(
                    entry.is_stale(now),
                    elapsed >= ttl,
                    "ttl={} elapsed={}",
                    ttl,
                    elapsed
                );
            }
        }
    }

    #[test]
    fn test_clock_moving_backwards_is_fresh() {
        let mut entry = CacheEntry::new(Duration::from_secs(60));
        entry.complete(1u32, t0());
        assert!(!entry.is_stale(t0() - chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_should_fetch() {
        let mut entry = CacheEntry::new(Duration::from_secs(300));
        assert!(entry.should_fetch(t0(), Some("abc")));
        assert!(!entry.should_fetch(t0(), None));
        assert!(!entry.should_fetch(t0(), Some("")));

        assert!(entry.begin_fetch());
        assert!(!entry.begin_fetch());
        assert!(!entry.should_fetch(t0(), Some("abc")));

        entry.complete(7u32, t0());
        assert!(!entry.should_fetch(t0(), Some("abc")));
        assert!(entry.should_fetch(t0() + chrono::Duration::minutes(5), Some("abc")));
    }

    #[test]
    fn test_fail_keeps_value() {
        let mut entry = CacheEntry::new(Duration::from_secs(300));
        entry.complete(7u32, t0());
        entry.begin_fetch();
        entry.fail();
        assert_eq!(entry.value(), Some(&7));
        assert_eq!(entry.fetched_at(), Some(t0()));
        assert!(!entry.is_in_flight());
    }

    #[test]
    fn test_clear_drops_value_but_keeps_in_flight() {
        let mut entry = CacheEntry::new(Duration::from_secs(300));
        entry.complete(7u32, t0());
        entry.begin_fetch();
        entry.clear();
        assert!(entry.value().is_none());
        assert!(entry.fetched_at().is_none());
        assert!(entry.is_in_flight());
        assert!(!entry.begin_fetch());
        assert_eq!(entry.ttl(), Duration::from_secs(300));

        entry.fail();
        assert!(!entry.is_in_flight());
        assert!(entry.value().is_none());
    }
}
