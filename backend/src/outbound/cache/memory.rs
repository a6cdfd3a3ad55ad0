//! In-process cache backend.
//!
//! Entries live in a mutex-guarded map with an expiry read from the injected
//! clock. When a write would exceed capacity, expired entries are swept first
//! and then the oldest tenth of what remains is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde_json::Value;
use tracing::debug;

use crate::domain::ports::{CacheBackend, CacheBackendError};

/// Default entry capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 5000;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
    inserted: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_sequence: u64,
}

/// Process-local cache backend.
pub struct InMemoryCacheBackend {
    state: Mutex<State>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl InMemoryCacheBackend {
    /// Create a backend holding at most `max_entries` entries.
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_room(&self, state: &mut State, now: DateTime<Utc>) {
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.expires_at > now);
        if state.entries.len() < self.max_entries {
            debug!(swept = before - state.entries.len(), "swept expired cache entries");
            return;
        }

        let evict = (self.max_entries / 10).max(1);
        let mut by_age: Vec<(u64, String)> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.inserted, key.clone()))
            .collect();
        by_age.sort_unstable();
        for (_, key) in by_age.into_iter().take(evict) {
            state.entries.remove(&key);
        }
        debug!(evicted = evict, "evicted oldest cache entries");
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheBackendError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        match state.entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheBackendError> {
        let now = self.clock.utc();
        let lifetime = TimeDelta::from_std(ttl)
            .map_err(|error| CacheBackendError::serialization(error.to_string()))?;
        let mut state = self.lock();
        if !state.entries.contains_key(key) && state.entries.len() >= self.max_entries {
            self.make_room(&mut state, now);
        }
        let inserted = state.next_sequence;
        state.next_sequence = state.next_sequence.wrapping_add(1);
        state.entries.insert(
            key.to_owned(),
            Entry {
                value: value.clone(),
                expires_at: now
                    .checked_add_signed(lifetime)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                inserted,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheBackendError> {
        Ok(self.lock().entries.remove(key).is_some())
    }

    fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheBackendError> {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - state.entries.len())
    }

    fn clear(&self) -> Result<(), CacheBackendError> {
        self.lock().entries.clear();
        Ok(())
    }

    fn size(&self) -> Result<usize, CacheBackendError> {
        Ok(self.lock().entries.len())
    }
}

#[cfg(test)]
mod tests {
    //! Expiry, eviction and prefix invalidation for the in-process backend.

    use super::*;
    use crate::test_support::MutableClock;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
                .single()
                .expect("valid instant"),
        ))
    }

    fn backend(clock: &Arc<MutableClock>, capacity: usize) -> InMemoryCacheBackend {
        let shared: Arc<dyn Clock> = clock.clone();
        InMemoryCacheBackend::new(capacity, shared)
    }

    #[rstest]
    fn entries_expire_after_ttl(clock: Arc<MutableClock>) {
        let cache = backend(&clock, 10);
        cache.set("dashboard_stats", &json!({"rows": 1}), TTL).expect("set");

        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get("dashboard_stats").expect("get"), Some(json!({"rows": 1})));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("dashboard_stats").expect("get"), None);
        assert_eq!(cache.size().expect("size"), 0);
    }

    #[rstest]
    fn full_cache_sweeps_expired_before_evicting(clock: Arc<MutableClock>) {
        let cache = backend(&clock, 3);
        cache.set("old", &json!(1), Duration::from_secs(10)).expect("set");
        cache.set("a", &json!(2), TTL).expect("set");
        cache.set("b", &json!(3), TTL).expect("set");
        clock.advance(Duration::from_secs(11));

        cache.set("c", &json!(4), TTL).expect("set");

        assert_eq!(cache.size().expect("size"), 3);
        assert!(cache.get("a").expect("get").is_some());
        assert!(cache.get("b").expect("get").is_some());
    }

    #[rstest]
    fn full_cache_evicts_oldest_entries(clock: Arc<MutableClock>) {
        let cache = backend(&clock, 20);
        for index in 0..20 {
            cache.set(&format!("k{index}"), &json!(index), TTL).expect("set");
        }

        cache.set("fresh", &json!("x"), TTL).expect("set");

        assert_eq!(cache.size().expect("size"), 19);
        assert_eq!(cache.get("k0").expect("get"), None);
        assert_eq!(cache.get("k1").expect("get"), None);
        assert!(cache.get("k2").expect("get").is_some());
        assert!(cache.get("fresh").expect("get").is_some());
    }

    #[rstest]
    fn overwriting_a_key_does_not_evict(clock: Arc<MutableClock>) {
        let cache = backend(&clock, 2);
        cache.set("a", &json!(1), TTL).expect("set");
        cache.set("b", &json!(2), TTL).expect("set");
        cache.set("a", &json!(3), TTL).expect("set");
        assert_eq!(cache.get("b").expect("get"), Some(json!(2)));
        assert_eq!(cache.get("a").expect("get"), Some(json!(3)));
    }

    #[rstest]
    fn prefix_invalidation_respects_separator(clock: Arc<MutableClock>) {
        let cache = backend(&clock, 10);
        for key in ["stats_table:1:aa", "stats_table:1:bb", "stats_table:10:cc", "total_count_1"] {
            cache.set(key, &json!(0), TTL).expect("set");
        }

        let removed = cache.invalidate_prefix("stats_table:1:").expect("invalidate");

        assert_eq!(removed, 2);
        assert!(cache.get("stats_table:10:cc").expect("get").is_some());
        assert!(cache.delete("total_count_1").expect("delete"));
        assert!(!cache.delete("total_count_1").expect("delete"));
    }
}
