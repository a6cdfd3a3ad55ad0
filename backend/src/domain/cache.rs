//! Cache façade shared by the read services.
//!
//! [`CacheService`] wraps whichever [`CacheBackend`] was selected at startup,
//! counts hits and misses, and turns every backend failure into a miss or a
//! no-op. It also owns the key namespace that writes invalidate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::ports::{CacheBackend, CacheKey};
use super::schema::SchemaId;

/// Prefix of per-schema statistics entries.
pub const STATS_TABLE_PREFIX: &str = "stats_table";
/// Exact key of the cross-schema dashboard aggregate.
pub const DASHBOARD_STATS_KEY: &str = "dashboard_stats";
/// Prefix shared by every dashboard-panel entry.
pub const GRAFANA_PREFIX: &str = "grafana";
/// Prefix of monthly totals entries; nested under [`GRAFANA_PREFIX`].
pub const MONTHLY_TOTALS_PREFIX: &str = "grafana_monthly";

/// Default lifetime of cached reads.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Lifetime of slow dashboard aggregates.
pub const DASHBOARD_TTL: Duration = Duration::from_secs(600);

/// Statistics prefix for one schema, without the trailing separator.
pub fn statistics_prefix(schema: SchemaId) -> String {
    format!("{STATS_TABLE_PREFIX}:{schema}")
}

/// Exact key of a schema's cached row count.
pub fn row_count_key(schema: SchemaId) -> String {
    format!("total_count_{schema}")
}

/// Lifetimes applied by the read services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub default: Duration,
    pub dashboard: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            default: DEFAULT_TTL,
            dashboard: DASHBOARD_TTL,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups served from the cache.
    pub hit_rate: f64,
}

/// Backend-agnostic cache with hit/miss accounting.
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    ttls: CacheTtls,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheService {
    /// Wrap a backend with the default lifetimes.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_ttls(backend, CacheTtls::default())
    }

    /// Wrap a backend with explicit lifetimes.
    pub fn with_ttls(backend: Arc<dyn CacheBackend>, ttls: CacheTtls) -> Self {
        Self {
            backend,
            ttls,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Configured lifetimes.
    pub const fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    /// Read an entry; backend failures count as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.backend.get(key) {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(error) => {
                warn!(
                    key,
                    error_kind = error.kind(),
                    error = %error,
                    "cache read failed; treating as miss"
                );
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an entry; backend failures are logged and dropped.
    pub fn set(&self, key: &str, value: &Value, ttl: Duration) {
        if let Err(error) = self.backend.set(key, value, ttl) {
            warn!(key, error_kind = error.kind(), error = %error, "cache write failed");
        }
    }

    /// Remove one entry.
    pub fn delete(&self, key: &str) -> bool {
        self.backend.delete(key).unwrap_or_else(|error| {
            warn!(key, error_kind = error.kind(), error = %error, "cache delete failed");
            false
        })
    }

    /// Remove every entry under `prefix`, returning how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.backend.invalidate_prefix(prefix).unwrap_or_else(|error| {
            warn!(
                prefix,
                error_kind = error.kind(),
                error = %error,
                "cache prefix invalidation failed"
            );
            0
        })
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Err(error) = self.backend.clear() {
            warn!(error_kind = error.kind(), error = %error, "cache clear failed");
        }
    }

    /// Snapshot of backend, size and hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits.saturating_add(misses);
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (hits as f64) * 100.0 / (lookups as f64)
        };
        CacheStats {
            backend: self.backend.name(),
            size: self.backend.size().unwrap_or_else(|error| {
                warn!(error_kind = error.kind(), error = %error, "cache size probe failed");
                0
            }),
            hits,
            misses,
            hit_rate,
        }
    }

    /// Serve `key` from the cache or compute, store and return it.
    ///
    /// Entries that no longer decode as `T` are treated as misses. Loader
    /// errors are returned and nothing is cached.
    pub fn get_or_load<T, E, F>(&self, key: &CacheKey, ttl: Duration, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(cached) = self.get(key.as_str()) {
            match serde_json::from_value(cached) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    debug!(key = %key, error = %error, "discarding undecodable cache entry");
                }
            }
        }

        let fresh = load()?;
        match serde_json::to_value(&fresh) {
            Ok(encoded) => self.set(key.as_str(), &encoded, ttl),
            Err(error) => warn!(key = %key, error = %error, "cache payload did not serialise"),
        }
        Ok(fresh)
    }

    /// Invalidate everything a data mutation in `schema` can make stale.
    ///
    /// Covers the schema's statistics entries and row count, the dashboard
    /// aggregate and every dashboard-panel entry. Other schemas' statistics
    /// are left alone.
    pub fn invalidate_schema_data(&self, schema: SchemaId) -> usize {
        let mut removed = self.invalidate_prefix(&format!("{}:", statistics_prefix(schema)));
        removed += usize::from(self.delete(&row_count_key(schema)));
        removed += usize::from(self.delete(DASHBOARD_STATS_KEY));
        removed += self.invalidate_prefix(GRAFANA_PREFIX);
        debug!(schema = %schema, removed, "invalidated cached reads");
        removed
    }
}

#[cfg(test)]
mod tests {
    //! Degradation and accounting behaviour of the cache façade.

    use super::*;
    use crate::domain::ports::{CacheBackendError, MockCacheBackend};
    use mockall::predicate::eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn backend_failures_read_as_misses() {
        let mut backend = MockCacheBackend::new();
        backend
            .expect_get()
            .times(1)
            .return_once(|_| Err(CacheBackendError::backend("connection reset")));
        backend.expect_name().return_const("redis");
        backend.expect_size().return_once(|| Ok(0));
        let cache = CacheService::new(Arc::new(backend));

        assert_eq!(cache.get("dashboard_stats"), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 1));
    }

    #[rstest]
    fn get_or_load_populates_on_miss_and_skips_loader_on_hit() {
        let mut backend = MockCacheBackend::new();
        let mut sequence = mockall::Sequence::new();
        backend
            .expect_get()
            .times(1)
            .in_sequence(&mut sequence)
            .return_once(|_| Ok(None));
        backend
            .expect_set()
            .withf(|_, value, ttl| value == &json!(41) && *ttl == DEFAULT_TTL)
            .times(1)
            .in_sequence(&mut sequence)
            .return_once(|_, _, _| Ok(()));
        backend
            .expect_get()
            .times(1)
            .in_sequence(&mut sequence)
            .return_once(|_| Ok(Some(json!(41))));
        let cache = CacheService::new(Arc::new(backend));
        let key = CacheKey::new("total_count_1").expect("valid key");

        let first: Result<i64, ()> = cache.get_or_load(&key, DEFAULT_TTL, || Ok(41));
        let second: Result<i64, ()> =
            cache.get_or_load(&key, DEFAULT_TTL, || panic!("loader must not run on a hit"));

        assert_eq!(first, Ok(41));
        assert_eq!(second, Ok(41));
    }

    #[rstest]
    fn loader_errors_are_not_cached() {
        let mut backend = MockCacheBackend::new();
        backend.expect_get().times(1).return_once(|_| Ok(None));
        backend.expect_set().never();
        let cache = CacheService::new(Arc::new(backend));
        let key = CacheKey::new("total_count_1").expect("valid key");

        let result: Result<i64, &str> = cache.get_or_load(&key, DEFAULT_TTL, || Err("boom"));

        assert_eq!(result, Err("boom"));
    }

    #[rstest]
    fn schema_invalidation_targets_only_that_schema() {
        let mut backend = MockCacheBackend::new();
        backend
            .expect_invalidate_prefix()
            .with(eq("stats_table:3:"))
            .times(1)
            .return_once(|_| Ok(2));
        backend
            .expect_delete()
            .with(eq("total_count_3"))
            .times(1)
            .return_once(|_| Ok(true));
        backend
            .expect_delete()
            .with(eq("dashboard_stats"))
            .times(1)
            .return_once(|_| Ok(false));
        backend
            .expect_invalidate_prefix()
            .with(eq("grafana"))
            .times(1)
            .return_once(|_| Err(CacheBackendError::backend("timeout")));
        let cache = CacheService::new(Arc::new(backend));

        assert_eq!(cache.invalidate_schema_data(SchemaId::new(3)), 3);
    }

    #[rstest]
    fn hit_rate_is_a_percentage() {
        let mut backend = MockCacheBackend::new();
        let mut answers = vec![Ok(Some(json!(1))), Ok(None), Ok(Some(json!(2))), Ok(Some(json!(3)))]
            .into_iter();
        backend
            .expect_get()
            .times(4)
            .returning(move |_| answers.next().unwrap_or(Ok(None)));
        backend.expect_name().return_const("memory");
        backend.expect_size().return_once(|| Ok(3));
        let cache = CacheService::new(Arc::new(backend));

        for key in ["a", "b", "c", "d"] {
            let _ = cache.get(key);
        }
        let stats = cache.stats();

        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.size, 3);
        assert!((stats.hit_rate - 75.0).abs() < f64::EPSILON);
    }
}
