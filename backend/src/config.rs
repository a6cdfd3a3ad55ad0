//! Engine configuration loaded via OrthoConfig.
//!
//! Values come from `TALLYHOUSE_*` environment variables, configuration files
//! and CLI arguments, in OrthoConfig's usual precedence. Tunables carry
//! defaults so an empty environment still loads; connection URLs stay
//! optional.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::cache::{CacheTtls, DASHBOARD_TTL, DEFAULT_TTL};
use crate::outbound::cache::{CacheSettings, DEFAULT_MAX_ENTRIES, DEFAULT_NAMESPACE};
use crate::outbound::persistence::PoolConfig;

/// Variable consulted when no engine-specific database URL is configured.
pub const DATABASE_URL_FALLBACK: &str = "DATABASE_URL";

/// Configuration for the engine's database pool and cache.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "TALLYHOUSE")]
pub struct EngineSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Maximum pooled connections.
    #[ortho_config(default = 10)]
    pub db_max_connections: u32,
    /// Seconds to wait for a pooled connection.
    #[ortho_config(default = 30)]
    pub db_connect_timeout_secs: u64,
    /// Redis URL; the in-process cache is used when absent or unreachable.
    pub redis_url: Option<String>,
    /// Prefix applied to every Redis key.
    pub cache_namespace: Option<String>,
    /// Milliseconds allowed for the startup Redis probe and each command.
    #[ortho_config(default = 5_000)]
    pub cache_probe_timeout_ms: u64,
    /// Capacity of the in-process cache.
    pub cache_max_entries: Option<usize>,
    /// Lifetime of cached statistics, in seconds.
    pub cache_ttl_secs: Option<u64>,
    /// Lifetime of dashboard aggregates, in seconds.
    pub dashboard_ttl_secs: Option<u64>,
}

impl EngineSettings {
    /// Configured database URL, falling back to `DATABASE_URL`.
    pub fn database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var(DATABASE_URL_FALLBACK).ok())
            .filter(|url| !url.trim().is_empty())
    }

    /// Maximum pooled connections.
    pub fn db_max_connections(&self) -> u32 {
        self.db_max_connections.max(1)
    }

    /// Pool checkout timeout.
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connect_timeout_secs)
    }

    /// Prefix applied to every Redis key.
    pub fn cache_namespace(&self) -> &str {
        self.cache_namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Redis probe and command timeout.
    pub fn cache_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_probe_timeout_ms)
    }

    /// Capacity of the in-process cache.
    pub fn cache_max_entries(&self) -> usize {
        self.cache_max_entries.unwrap_or(DEFAULT_MAX_ENTRIES)
    }

    /// Lifetimes applied by the read services.
    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            default: self
                .cache_ttl_secs
                .map_or(DEFAULT_TTL, Duration::from_secs),
            dashboard: self
                .dashboard_ttl_secs
                .map_or(DASHBOARD_TTL, Duration::from_secs),
        }
    }

    /// Settings for cache backend selection.
    pub fn to_cache_settings(&self) -> CacheSettings {
        CacheSettings {
            redis_url: self.redis_url.clone().filter(|url| !url.trim().is_empty()),
            namespace: self.cache_namespace().to_owned(),
            probe_timeout: self.cache_probe_timeout(),
            max_entries: self.cache_max_entries(),
        }
    }

    /// Pool configuration, or `None` when no database URL is configured.
    pub fn to_pool_config(&self) -> Option<PoolConfig> {
        self.database_url().map(|url| {
            PoolConfig::new(url)
                .with_max_size(self.db_max_connections())
                .with_connection_timeout(self.db_connect_timeout())
        })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for engine configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARIABLES: [&str; 10] = [
        "TALLYHOUSE_DATABASE_URL",
        "TALLYHOUSE_DB_MAX_CONNECTIONS",
        "TALLYHOUSE_DB_CONNECT_TIMEOUT_SECS",
        "TALLYHOUSE_REDIS_URL",
        "TALLYHOUSE_CACHE_NAMESPACE",
        "TALLYHOUSE_CACHE_PROBE_TIMEOUT_MS",
        "TALLYHOUSE_CACHE_MAX_ENTRIES",
        "TALLYHOUSE_CACHE_TTL_SECS",
        "TALLYHOUSE_DASHBOARD_TTL_SECS",
        DATABASE_URL_FALLBACK,
    ];

    fn load_from_empty_args() -> EngineSettings {
        EngineSettings::load_from_iter([OsString::from("tallyhouse")])
            .expect("config should load")
    }

    fn cleared_except(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        VARIABLES
            .iter()
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_owned());
                (*name, value)
            })
            .collect()
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env(cleared_except(&[]));

        let settings = load_from_empty_args();
        assert_eq!(settings.database_url(), None);
        assert!(settings.to_pool_config().is_none());
        assert_eq!(settings.db_max_connections(), 10);
        assert_eq!(settings.db_connect_timeout(), Duration::from_secs(30));
        assert_eq!(settings.cache_namespace(), DEFAULT_NAMESPACE);
        assert_eq!(settings.cache_probe_timeout(), Duration::from_secs(5));
        assert_eq!(settings.cache_ttls(), CacheTtls::default());
        assert!(settings.to_cache_settings().redis_url.is_none());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(cleared_except(&[
            ("TALLYHOUSE_DATABASE_URL", "postgres://localhost/tally"),
            ("TALLYHOUSE_DB_MAX_CONNECTIONS", "4"),
            ("TALLYHOUSE_REDIS_URL", "redis://cache:6379/0"),
            ("TALLYHOUSE_CACHE_NAMESPACE", "stats:"),
            ("TALLYHOUSE_CACHE_TTL_SECS", "30"),
            ("TALLYHOUSE_DASHBOARD_TTL_SECS", "90"),
        ]));

        let settings = load_from_empty_args();
        assert_eq!(
            settings.database_url().as_deref(),
            Some("postgres://localhost/tally")
        );
        assert_eq!(settings.db_max_connections(), 4);
        let cache = settings.to_cache_settings();
        assert_eq!(cache.redis_url.as_deref(), Some("redis://cache:6379/0"));
        assert_eq!(cache.namespace, "stats:");
        assert_eq!(
            settings.cache_ttls(),
            CacheTtls {
                default: Duration::from_secs(30),
                dashboard: Duration::from_secs(90),
            }
        );
    }

    #[rstest]
    fn database_url_falls_back_to_the_conventional_variable() {
        let _guard = lock_env(cleared_except(&[(
            DATABASE_URL_FALLBACK,
            "postgres://localhost/fallback",
        )]));

        let settings = load_from_empty_args();
        assert_eq!(
            settings.database_url().as_deref(),
            Some("postgres://localhost/fallback")
        );
        let pool = settings.to_pool_config().expect("pool config");
        assert_eq!(pool.redacted_url(), "postgres://localhost/fallback");
    }
}
