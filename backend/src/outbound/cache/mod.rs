//! Cache backends implementing the [`CacheBackend`] port.
//!
//! The backend is chosen once at startup by [`select_backend`]: Redis when a
//! URL is configured and the server answers a probe within the timeout,
//! otherwise the in-process map.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tracing::{info, warn};

use crate::domain::ports::CacheBackend;

pub use memory::{DEFAULT_MAX_ENTRIES, InMemoryCacheBackend};
pub use redis::{DEFAULT_NAMESPACE, RedisCacheBackend};

/// Inputs for backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub redis_url: Option<String>,
    pub namespace: String,
    pub probe_timeout: Duration,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            probe_timeout: Duration::from_secs(5),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Pick the cache backend for this process.
///
/// Never fails: any problem reaching Redis falls back to the in-process
/// backend and is logged.
pub fn select_backend(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Arc<dyn CacheBackend> {
    if let Some(url) = settings.redis_url.as_deref() {
        match RedisCacheBackend::connect(url, settings.namespace.clone(), settings.probe_timeout) {
            Ok(backend) => return Arc::new(backend),
            Err(error) => {
                warn!(error = %error, "redis unavailable; using in-process cache");
            }
        }
    }
    info!(max_entries = settings.max_entries, "using in-process cache");
    Arc::new(InMemoryCacheBackend::new(settings.max_entries, clock))
}
