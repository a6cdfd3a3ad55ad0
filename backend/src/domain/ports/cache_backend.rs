//! Port interface for key/value cache backends.
use std::time::Duration;

use serde_json::Value;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by a cache backend.
    pub enum CacheBackendError {
        /// Backend is unreachable or timing out.
        Backend { message: String } => "cache backend failure: {message}",
        /// Stored payload could not be encoded or decoded.
        Serialization { message: String } => "cache serialisation failed: {message}",
    }
}

/// Key/value store with per-entry expiry.
///
/// Callers treat every error as a miss or a no-op, so implementations should
/// fail fast rather than retry.
#[cfg_attr(test, mockall::automock)]
pub trait CacheBackend: Send + Sync {
    /// Stable backend label reported in statistics.
    fn name(&self) -> &'static str;

    /// Read a live entry.
    fn get(&self, key: &str) -> Result<Option<Value>, CacheBackendError>;

    /// Store an entry that expires after `ttl`.
    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheBackendError>;

    /// Remove one entry, reporting whether it existed.
    fn delete(&self, key: &str) -> Result<bool, CacheBackendError>;

    /// Remove every entry whose key starts with `prefix`; returns the count.
    fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheBackendError>;

    /// Remove every entry owned by this cache.
    fn clear(&self) -> Result<(), CacheBackendError>;

    /// Number of entries currently held.
    fn size(&self) -> Result<usize, CacheBackendError>;
}
