//! Redis cache backend.
//!
//! Uses the blocking client re-exported by `bb8-redis`, pooled with the same
//! r2d2 machinery Diesel uses for PostgreSQL. Every key is stored under a
//! fixed namespace and every value as JSON text. Errors surface for the
//! caller to treat as a miss; after a failed checkout the backend stops
//! dialling for [`RECONNECT_BACKOFF`] so an outage costs one timeout rather
//! than one per request.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use bb8_redis::redis::{self, Client, Connection, ConnectionLike, RedisError};
use diesel::r2d2::{ManageConnection, Pool, PooledConnection};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::ports::{CacheBackend, CacheBackendError};

/// Namespace applied to every key unless configured otherwise.
pub const DEFAULT_NAMESPACE: &str = "tallyhouse:";

/// Quiet period after a failed checkout.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

const SCAN_BATCH: usize = 500;
const POOL_SIZE: u32 = 8;

/// r2d2 manager opening timed blocking Redis connections.
#[derive(Debug, Clone)]
struct RedisConnectionManager {
    client: Client,
    timeout: Duration,
}

impl ManageConnection for RedisConnectionManager {
    type Connection = Connection;
    type Error = RedisError;

    fn connect(&self) -> Result<Connection, RedisError> {
        let connection = self.client.get_connection_with_timeout(self.timeout)?;
        connection.set_read_timeout(Some(self.timeout))?;
        connection.set_write_timeout(Some(self.timeout))?;
        Ok(connection)
    }

    fn is_valid(&self, connection: &mut Connection) -> Result<(), RedisError> {
        redis::cmd("PING").query::<String>(connection).map(drop)
    }

    fn has_broken(&self, connection: &mut Connection) -> bool {
        !connection.is_open()
    }
}

/// Whether a failure recorded at `last_failure` still suppresses dialling.
fn backing_off(last_failure: Option<Instant>, now: Instant) -> bool {
    last_failure.is_some_and(|failed| now.saturating_duration_since(failed) < RECONNECT_BACKOFF)
}

/// Redis-backed cache.
pub struct RedisCacheBackend {
    pool: Pool<RedisConnectionManager>,
    last_failure: Mutex<Option<Instant>>,
    namespace: String,
}

impl RedisCacheBackend {
    /// Connect and verify the server answers `PING` within `timeout`.
    ///
    /// `timeout` bounds connecting, each command and each pool checkout.
    pub fn connect(
        url: &str,
        namespace: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CacheBackendError> {
        let client = Client::open(url).map_err(backend_error)?;
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .min_idle(Some(1))
            .connection_timeout(timeout)
            .test_on_check_out(false)
            .build(RedisConnectionManager { client, timeout })
            .map_err(|error| CacheBackendError::backend(error.to_string()))?;
        let mut connection = pool
            .get()
            .map_err(|error| CacheBackendError::backend(error.to_string()))?;
        redis::cmd("PING")
            .query::<String>(&mut *connection)
            .map_err(backend_error)?;
        let namespace = namespace.into();
        info!(namespace = %namespace, pool_size = POOL_SIZE, "connected to redis cache");
        Ok(Self {
            pool,
            last_failure: Mutex::new(None),
            namespace,
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    fn checkout(&self) -> Result<PooledConnection<RedisConnectionManager>, CacheBackendError> {
        let mut last_failure = self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if backing_off(*last_failure, Instant::now()) {
            return Err(CacheBackendError::backend(
                "redis unavailable; backing off before reconnecting",
            ));
        }
        *last_failure = None;
        drop(last_failure);

        self.pool.get().map_err(|error| {
            warn!(
                error = %error,
                backoff_secs = RECONNECT_BACKOFF.as_secs(),
                "redis checkout failed"
            );
            *self
                .last_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            CacheBackendError::backend(error.to_string())
        })
    }

    fn with_connection<T>(
        &self,
        operation: &'static str,
        run: impl FnOnce(&mut Connection) -> Result<T, RedisError>,
    ) -> Result<T, CacheBackendError> {
        let mut connection = self.checkout()?;
        run(&mut *connection).map_err(|error| {
            warn!(operation, error = %error, "redis command failed");
            backend_error(error)
        })
    }

    fn scan_keys(connection: &mut Connection, pattern: &str) -> Result<Vec<String>, RedisError> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query(connection)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    fn delete_matching(&self, prefix: &str) -> Result<usize, CacheBackendError> {
        let pattern = format!("{}*", escape_glob(&self.namespaced(prefix)));
        self.with_connection("invalidate_prefix", |connection| {
            let keys = Self::scan_keys(connection, &pattern)?;
            let mut removed = 0_usize;
            for chunk in keys.chunks(SCAN_BATCH) {
                let mut command = redis::cmd("DEL");
                for key in chunk {
                    command.arg(key.as_str());
                }
                let count: usize = command.query(connection)?;
                removed += count;
            }
            Ok(removed)
        })
    }
}

fn backend_error(error: RedisError) -> CacheBackendError {
    CacheBackendError::backend(error.to_string())
}

/// Escape Redis glob metacharacters so a prefix matches literally.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheBackendError> {
        let key = self.namespaced(key);
        let payload: Option<String> = self.with_connection("get", |connection| {
            redis::cmd("GET").arg(key.as_str()).query(connection)
        })?;
        payload
            .map(|text| {
                serde_json::from_str(&text)
                    .map_err(|error| CacheBackendError::serialization(error.to_string()))
            })
            .transpose()
    }

    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheBackendError> {
        let key = self.namespaced(key);
        let payload = serde_json::to_string(value)
            .map_err(|error| CacheBackendError::serialization(error.to_string()))?;
        // SETEX rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        self.with_connection("set", |connection| {
            redis::cmd("SETEX")
                .arg(key.as_str())
                .arg(seconds)
                .arg(payload.as_str())
                .query::<()>(connection)
        })
    }

    fn delete(&self, key: &str) -> Result<bool, CacheBackendError> {
        let key = self.namespaced(key);
        let removed: usize = self.with_connection("delete", |connection| {
            redis::cmd("DEL").arg(key.as_str()).query(connection)
        })?;
        Ok(removed > 0)
    }

    fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheBackendError> {
        self.delete_matching(prefix)
    }

    fn clear(&self) -> Result<(), CacheBackendError> {
        self.delete_matching("").map(|_| ())
    }

    fn size(&self) -> Result<usize, CacheBackendError> {
        let pattern = format!("{}*", escape_glob(&self.namespace));
        self.with_connection("size", |connection| {
            Self::scan_keys(connection, &pattern).map(|keys| keys.len())
        })
    }
}
