//! Shared PostgreSQL pool and the registry migrations.
//!
//! Every adapter checks a blocking `PgConnection` out of one r2d2 pool.
//! Checkouts wait at most the configured timeout and are validated with a
//! test query first, so a dead server surfaces as [`PoolError::Checkout`]
//! rather than as a failed statement.

use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

use crate::domain::ports::define_port_error;

/// Registry migrations compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Pooled PostgreSQL connection.
pub type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// Idle connections kept warm between bursts of admin traffic.
const MIN_IDLE: u32 = 1;

define_port_error! {
    /// Failures of the pool itself, before any statement runs.
    pub enum PoolError {
        /// No connection became available within the timeout.
        Checkout { message: String } => "failed to get connection from pool: {message}",
        /// The pool could not be constructed from its configuration.
        Build { message: String } => "failed to build connection pool: {message}",
        /// Embedded migrations did not apply.
        Migration { message: String } => "failed to run migrations: {message}",
    }
}

/// Connection settings for [`DbPool`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tallyhouse::outbound::persistence::PoolConfig;
///
/// let config = PoolConfig::new("postgres://tally:secret@db/tallyhouse")
///     .with_max_size(4)
///     .with_connection_timeout(Duration::from_secs(5));
/// assert_eq!(config.redacted_url(), "postgres://tally:***@db/tallyhouse");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    database_url: String,
    max_size: u32,
    connection_timeout: Duration,
}

impl PoolConfig {
    /// Ten connections and a 30 second checkout timeout.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_size: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Cap the pool size; zero is raised to one.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// The URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.database_url.split_once("://") else {
            return self.database_url.clone();
        };
        let Some((credentials, host)) = rest.split_once('@') else {
            return self.database_url.clone();
        };
        match credentials.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.database_url.clone(),
        }
    }
}

/// Blocking connection pool shared by the Diesel adapters.
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<ConnectionManager<PgConnection>>,
}

impl DbPool {
    /// Build the pool and open its first connection.
    ///
    /// # Errors
    ///
    /// [`PoolError::Build`] when the URL is unusable or the server refuses
    /// the initial connection.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let url = config.redacted_url();
        let manager = ConnectionManager::<PgConnection>::new(config.database_url);
        let inner = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(MIN_IDLE.min(config.max_size)))
            .connection_timeout(config.connection_timeout)
            .test_on_check_out(true)
            .build(manager)
            .map_err(|err| PoolError::build(err.to_string()))?;
        info!(url = %url, max_size = config.max_size, "database pool ready");
        Ok(Self { inner })
    }

    /// Check out a connection.
    ///
    /// # Errors
    ///
    /// [`PoolError::Checkout`] when none frees up within the timeout.
    pub fn get(&self) -> Result<PgPooled, PoolError> {
        self.inner
            .get()
            .map_err(|err| PoolError::checkout(err.to_string()))
    }

    /// Apply pending registry migrations, returning how many ran.
    pub fn run_migrations(&self) -> Result<usize, PoolError> {
        let mut conn = self.get()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| PoolError::migration(err.to_string()))?;
        info!(applied = applied.len(), "applied registry migrations");
        Ok(applied.len())
    }
}
