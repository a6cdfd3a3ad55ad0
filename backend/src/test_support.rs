//! Test utilities for the engine crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is compiled for unit tests and when
//! the `test-support` feature is enabled.

mod clock;
mod memory_database;

use std::sync::Arc;

use mockable::Clock;

pub use clock::MutableClock;
pub use memory_database::InMemoryDatabase;

use crate::domain::cache::{CacheService, CacheTtls};
use crate::engine::Engine;
use crate::outbound::cache::{DEFAULT_MAX_ENTRIES, InMemoryCacheBackend};

/// Engine wired entirely against in-memory adapters.
pub type MemoryEngine =
    Engine<InMemoryDatabase, InMemoryDatabase, InMemoryDatabase, InMemoryDatabase>;

/// Build an engine over `database` with an in-memory cache driven by `clock`.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use mockable::DefaultClock;
/// use tallyhouse::test_support::{memory_engine, InMemoryDatabase};
///
/// let database = Arc::new(InMemoryDatabase::new());
/// let engine = memory_engine(&database, Arc::new(DefaultClock));
/// assert!(engine.schemas().list_schemas()?.is_empty());
/// # Ok::<(), tallyhouse::domain::SchemaError>(())
/// ```
pub fn memory_engine(database: &Arc<InMemoryDatabase>, clock: Arc<dyn Clock>) -> MemoryEngine {
    let backend = Arc::new(InMemoryCacheBackend::new(DEFAULT_MAX_ENTRIES, clock));
    let cache = Arc::new(CacheService::with_ttls(backend, CacheTtls::default()));
    Engine::new(
        Arc::clone(database),
        Arc::clone(database),
        Arc::clone(database),
        Arc::clone(database),
        cache,
    )
}
