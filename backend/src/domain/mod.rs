//! Domain primitives, services and ports.
//!
//! Purpose: Define the strongly typed model of runtime-defined tables and the
//! services that create them, write into them and roll them up. Every name
//! that reaches SQL text is a [`SqlIdentifier`]; every storage concern sits
//! behind a port in [`ports`].
//!
//! Public surface:
//! - SchemaService: create, register, inspect and delete schemas.
//! - RecordService: additive upserts, edits, deletes and total repair.
//! - SummaryMaterializer: monthly summary rebuilds, recomputes and health.
//! - StatisticsService: cached statistics and dashboard reads.
//! - CacheService: backend-agnostic cache with hit/miss accounting.

pub mod cache;
pub mod identifier;
pub mod ports;
pub mod record;
pub mod record_service;
pub mod schema;
pub mod schema_service;
pub mod statistics_service;
pub mod summary;
pub mod summary_service;

pub use self::cache::{CacheService, CacheStats, CacheTtls};
pub use self::identifier::{InvalidName, SqlIdentifier};
pub use self::record::{RecordId, RecordKey, RecordValues, SubUnitId, WriteAction};
pub use self::record_service::{RecordService, UpsertError, UpsertOutcome};
pub use self::schema::{SchemaDefinition, SchemaId, SchemaSpec, SchemaUpdate};
pub use self::schema_service::{SchemaError, SchemaService};
pub use self::statistics_service::{
    DashboardOverview, MonthlyTotals, StatisticsError, StatisticsService, TableStatistics,
};
pub use self::summary::{CellAction, MonthKey, SummaryHealth};
pub use self::summary_service::{MonthlySource, RebuildReport, SummaryError, SummaryMaterializer};
