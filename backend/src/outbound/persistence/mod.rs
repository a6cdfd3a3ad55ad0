//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! This module provides concrete implementations of the domain ports backed
//! by PostgreSQL via Diesel with `r2d2` connection pooling.
//!
//! # Architecture
//!
//! The persistence layer follows these principles:
//!
//! - **Thin adapters**: Store implementations only translate between rows and
//!   domain types. Merge and roll-up rules stay in the domain.
//! - **Internal models**: Diesel row structs (`models.rs`) and the registry
//!   table definitions (`schema.rs`) are never exposed to the domain layer.
//! - **Rendered SQL**: Dynamic tables are reached through `sql_query` with
//!   statements from `sql.rs`; identifiers are validated and quoted, values
//!   are always bound.
//! - **Strongly typed errors**: All database errors are mapped to the port
//!   error of the adapter that raised them.
//!
//! # Example
//!
//! ```no_run
//! use tallyhouse::outbound::persistence::{DbPool, DieselSchemaRegistry, PoolConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/mydb"))?;
//! pool.run_migrations()?;
//! let registry = DieselSchemaRegistry::new(pool);
//! # let _ = registry;
//! # Ok(())
//! # }
//! ```

pub(crate) mod diesel_helpers;
mod diesel_catalog_inspector;
mod diesel_record_store;
mod diesel_schema_registry;
mod diesel_summary_store;
mod models;
mod payload;
mod pool;
mod schema;
mod sql;

pub use diesel_catalog_inspector::DieselCatalogInspector;
pub use diesel_record_store::DieselRecordStore;
pub use diesel_schema_registry::DieselSchemaRegistry;
pub use diesel_summary_store::DieselSummaryStore;
pub use pool::{DbPool, MIGRATIONS, PoolConfig, PoolError};
