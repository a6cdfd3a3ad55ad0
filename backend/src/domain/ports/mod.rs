//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod cache_backend;
mod cache_key;
mod catalog_inspector;
mod record_store;
mod schema_registry;
mod summary_refresh;
mod summary_store;

#[cfg(test)]
pub use cache_backend::MockCacheBackend;
pub use cache_backend::{CacheBackend, CacheBackendError};
pub use cache_key::{CacheKey, CacheKeyValidationError};
#[cfg(test)]
pub use catalog_inspector::MockCatalogInspector;
pub use catalog_inspector::{CatalogColumn, CatalogError, CatalogInspector};
pub use record_store::{ColumnTotals, KeyedPlan, RecordStore, RecordStoreError, RowPlan};
#[cfg(test)]
pub use schema_registry::MockSchemaRegistry;
pub use schema_registry::{SchemaRegistry, SchemaRegistryError};
#[cfg(test)]
pub use summary_refresh::MockSummaryRefresh;
pub use summary_refresh::SummaryRefresh;
#[cfg(test)]
pub use summary_store::MockSummaryStore;
pub use summary_store::{SummaryStore, SummaryStoreError};
