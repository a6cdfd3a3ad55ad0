//! Port abstraction for reading the live database catalog.

use serde::{Deserialize, Serialize};

use super::define_port_error;

define_port_error! {
    /// Errors raised while introspecting the catalog.
    pub enum CatalogError {
        /// Connection to the backing datastore failed.
        Connection { message: String } =>
            "catalog connection failed: {message}",
        /// Introspection query failed.
        Query { message: String } =>
            "catalog query failed: {message}",
    }
}

/// A column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    /// Catalog type name, e.g. `integer` or `character varying`.
    pub data_type: String,
    pub is_nullable: bool,
}

/// Read-only view of the tables and columns in the working schema.
#[cfg_attr(test, mockall::automock)]
pub trait CatalogInspector: Send + Sync {
    /// Names of all base tables, sorted.
    fn list_tables(&self) -> Result<Vec<String>, CatalogError>;

    /// Columns of `table` in ordinal order; empty when the table is absent.
    fn table_columns(&self, table: &str) -> Result<Vec<CatalogColumn>, CatalogError>;
}
