//! Port abstraction for the schema registry and its physical tables.
//!
//! Registry metadata and the physical table are created and dropped together:
//! an adapter must leave neither a registered schema without a table nor a
//! table whose registration was rolled back.

use crate::domain::schema::{SchemaDefinition, SchemaDraft, SchemaId, SchemaUpdate};

use super::define_port_error;

define_port_error! {
    /// Errors raised by schema registry adapters.
    pub enum SchemaRegistryError {
        /// Connection to the backing datastore failed.
        Connection { message: String } =>
            "schema registry connection failed: {message}",
        /// A registry query failed.
        Query { message: String } =>
            "schema registry query failed: {message}",
        /// The schema name is already registered.
        Duplicate { name: String } =>
            "schema `{name}` is already registered",
        /// Creating or dropping the physical table failed; nothing was kept.
        Ddl { table: String, message: String } =>
            "DDL for table `{table}` failed: {message}",
    }
}

/// Durable store of schema definitions.
#[cfg_attr(test, mockall::automock)]
pub trait SchemaRegistry: Send + Sync {
    /// All registered schemas ordered by id.
    fn list(&self) -> Result<Vec<SchemaDefinition>, SchemaRegistryError>;

    /// Look up a schema by id.
    fn find_by_id(&self, id: SchemaId) -> Result<Option<SchemaDefinition>, SchemaRegistryError>;

    /// Look up a schema by its physical table name.
    fn find_by_name(&self, name: &str) -> Result<Option<SchemaDefinition>, SchemaRegistryError>;

    /// Register the draft and create its physical table atomically.
    ///
    /// When the draft is the default, any previous default is demoted in the
    /// same transaction.
    fn create_with_table(&self, draft: &SchemaDraft)
    -> Result<SchemaDefinition, SchemaRegistryError>;

    /// Register metadata for a table that already exists; issues no DDL.
    fn register_metadata(&self, draft: &SchemaDraft)
    -> Result<SchemaDefinition, SchemaRegistryError>;

    /// Apply metadata changes. Returns `None` when the id is unknown.
    fn update(
        &self,
        id: SchemaId,
        update: &SchemaUpdate,
    ) -> Result<Option<SchemaDefinition>, SchemaRegistryError>;

    /// Drop the physical table and remove the registration.
    ///
    /// Returns the removed definition, or `None` when the id is unknown.
    fn delete_with_table(
        &self,
        id: SchemaId,
    ) -> Result<Option<SchemaDefinition>, SchemaRegistryError>;
}
