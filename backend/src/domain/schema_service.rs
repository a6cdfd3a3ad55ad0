//! Schema lifecycle: create, register, inspect, update and delete.
//!
//! Validation happens here, before any adapter is asked to run DDL. The
//! registry adapter then creates metadata and the physical table in one
//! transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::cache::CacheService;
use super::identifier::{InvalidName, assert_identifier, is_reserved_column};
use super::ports::{CatalogError, CatalogInspector, SchemaRegistry, SchemaRegistryError};
use super::schema::{
    ColumnDefinition, SYSTEM_TABLES, SchemaDefinition, SchemaDraft, SchemaId, SchemaSpec,
    SchemaUpdate, SchemaValidationError, display_name_for,
};
use super::summary::SUMMARY_SUFFIX;

/// Failures of schema lifecycle operations.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Invalid(#[from] SchemaValidationError),
    #[error("invalid table name: {0}")]
    InvalidName(#[from] InvalidName),
    #[error("schema `{name}` is already registered")]
    Duplicate { name: String },
    #[error("table `{name}` is reserved for internal use")]
    SystemTable { name: String },
    #[error("schema {id} not found")]
    NotFound { id: SchemaId },
    #[error("table `{name}` does not exist")]
    TableNotFound { name: String },
    #[error("table `{table}` could not be created: {message}")]
    Create { table: String, message: String },
    #[error(transparent)]
    Registry(SchemaRegistryError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<SchemaRegistryError> for SchemaError {
    fn from(error: SchemaRegistryError) -> Self {
        match error {
            SchemaRegistryError::Duplicate { name } => Self::Duplicate { name },
            SchemaRegistryError::Ddl { table, message } => Self::Create { table, message },
            other => Self::Registry(other),
        }
    }
}

/// Schema registry service.
#[derive(Clone)]
pub struct SchemaService<G, C> {
    registry: Arc<G>,
    catalog: Arc<C>,
    cache: Arc<CacheService>,
}

impl<G, C> SchemaService<G, C> {
    /// Create a new service over the given ports.
    pub fn new(registry: Arc<G>, catalog: Arc<C>, cache: Arc<CacheService>) -> Self {
        Self {
            registry,
            catalog,
            cache,
        }
    }
}

impl<G, C> SchemaService<G, C>
where
    G: SchemaRegistry,
    C: CatalogInspector,
{
    /// Validate `spec`, register it and create its physical table.
    ///
    /// The first schema ever registered becomes the default.
    pub fn create_schema(&self, spec: &SchemaSpec) -> Result<SchemaDefinition, SchemaError> {
        let mut draft = SchemaDraft::from_spec(spec, false)?;
        Self::reject_system_table(draft.name.as_str())?;

        let existing = self.registry.list()?;
        if existing.iter().any(|schema| schema.name == draft.name) {
            return Err(SchemaError::Duplicate {
                name: draft.name.into(),
            });
        }
        draft.is_default = existing.is_empty();

        let created = self.registry.create_with_table(&draft)?;
        info!(
            schema = %created.name,
            id = %created.id,
            columns = created.columns.len(),
            is_default = created.is_default,
            "created dynamic schema"
        );
        Ok(created)
    }

    /// Register a table that already exists in the database.
    ///
    /// Columns come from the live catalog; the reserved physical columns are
    /// skipped. No DDL is issued.
    pub fn register_existing(
        &self,
        table: &str,
        display_name: &str,
        description: Option<String>,
    ) -> Result<SchemaDefinition, SchemaError> {
        let name = assert_identifier(table)?;
        Self::reject_system_table(name.as_str())?;

        let existing = self.registry.list()?;
        if existing.iter().any(|schema| schema.name == name) {
            return Err(SchemaError::Duplicate { name: name.into() });
        }

        let catalog_columns = self.catalog.table_columns(name.as_str())?;
        if catalog_columns.is_empty() {
            return Err(SchemaError::TableNotFound { name: name.into() });
        }

        let columns = catalog_columns
            .iter()
            .filter(|column| !is_reserved_column(&column.name))
            .zip(0_i32..)
            .map(|(column, order)| ColumnDefinition::from_catalog(column, order))
            .collect::<Result<Vec<_>, _>>()?;

        let display_name = if display_name.trim().is_empty() {
            display_name_for(name.as_str())
        } else {
            display_name.trim().to_owned()
        };
        let draft = SchemaDraft {
            name,
            display_name,
            description,
            is_default: existing.is_empty(),
            columns,
        };

        let registered = self.registry.register_metadata(&draft)?;
        info!(
            schema = %registered.name,
            id = %registered.id,
            columns = registered.columns.len(),
            "registered existing table"
        );
        Ok(registered)
    }

    /// Tables that could be registered: everything in the catalog except
    /// system tables, summary tables and tables already registered.
    pub fn candidate_tables(&self) -> Result<Vec<String>, SchemaError> {
        let registered: BTreeSet<String> = self
            .registry
            .list()?
            .into_iter()
            .map(|schema| schema.name.into())
            .collect();
        let tables = self.catalog.list_tables()?;
        Ok(tables
            .into_iter()
            .filter(|table| !SYSTEM_TABLES.contains(&table.as_str()))
            .filter(|table| !table.ends_with(SUMMARY_SUFFIX))
            .filter(|table| !registered.contains(table))
            .collect())
    }

    /// All registered schemas.
    pub fn list_schemas(&self) -> Result<Vec<SchemaDefinition>, SchemaError> {
        Ok(self.registry.list()?)
    }

    /// Resolve a schema by id.
    pub fn get_schema(&self, id: SchemaId) -> Result<SchemaDefinition, SchemaError> {
        self.registry
            .find_by_id(id)?
            .ok_or(SchemaError::NotFound { id })
    }

    /// The flagged default schema, else the first registered one.
    pub fn default_schema(&self) -> Result<Option<SchemaDefinition>, SchemaError> {
        let schemas = self.registry.list()?;
        let flagged = schemas.iter().position(|schema| schema.is_default);
        Ok(schemas.into_iter().nth(flagged.unwrap_or(0)))
    }

    /// Change display metadata or promote the schema to default.
    pub fn update_schema(
        &self,
        id: SchemaId,
        update: &SchemaUpdate,
    ) -> Result<SchemaDefinition, SchemaError> {
        let updated = self
            .registry
            .update(id, update)?
            .ok_or(SchemaError::NotFound { id })?;
        if update.make_default {
            info!(schema = %updated.name, id = %id, "schema promoted to default");
        }
        Ok(updated)
    }

    /// Drop the physical table and forget the schema.
    ///
    /// Cached reads for the schema are invalidated. Summary tables are not
    /// touched here; see [`Engine::delete_schema`](crate::engine::Engine::delete_schema).
    pub fn delete_schema(&self, id: SchemaId) -> Result<SchemaDefinition, SchemaError> {
        let removed = self
            .registry
            .delete_with_table(id)?
            .ok_or(SchemaError::NotFound { id })?;
        self.cache.invalidate_schema_data(id);
        info!(schema = %removed.name, id = %id, "deleted dynamic schema");
        Ok(removed)
    }

    fn reject_system_table(name: &str) -> Result<(), SchemaError> {
        if SYSTEM_TABLES.contains(&name) || name.ends_with(SUMMARY_SUFFIX) {
            return Err(SchemaError::SystemTable {
                name: name.to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "schema_service_tests.rs"]
mod tests;
