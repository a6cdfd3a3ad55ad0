//! `CatalogInspector` over PostgreSQL's `information_schema`.
//!
//! Only the connection's current schema is inspected.

use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::Text;

use crate::domain::ports::{CatalogColumn, CatalogError, CatalogInspector};

use super::diesel_helpers::{map_diesel_error, map_pool_error_message};
use super::models::{CatalogColumnRow, TableNameRow};
use super::pool::{DbPool, PgPooled};

const LIST_TABLES: &str = concat!(
    "SELECT table_name::TEXT AS table_name FROM information_schema.tables ",
    "WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ",
    "ORDER BY table_name"
);

const TABLE_COLUMNS: &str = concat!(
    "SELECT column_name::TEXT AS column_name, data_type::TEXT AS data_type, ",
    "(is_nullable = 'YES') AS is_nullable ",
    "FROM information_schema.columns ",
    "WHERE table_schema = current_schema() AND table_name = $1 ",
    "ORDER BY ordinal_position"
);

/// Diesel-backed implementation of the `CatalogInspector` port.
#[derive(Clone)]
pub struct DieselCatalogInspector {
    pool: DbPool,
}

impl DieselCatalogInspector {
    /// Create a new inspector with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(&self) -> Result<PgPooled, CatalogError> {
        self.pool
            .get()
            .map_err(|error| CatalogError::connection(map_pool_error_message(error)))
    }
}

fn map_error(error: diesel::result::Error) -> CatalogError {
    map_diesel_error(
        error,
        "catalog inspection",
        CatalogError::connection,
        CatalogError::query,
    )
}

impl CatalogInspector for DieselCatalogInspector {
    fn list_tables(&self) -> Result<Vec<String>, CatalogError> {
        let mut conn = self.connection()?;
        let rows: Vec<TableNameRow> = sql_query(LIST_TABLES).load(&mut conn).map_err(map_error)?;
        Ok(rows.into_iter().map(|row| row.table_name).collect())
    }

    fn table_columns(&self, table: &str) -> Result<Vec<CatalogColumn>, CatalogError> {
        let mut conn = self.connection()?;
        let rows: Vec<CatalogColumnRow> = sql_query(TABLE_COLUMNS)
            .bind::<Text, _>(table)
            .load(&mut conn)
            .map_err(map_error)?;
        Ok(rows
            .into_iter()
            .map(|row| CatalogColumn {
                name: row.column_name,
                data_type: row.data_type,
                is_nullable: row.is_nullable,
            })
            .collect())
    }
}
