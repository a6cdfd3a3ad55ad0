//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. They exist solely to satisfy Diesel's
//! type requirements for queries and mutations.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Date, Integer, Jsonb, Text};

use super::schema::{column_definitions, table_definitions};

// ---------------------------------------------------------------------------
// Registry models
// ---------------------------------------------------------------------------

/// Row struct for reading from the table_definitions table.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = table_definitions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TableDefinitionRow {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub is_default: bool,
}

/// Insertable struct for registering a table.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = table_definitions)]
pub(crate) struct NewTableDefinitionRow<'a> {
    pub name: &'a str,
    pub display_name: &'a str,
    pub description: Option<&'a str>,
    pub is_default: bool,
}

/// Changeset for metadata updates; `None` fields are left untouched.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = table_definitions)]
pub(crate) struct TableDefinitionUpdate<'a> {
    pub display_name: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub is_default: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

/// Row struct for reading from the column_definitions table.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = column_definitions)]
#[diesel(belongs_to(TableDefinitionRow, foreign_key = table_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ColumnDefinitionRow {
    pub id: i32,
    pub table_id: i32,
    pub name: String,
    pub display_name: String,
    pub data_type: String,
    pub is_required: bool,
    pub is_summable: bool,
    pub display_order: i32,
}

/// Insertable struct for declaring a column.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = column_definitions)]
pub(crate) struct NewColumnDefinitionRow<'a> {
    pub table_id: i32,
    pub name: &'a str,
    pub display_name: &'a str,
    pub data_type: &'a str,
    pub is_required: bool,
    pub is_summable: bool,
    pub display_order: i32,
}

// ---------------------------------------------------------------------------
// Raw query rows
// ---------------------------------------------------------------------------

/// A whole row rendered by `to_jsonb`.
#[derive(Debug, QueryableByName)]
pub(crate) struct PayloadRow {
    #[diesel(sql_type = Jsonb)]
    pub payload: serde_json::Value,
}

/// Identifier returned by an insert.
#[derive(Debug, QueryableByName)]
pub(crate) struct InsertedIdRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
}

/// Result of `COUNT(*)`.
#[derive(Debug, QueryableByName)]
pub(crate) struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

/// Key columns returned by a delete.
#[derive(Debug, QueryableByName)]
pub(crate) struct DeletedKeyRow {
    #[diesel(sql_type = Integer)]
    pub unit_kerja_id: i32,
    #[diesel(sql_type = Date)]
    pub tanggal: NaiveDate,
}

/// Base table name from the information schema.
#[derive(Debug, QueryableByName)]
pub(crate) struct TableNameRow {
    #[diesel(sql_type = Text)]
    pub table_name: String,
}

/// Column description from the information schema.
#[derive(Debug, QueryableByName)]
pub(crate) struct CatalogColumnRow {
    #[diesel(sql_type = Text)]
    pub column_name: String,
    #[diesel(sql_type = Text)]
    pub data_type: String,
    #[diesel(sql_type = Bool)]
    pub is_nullable: bool,
}
