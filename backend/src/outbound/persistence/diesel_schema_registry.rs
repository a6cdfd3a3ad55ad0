//! PostgreSQL-backed `SchemaRegistry` implementation using Diesel ORM.
//!
//! Registry rows and the physical table are written in one transaction, so a
//! failed `CREATE TABLE` leaves no registration behind and a failed insert
//! leaves no orphan table. The foreign key to the sub-unit table is attempted
//! inside a savepoint; when it cannot be added the table is kept without it.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_query;
use tracing::{debug, info, warn};

use crate::domain::identifier::SqlIdentifier;
use crate::domain::ports::{SchemaRegistry, SchemaRegistryError};
use crate::domain::schema::{
    ColumnDefinition, ColumnType, SchemaDefinition, SchemaDraft, SchemaId, SchemaUpdate,
};

use super::diesel_helpers::{
    is_connection_error, is_unique_violation, map_diesel_error_message, map_pool_error_message,
};
use super::models::{
    ColumnDefinitionRow, NewColumnDefinitionRow, NewTableDefinitionRow, TableDefinitionRow,
    TableDefinitionUpdate,
};
use super::pool::{DbPool, PgPooled, PoolError};
use super::schema::{column_definitions, table_definitions};
use super::sql;

/// Diesel-backed implementation of the `SchemaRegistry` port.
#[derive(Clone)]
pub struct DieselSchemaRegistry {
    pool: DbPool,
}

impl DieselSchemaRegistry {
    /// Create a new registry with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(&self) -> Result<PgPooled, SchemaRegistryError> {
        self.pool.get().map_err(map_pool_error)
    }
}

/// Failure inside a registry transaction.
#[derive(Debug)]
enum RegistryTxError {
    Diesel(diesel::result::Error),
    Ddl {
        table: String,
        source: diesel::result::Error,
    },
    Decode(String),
}

impl From<diesel::result::Error> for RegistryTxError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

fn map_pool_error(error: PoolError) -> SchemaRegistryError {
    SchemaRegistryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error, draft_name: Option<&str>) -> SchemaRegistryError {
    if is_unique_violation(&error) {
        if let Some(name) = draft_name {
            return SchemaRegistryError::duplicate(name);
        }
    }
    let message = map_diesel_error_message(&error, "schema registry");
    if is_connection_error(&error) {
        SchemaRegistryError::connection(message)
    } else {
        SchemaRegistryError::query(message)
    }
}

fn map_tx_error(error: RegistryTxError, draft_name: Option<&str>) -> SchemaRegistryError {
    match error {
        RegistryTxError::Diesel(source) => map_diesel_error(source, draft_name),
        RegistryTxError::Ddl { table, source } => {
            let message = map_diesel_error_message(&source, "registry ddl");
            SchemaRegistryError::ddl(table, message)
        }
        RegistryTxError::Decode(message) => SchemaRegistryError::query(message),
    }
}

/// Convert stored rows into a domain definition.
fn to_definition(
    table: TableDefinitionRow,
    mut columns: Vec<ColumnDefinitionRow>,
) -> Result<SchemaDefinition, RegistryTxError> {
    let name = SqlIdentifier::new(&table.name).map_err(|error| {
        RegistryTxError::Decode(format!("stored table name `{}`: {error}", table.name))
    })?;
    columns.sort_by_key(|column| (column.display_order, column.id));
    let columns = columns
        .into_iter()
        .map(|column| {
            let name = SqlIdentifier::new(&column.name).map_err(|error| {
                RegistryTxError::Decode(format!("stored column name `{}`: {error}", column.name))
            })?;
            let column_type = column.data_type.parse::<ColumnType>().unwrap_or_else(|_| {
                warn!(
                    column = %name,
                    data_type = %column.data_type,
                    "unrecognised registry data_type, classifying by name"
                );
                ColumnType::classify(&column.data_type)
            });
            Ok(ColumnDefinition {
                name,
                display_name: column.display_name,
                column_type,
                is_required: column.is_required,
                is_summable: column.is_summable,
                order: column.display_order,
            })
        })
        .collect::<Result<Vec<_>, RegistryTxError>>()?;
    Ok(SchemaDefinition {
        id: SchemaId::new(table.id),
        name,
        display_name: table.display_name,
        description: table.description,
        is_default: table.is_default,
        columns,
    })
}

fn load_columns(
    conn: &mut PgConnection,
    table: &TableDefinitionRow,
) -> Result<Vec<ColumnDefinitionRow>, diesel::result::Error> {
    ColumnDefinitionRow::belonging_to(table)
        .select(ColumnDefinitionRow::as_select())
        .load(conn)
}

fn find_row(
    conn: &mut PgConnection,
    id: i32,
) -> Result<Option<TableDefinitionRow>, diesel::result::Error> {
    table_definitions::table
        .find(id)
        .select(TableDefinitionRow::as_select())
        .first(conn)
        .optional()
}

fn demote_defaults(conn: &mut PgConnection) -> Result<usize, diesel::result::Error> {
    diesel::update(table_definitions::table.filter(table_definitions::is_default.eq(true)))
        .set(table_definitions::is_default.eq(false))
        .execute(conn)
}

/// Insert the registry rows for `draft` and return the stored definition.
fn insert_registration(
    conn: &mut PgConnection,
    draft: &SchemaDraft,
) -> Result<SchemaDefinition, RegistryTxError> {
    if draft.is_default {
        demote_defaults(conn)?;
    }
    let table: TableDefinitionRow = diesel::insert_into(table_definitions::table)
        .values(NewTableDefinitionRow {
            name: draft.name.as_str(),
            display_name: &draft.display_name,
            description: draft.description.as_deref(),
            is_default: draft.is_default,
        })
        .returning(TableDefinitionRow::as_returning())
        .get_result(conn)?;

    let new_columns: Vec<NewColumnDefinitionRow<'_>> = draft
        .columns
        .iter()
        .map(|column| NewColumnDefinitionRow {
            table_id: table.id,
            name: column.name.as_str(),
            display_name: &column.display_name,
            data_type: column.column_type.as_str(),
            is_required: column.is_required,
            is_summable: column.is_summable,
            display_order: column.order,
        })
        .collect();
    let columns: Vec<ColumnDefinitionRow> = diesel::insert_into(column_definitions::table)
        .values(&new_columns)
        .returning(ColumnDefinitionRow::as_returning())
        .get_results(conn)?;

    to_definition(table, columns)
}

fn run_ddl(conn: &mut PgConnection, table: &SqlIdentifier, statement: &str) -> Result<(), RegistryTxError> {
    debug!(table = %table, statement, "running registry ddl");
    sql_query(statement)
        .execute(conn)
        .map(drop)
        .map_err(|source| RegistryTxError::Ddl {
            table: table.to_string(),
            source,
        })
}

fn add_foreign_key(conn: &mut PgConnection, table: &SqlIdentifier) {
    let statement = sql::sub_unit_foreign_key(table);
    let outcome = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        sql_query(statement.as_str()).execute(conn).map(drop)
    });
    if let Err(error) = outcome {
        warn!(
            table = %table,
            error = %error,
            "could not add sub-unit foreign key; table kept without it"
        );
    }
}

impl SchemaRegistry for DieselSchemaRegistry {
    fn list(&self) -> Result<Vec<SchemaDefinition>, SchemaRegistryError> {
        let mut conn = self.connection()?;
        let tables: Vec<TableDefinitionRow> = table_definitions::table
            .order(table_definitions::id.asc())
            .select(TableDefinitionRow::as_select())
            .load(&mut conn)
            .map_err(|error| map_diesel_error(error, None))?;
        let columns: Vec<ColumnDefinitionRow> = ColumnDefinitionRow::belonging_to(&tables)
            .select(ColumnDefinitionRow::as_select())
            .load(&mut conn)
            .map_err(|error| map_diesel_error(error, None))?;

        columns
            .grouped_by(&tables)
            .into_iter()
            .zip(tables)
            .map(|(columns, table)| to_definition(table, columns))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| map_tx_error(error, None))
    }

    fn find_by_id(&self, id: SchemaId) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, RegistryTxError, _>(|conn| {
            let Some(table) = find_row(conn, id.get())? else {
                return Ok(None);
            };
            let columns = load_columns(conn, &table)?;
            to_definition(table, columns).map(Some)
        })
        .map_err(|error| map_tx_error(error, None))
    }

    fn find_by_name(&self, name: &str) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, RegistryTxError, _>(|conn| {
            let table = table_definitions::table
                .filter(table_definitions::name.eq(name))
                .select(TableDefinitionRow::as_select())
                .first(conn)
                .optional()?;
            let Some(table) = table else {
                return Ok(None);
            };
            let columns = load_columns(conn, &table)?;
            to_definition(table, columns).map(Some)
        })
        .map_err(|error| map_tx_error(error, None))
    }

    fn create_with_table(
        &self,
        draft: &SchemaDraft,
    ) -> Result<SchemaDefinition, SchemaRegistryError> {
        let mut conn = self.connection()?;
        let created = conn
            .transaction::<_, RegistryTxError, _>(|conn| {
                let definition = insert_registration(conn, draft)?;
                run_ddl(conn, &draft.name, &sql::create_table(&draft.name, &draft.columns))?;
                for statement in sql::table_indexes(&draft.name) {
                    run_ddl(conn, &draft.name, &statement)?;
                }
                add_foreign_key(conn, &draft.name);
                Ok(definition)
            })
            .map_err(|error| map_tx_error(error, Some(draft.name.as_str())))?;
        info!(table = %created.name, id = %created.id, "created physical table");
        Ok(created)
    }

    fn register_metadata(
        &self,
        draft: &SchemaDraft,
    ) -> Result<SchemaDefinition, SchemaRegistryError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, RegistryTxError, _>(|conn| insert_registration(conn, draft))
            .map_err(|error| map_tx_error(error, Some(draft.name.as_str())))
    }

    fn update(
        &self,
        id: SchemaId,
        update: &SchemaUpdate,
    ) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, RegistryTxError, _>(|conn| {
            if find_row(conn, id.get())?.is_none() {
                return Ok(None);
            }
            if update.make_default {
                demote_defaults(conn)?;
            }
            let changes = TableDefinitionUpdate {
                display_name: update.display_name.as_deref(),
                description: update.description.as_ref().map(Option::as_deref),
                is_default: update.make_default.then_some(true),
                updated_at: Utc::now(),
            };
            let table: TableDefinitionRow = diesel::update(table_definitions::table.find(id.get()))
                .set(&changes)
                .returning(TableDefinitionRow::as_returning())
                .get_result(conn)?;
            let columns = load_columns(conn, &table)?;
            to_definition(table, columns).map(Some)
        })
        .map_err(|error| map_tx_error(error, None))
    }

    fn delete_with_table(
        &self,
        id: SchemaId,
    ) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, RegistryTxError, _>(|conn| {
            let Some(table) = find_row(conn, id.get())? else {
                return Ok(None);
            };
            let columns = load_columns(conn, &table)?;
            let definition = to_definition(table, columns)?;
            diesel::delete(table_definitions::table.find(id.get())).execute(conn)?;
            run_ddl(conn, &definition.name, &sql::drop_table(&definition.name))?;
            Ok(Some(definition))
        })
        .map_err(|error| map_tx_error(error, None))
    }
}

#[cfg(test)]
mod tests {
    //! Row-to-domain conversion; statements are covered in `sql.rs`.

    use super::*;
    use rstest::rstest;

    fn table_row(name: &str) -> TableDefinitionRow {
        TableDefinitionRow {
            id: 3,
            name: name.to_owned(),
            display_name: "Surat".to_owned(),
            description: None,
            is_default: true,
        }
    }

    fn column_row(id: i32, name: &str, data_type: &str, order: i32) -> ColumnDefinitionRow {
        ColumnDefinitionRow {
            id,
            table_id: 3,
            name: name.to_owned(),
            display_name: name.to_owned(),
            data_type: data_type.to_owned(),
            is_required: false,
            is_summable: true,
            display_order: order,
        }
    }

    #[rstest]
    fn columns_are_ordered_by_display_order() {
        let definition = to_definition(
            table_row("surat"),
            vec![
                column_row(1, "kedua", "integer", 1),
                column_row(2, "pertama", "text", 0),
            ],
        )
        .expect("converts");

        let names: Vec<_> = definition
            .columns
            .iter()
            .map(|column| column.name.as_str())
            .collect();
        assert_eq!(names, ["pertama", "kedua"]);
        assert_eq!(definition.columns[0].column_type, ColumnType::Text);
    }

    #[rstest]
    fn unknown_types_fall_back_to_classification() {
        let definition = to_definition(
            table_row("surat"),
            vec![column_row(1, "jumlah", "bigint", 0)],
        )
        .expect("converts");

        assert_eq!(definition.columns[0].column_type, ColumnType::Integer);
    }

    #[rstest]
    fn corrupt_names_are_reported() {
        let outcome = to_definition(table_row("bad name"), Vec::new());
        assert!(matches!(outcome, Err(RegistryTxError::Decode(_))));
    }

    #[rstest]
    fn ddl_failures_keep_the_table_name() {
        let error = map_tx_error(
            RegistryTxError::Ddl {
                table: "surat".to_owned(),
                source: diesel::result::Error::NotFound,
            },
            Some("surat"),
        );
        assert!(matches!(error, SchemaRegistryError::Ddl { table, .. } if table == "surat"));
    }
}
