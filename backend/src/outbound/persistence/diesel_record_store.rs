//! PostgreSQL-backed `RecordStore` implementation using Diesel ORM.
//!
//! Dynamic tables have no compile-time schema, so every statement is rendered
//! by `sql.rs` and run through a boxed `sql_query` with one bind per value.
//! Keyed writes serialise on a transaction-scoped advisory lock named after
//! the table and key; two concurrent writers for the same (sub-unit, date)
//! therefore see each other's result instead of both inserting.

use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Date, Integer, Nullable, Text};
use tracing::debug;

use crate::domain::ports::{ColumnTotals, KeyedPlan, RecordStore, RecordStoreError, RowPlan};
use crate::domain::record::{
    CellValue, ColumnAssignment, RecordId, RecordKey, RecordWrite, StoredRecord, SubUnitId,
    WriteAction, WriteOutcome,
};
use crate::domain::schema::{ColumnType, SchemaDefinition};

use super::diesel_helpers::{map_diesel_error, map_pool_error_message};
use super::models::{CountRow, DeletedKeyRow, InsertedIdRow, PayloadRow};
use super::payload::{PayloadError, decode_record, decode_totals};
use super::pool::{DbPool, PgPooled};
use super::sql;

type BoundQuery<'f> = BoxedSqlQuery<'f, Pg, SqlQuery>;

/// Diesel-backed implementation of the `RecordStore` port.
#[derive(Clone)]
pub struct DieselRecordStore {
    pool: DbPool,
}

impl DieselRecordStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(&self) -> Result<PgPooled, RecordStoreError> {
        self.pool
            .get()
            .map_err(|error| RecordStoreError::connection(map_pool_error_message(error)))
    }
}

/// Failure inside a record transaction.
#[derive(Debug)]
enum StoreTxError {
    Diesel(diesel::result::Error),
    Payload(PayloadError),
}

impl From<diesel::result::Error> for StoreTxError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

impl From<PayloadError> for StoreTxError {
    fn from(error: PayloadError) -> Self {
        Self::Payload(error)
    }
}

fn map_error(error: diesel::result::Error, operation: &str) -> RecordStoreError {
    map_diesel_error(
        error,
        operation,
        RecordStoreError::connection,
        RecordStoreError::query,
    )
}

fn map_tx_error(error: StoreTxError, operation: &str) -> RecordStoreError {
    match error {
        StoreTxError::Diesel(source) => map_error(source, operation),
        StoreTxError::Payload(source) => RecordStoreError::decode(source.to_string()),
    }
}

/// Bind a cell with the SQL type of its declared column.
fn bind_cell<'f>(query: BoundQuery<'f>, assignment: &ColumnAssignment) -> BoundQuery<'f> {
    match assignment.column_type {
        ColumnType::Integer => query.bind::<Nullable<BigInt>, _>(assignment.value.as_integer()),
        ColumnType::Text => {
            let text = match &assignment.value {
                CellValue::Text(text) => Some(text.clone()),
                _ => None,
            };
            query.bind::<Nullable<Text>, _>(text)
        }
        ColumnType::Date => {
            let date = match assignment.value {
                CellValue::Date(date) => Some(date),
                _ => None,
            };
            query.bind::<Nullable<Date>, _>(date)
        }
    }
}

fn bind_assignments<'f>(mut query: BoundQuery<'f>, write: &RecordWrite) -> BoundQuery<'f> {
    for assignment in &write.assignments {
        query = bind_cell(query, assignment);
    }
    query.bind::<BigInt, _>(write.total)
}

fn lock_key(schema: &SchemaDefinition, key: RecordKey) -> String {
    format!("{}:{}:{}", schema.name, key.sub_unit, key.date)
}

fn select_by_key(
    conn: &mut PgConnection,
    schema: &SchemaDefinition,
    key: RecordKey,
) -> Result<Option<StoredRecord>, StoreTxError> {
    let row = sql_query(sql::select_row_by_key(&schema.name))
        .bind::<Integer, _>(key.sub_unit.get())
        .bind::<Date, _>(key.date)
        .get_result::<PayloadRow>(conn)
        .optional()?;
    row.map(|row| decode_record(schema, &row.payload))
        .transpose()
        .map_err(StoreTxError::from)
}

fn select_by_id(
    conn: &mut PgConnection,
    schema: &SchemaDefinition,
    id: RecordId,
    lock: bool,
) -> Result<Option<StoredRecord>, StoreTxError> {
    let row = sql_query(sql::select_row_by_id(&schema.name, lock))
        .bind::<BigInt, _>(id.get())
        .get_result::<PayloadRow>(conn)
        .optional()?;
    row.map(|row| decode_record(schema, &row.payload))
        .transpose()
        .map_err(StoreTxError::from)
}

fn insert_row(
    conn: &mut PgConnection,
    schema: &SchemaDefinition,
    key: RecordKey,
    write: &RecordWrite,
) -> Result<RecordId, diesel::result::Error> {
    let query = sql_query(sql::insert_row(&schema.name, &write.assignments))
        .into_boxed::<Pg>()
        .bind::<Integer, _>(key.sub_unit.get())
        .bind::<Date, _>(key.date);
    let inserted: InsertedIdRow = bind_assignments(query, write).get_result(conn)?;
    Ok(RecordId::new(inserted.id))
}

fn update_row(
    conn: &mut PgConnection,
    schema: &SchemaDefinition,
    id: RecordId,
    write: &RecordWrite,
) -> Result<(), diesel::result::Error> {
    let query = sql_query(sql::update_row(&schema.name, &write.assignments))
        .into_boxed::<Pg>()
        .bind::<BigInt, _>(id.get());
    bind_assignments(query, write).execute(conn).map(drop)
}

impl RecordStore for DieselRecordStore {
    fn write_keyed(
        &self,
        schema: &SchemaDefinition,
        key: RecordKey,
        plan: &KeyedPlan<'_>,
    ) -> Result<WriteOutcome, RecordStoreError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, StoreTxError, _>(|conn| {
            sql_query(sql::ADVISORY_LOCK)
                .bind::<Text, _>(lock_key(schema, key))
                .execute(conn)?;
            let current = select_by_key(conn, schema, key)?;
            let write = plan(current.as_ref());
            let (action, id) = match current {
                Some(existing) => {
                    update_row(conn, schema, existing.id, &write)?;
                    (WriteAction::Updated, existing.id)
                }
                None => (WriteAction::Inserted, insert_row(conn, schema, key, &write)?),
            };
            debug!(table = %schema.name, %id, ?action, total = write.total, "keyed write applied");
            Ok(WriteOutcome {
                action,
                id,
                key,
                total: write.total,
            })
        })
        .map_err(|error| map_tx_error(error, "keyed write"))
    }

    fn insert(
        &self,
        schema: &SchemaDefinition,
        key: RecordKey,
        write: &RecordWrite,
    ) -> Result<RecordId, RecordStoreError> {
        let mut conn = self.connection()?;
        insert_row(&mut conn, schema, key, write).map_err(|error| map_error(error, "insert row"))
    }

    fn rewrite(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
        plan: &RowPlan<'_>,
    ) -> Result<Option<WriteOutcome>, RecordStoreError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, StoreTxError, _>(|conn| {
            let Some(current) = select_by_id(conn, schema, id, true)? else {
                return Ok(None);
            };
            let write = plan(&current);
            update_row(conn, schema, id, &write)?;
            Ok(Some(WriteOutcome {
                action: WriteAction::Updated,
                id,
                key: current.key,
                total: write.total,
            }))
        })
        .map_err(|error| map_tx_error(error, "rewrite row"))
    }

    fn find(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<Option<StoredRecord>, RecordStoreError> {
        let mut conn = self.connection()?;
        select_by_id(&mut conn, schema, id, false).map_err(|error| map_tx_error(error, "find row"))
    }

    fn delete(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<Option<RecordKey>, RecordStoreError> {
        let mut conn = self.connection()?;
        let deleted = sql_query(sql::delete_row(&schema.name))
            .bind::<BigInt, _>(id.get())
            .get_result::<DeletedKeyRow>(&mut conn)
            .optional()
            .map_err(|error| map_error(error, "delete row"))?;
        Ok(deleted.map(|row| RecordKey::new(SubUnitId::new(row.unit_kerja_id), row.tanggal)))
    }

    fn count(&self, schema: &SchemaDefinition) -> Result<u64, RecordStoreError> {
        let mut conn = self.connection()?;
        let row: CountRow = sql_query(sql::count_rows(&schema.name))
            .get_result(&mut conn)
            .map_err(|error| map_error(error, "count rows"))?;
        u64::try_from(row.count)
            .map_err(|_| RecordStoreError::decode(format!("negative row count {}", row.count)))
    }

    fn column_totals(&self, schema: &SchemaDefinition) -> Result<ColumnTotals, RecordStoreError> {
        let mut conn = self.connection()?;
        let statement = sql::column_totals(
            &schema.name,
            schema.summable_columns().map(|column| &column.name),
        );
        let row: PayloadRow = sql_query(statement)
            .get_result(&mut conn)
            .map_err(|error| map_error(error, "column totals"))?;
        decode_totals(schema, &row.payload)
            .map_err(|error| RecordStoreError::decode(error.to_string()))
    }

    fn recalculate_totals(&self, schema: &SchemaDefinition) -> Result<u64, RecordStoreError> {
        let mut conn = self.connection()?;
        let statement = sql::recalculate_totals(
            &schema.name,
            schema.summable_columns().map(|column| &column.name),
        );
        let touched = sql_query(statement)
            .execute(&mut conn)
            .map_err(|error| map_error(error, "recalculate totals"))?;
        Ok(touched as u64)
    }
}
