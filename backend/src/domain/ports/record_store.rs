//! Port abstraction for rows of dynamic tables.
//!
//! Merge rules live in the domain; adapters supply the read-then-write
//! sequence. [`RecordStore::write_keyed`] must hold whatever lock or
//! transaction makes that sequence atomic for a given (sub-unit, date).

use std::collections::BTreeMap;

use crate::domain::record::{RecordId, RecordKey, RecordWrite, StoredRecord, WriteOutcome};
use crate::domain::schema::SchemaDefinition;

use super::define_port_error;

define_port_error! {
    /// Errors raised by record store adapters.
    pub enum RecordStoreError {
        /// Connection to the backing datastore failed.
        Connection { message: String } =>
            "record store connection failed: {message}",
        /// Statement execution failed; the write was rolled back.
        Query { message: String } =>
            "record store query failed: {message}",
        /// A stored row could not be mapped back into the domain.
        Decode { message: String } =>
            "record store row decode failed: {message}",
    }
}

/// Per-column sums across a whole table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTotals {
    /// Sum of each summable column.
    pub sums: BTreeMap<String, i64>,
    /// Sum of the `total` column.
    pub grand_total: i64,
}

/// Planner invoked with the current row for a key, if any.
pub type KeyedPlan<'a> = dyn Fn(Option<&StoredRecord>) -> RecordWrite + 'a;

/// Planner invoked with the current row for an id.
pub type RowPlan<'a> = dyn Fn(&StoredRecord) -> RecordWrite + 'a;

/// Row access for dynamic tables.
pub trait RecordStore: Send + Sync {
    /// Read the row for `key`, plan the write and apply it atomically.
    ///
    /// Inserts when `plan` saw no row, updates otherwise.
    fn write_keyed(
        &self,
        schema: &SchemaDefinition,
        key: RecordKey,
        plan: &KeyedPlan<'_>,
    ) -> Result<WriteOutcome, RecordStoreError>;

    /// Insert a new row without looking for an existing one.
    fn insert(
        &self,
        schema: &SchemaDefinition,
        key: RecordKey,
        write: &RecordWrite,
    ) -> Result<RecordId, RecordStoreError>;

    /// Read-modify-write a row by id. Returns `None` when the id is unknown.
    fn rewrite(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
        plan: &RowPlan<'_>,
    ) -> Result<Option<WriteOutcome>, RecordStoreError>;

    /// Read a row by id.
    fn find(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<Option<StoredRecord>, RecordStoreError>;

    /// Delete a row by id, returning its key when it existed.
    fn delete(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<Option<RecordKey>, RecordStoreError>;

    /// Number of rows in the table.
    fn count(&self, schema: &SchemaDefinition) -> Result<u64, RecordStoreError>;

    /// Sums of every summable column plus the grand total.
    fn column_totals(&self, schema: &SchemaDefinition) -> Result<ColumnTotals, RecordStoreError>;

    /// Recompute `total` for every row from the summable columns.
    ///
    /// Returns the number of rows touched.
    fn recalculate_totals(&self, schema: &SchemaDefinition) -> Result<u64, RecordStoreError>;
}
