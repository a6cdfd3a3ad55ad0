//! Record writes: additive upsert, plain insert, edits, deletes and repairs.
//!
//! Every successful mutation invalidates the schema's cached reads and hands
//! the affected (sub-unit, month) to the [`SummaryRefresh`] port.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::cache::CacheService;
use super::ports::{RecordStore, RecordStoreError, SchemaRegistry, SchemaRegistryError, SummaryRefresh};
use super::record::{
    RecordId, RecordKey, RecordValues, StoredRecord, SubUnitId, WriteAction, WriteOutcome,
    plan_insert, plan_merge, plan_overwrite,
};
use super::schema::{SchemaDefinition, SchemaId};
use super::summary::CellAction;

/// Failures of record writes. Nothing is partially written on error.
#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("schema {id} not found")]
    SchemaNotFound { id: SchemaId },
    #[error("record {id} not found")]
    RecordNotFound { id: RecordId },
    #[error(transparent)]
    Registry(#[from] SchemaRegistryError),
    #[error(transparent)]
    Write(#[from] RecordStoreError),
}

/// Result of a write as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub action: WriteAction,
    pub id: RecordId,
    pub total: i64,
    /// What the summary hand-off did.
    pub summary: CellAction,
}

/// Record write service.
#[derive(Clone)]
pub struct RecordService<G, R, M> {
    registry: Arc<G>,
    records: Arc<R>,
    summaries: Arc<M>,
    cache: Arc<CacheService>,
}

impl<G, R, M> RecordService<G, R, M> {
    /// Create a new service over the given ports.
    pub fn new(
        registry: Arc<G>,
        records: Arc<R>,
        summaries: Arc<M>,
        cache: Arc<CacheService>,
    ) -> Self {
        Self {
            registry,
            records,
            summaries,
            cache,
        }
    }
}

impl<G, R, M> RecordService<G, R, M>
where
    G: SchemaRegistry,
    R: RecordStore,
    M: SummaryRefresh,
{
    /// Insert or additively merge the row for (`sub_unit`, `date`).
    ///
    /// Summable integer columns are added to the stored values, other
    /// columns are overwritten when present, and `total` is recomputed.
    pub fn upsert(
        &self,
        schema: &SchemaDefinition,
        sub_unit: SubUnitId,
        date: NaiveDate,
        values: &RecordValues,
    ) -> Result<UpsertOutcome, UpsertError> {
        let key = RecordKey::new(sub_unit, date);
        let planner = |existing: Option<&StoredRecord>| match existing {
            Some(row) => plan_merge(&schema.columns, row, values),
            None => plan_insert(&schema.columns, values),
        };
        let written = self.records.write_keyed(schema, key, &planner)?;
        debug!(
            schema = %schema.name,
            sub_unit = %sub_unit,
            date = %date,
            action = ?written.action,
            "upserted record"
        );
        Ok(self.after_write(schema, written))
    }

    /// [`Self::upsert`] resolving the schema by id first.
    pub fn upsert_by_id(
        &self,
        schema_id: SchemaId,
        sub_unit: SubUnitId,
        date: NaiveDate,
        values: &RecordValues,
    ) -> Result<UpsertOutcome, UpsertError> {
        let schema = self
            .registry
            .find_by_id(schema_id)?
            .ok_or(UpsertError::SchemaNotFound { id: schema_id })?;
        self.upsert(&schema, sub_unit, date, values)
    }

    /// Insert a new row without merging into an existing one.
    pub fn create(
        &self,
        schema: &SchemaDefinition,
        sub_unit: SubUnitId,
        date: NaiveDate,
        values: &RecordValues,
    ) -> Result<UpsertOutcome, UpsertError> {
        let key = RecordKey::new(sub_unit, date);
        let write = plan_insert(&schema.columns, values);
        let id = self.records.insert(schema, key, &write)?;
        Ok(self.after_write(
            schema,
            WriteOutcome {
                action: WriteAction::Inserted,
                id,
                key,
                total: write.total,
            },
        ))
    }

    /// Overwrite the provided columns of one row and recompute its total.
    pub fn update_record(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
        values: &RecordValues,
    ) -> Result<UpsertOutcome, UpsertError> {
        let planner = |existing: &StoredRecord| plan_overwrite(&schema.columns, existing, values);
        let written = self
            .records
            .rewrite(schema, id, &planner)?
            .ok_or(UpsertError::RecordNotFound { id })?;
        Ok(self.after_write(schema, written))
    }

    /// Read one row.
    pub fn get_record(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<StoredRecord, UpsertError> {
        self.records
            .find(schema, id)?
            .ok_or(UpsertError::RecordNotFound { id })
    }

    /// Delete one row and refresh its summary cell.
    pub fn delete_record(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<CellAction, UpsertError> {
        let key = self
            .records
            .delete(schema, id)?
            .ok_or(UpsertError::RecordNotFound { id })?;
        self.cache.invalidate_schema_data(schema.id);
        Ok(self.summaries.refresh_cell(schema, key))
    }

    /// Recompute `total` for every row of the schema.
    ///
    /// Repairs rows written before a column's summable flag changed or by
    /// tools that bypass this service. Summary tables are not touched; run a
    /// rebuild afterwards.
    pub fn recalculate_totals(&self, schema: &SchemaDefinition) -> Result<u64, UpsertError> {
        let rows = self.records.recalculate_totals(schema)?;
        self.cache.invalidate_schema_data(schema.id);
        info!(schema = %schema.name, rows, "recalculated totals");
        Ok(rows)
    }

    fn after_write(&self, schema: &SchemaDefinition, written: WriteOutcome) -> UpsertOutcome {
        self.cache.invalidate_schema_data(schema.id);
        let summary = self.summaries.refresh_cell(schema, written.key);
        UpsertOutcome {
            action: written.action,
            id: written.id,
            total: written.total,
            summary,
        }
    }
}

#[cfg(test)]
#[path = "record_service_tests.rs"]
mod tests;
