//! Summary materialization: full rebuilds, per-cell recompute and health.
//!
//! The materializer is the only writer of summary tables. Rebuilds fail
//! loudly; incremental recomputes are best-effort and report a
//! [`CellAction`] instead of an error, leaving drift to be repaired by the
//! next rebuild.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::identifier::SqlIdentifier;
use super::ports::{
    CatalogError, CatalogInspector, SummaryRefresh, SummaryStore, SummaryStoreError,
};
use super::record::{RecordKey, SubUnitId};
use super::schema::SchemaDefinition;
use super::summary::{
    CellAction, MonthKey, SummaryCell, SummaryHealth, SummaryPlan, SummaryPlanError,
    summary_table_name,
};

/// Failures of summary operations.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error(transparent)]
    Plan(#[from] SummaryPlanError),
    #[error(transparent)]
    Store(#[from] SummaryStoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Outcome of a full rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub summary_table: String,
    pub metrics: Vec<String>,
    pub rows_written: u64,
}

/// Where monthly figures were read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthlySource {
    Summary,
    Raw,
}

/// Monthly cells for one year together with their provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyCells {
    pub source: MonthlySource,
    pub metrics: Vec<String>,
    pub cells: Vec<SummaryCell>,
}

/// Builds and maintains monthly summary tables.
#[derive(Clone)]
pub struct SummaryMaterializer<S, C> {
    store: Arc<S>,
    catalog: Arc<C>,
}

impl<S, C> SummaryMaterializer<S, C> {
    /// Create a materializer over the given ports.
    pub fn new(store: Arc<S>, catalog: Arc<C>) -> Self {
        Self { store, catalog }
    }
}

impl<S, C> SummaryMaterializer<S, C>
where
    S: SummaryStore,
    C: CatalogInspector,
{
    /// Name of the schema's summary table.
    pub fn summary_table(&self, schema: &SchemaDefinition) -> Result<SqlIdentifier, SummaryError> {
        summary_table_name(schema).map_err(|error| SummaryPlanError::from(error).into())
    }

    /// Whether the summary table exists, judged by the live catalog.
    pub fn summary_exists(&self, schema: &SchemaDefinition) -> Result<bool, SummaryError> {
        let table = self.summary_table(schema)?;
        Ok(!self.catalog.table_columns(table.as_str())?.is_empty())
    }

    /// Derive the summary plan from the physical table's live columns.
    pub fn plan(&self, schema: &SchemaDefinition) -> Result<SummaryPlan, SummaryError> {
        let columns = self.catalog.table_columns(schema.name.as_str())?;
        Ok(SummaryPlan::from_catalog(schema, &columns)?)
    }

    /// Drop and recreate the summary table from the raw rows.
    ///
    /// Idempotent: rebuilding twice yields identical cells.
    pub fn rebuild(&self, schema: &SchemaDefinition) -> Result<RebuildReport, SummaryError> {
        let plan = self.plan(schema)?;
        let rows_written = self.store.rebuild(&plan)?;
        info!(
            schema = %schema.name,
            summary = %plan.summary,
            metrics = plan.metrics.len(),
            rows_written,
            "rebuilt monthly summary"
        );
        Ok(RebuildReport {
            summary_table: plan.summary.to_string(),
            metrics: plan.metric_names().map(str::to_owned).collect(),
            rows_written,
        })
    }

    /// Recompute the summary cell covering `date` for `sub_unit`.
    ///
    /// Never fails: errors are logged and reported as [`CellAction::Failed`].
    pub fn recompute_cell(
        &self,
        schema: &SchemaDefinition,
        sub_unit: SubUnitId,
        date: NaiveDate,
    ) -> CellAction {
        match self.try_recompute_cell(schema, sub_unit, date) {
            Ok(action) => action,
            Err(error) => {
                warn!(
                    schema = %schema.name,
                    sub_unit = %sub_unit,
                    month = %MonthKey::of(date),
                    error = %error,
                    "summary recompute failed; summary may drift until rebuilt"
                );
                CellAction::Failed
            }
        }
    }

    fn try_recompute_cell(
        &self,
        schema: &SchemaDefinition,
        sub_unit: SubUnitId,
        date: NaiveDate,
    ) -> Result<CellAction, SummaryError> {
        if !self.summary_exists(schema)? {
            return Ok(CellAction::NoSummary);
        }
        let plan = self.plan(schema)?;
        let month = MonthKey::of(date);
        let aggregate = self.store.aggregate_cell(&plan, sub_unit, month)?;

        if aggregate.row_count == 0 {
            let removed = self.store.delete_cell(&plan, sub_unit, month)?;
            return Ok(if removed {
                CellAction::Deleted
            } else {
                CellAction::Unchanged
            });
        }

        let cell = SummaryCell {
            month,
            sub_unit,
            metrics: aggregate.sums,
        };
        if self.store.update_cell(&plan, &cell)? {
            Ok(CellAction::Updated)
        } else {
            self.store.insert_cell(&plan, &cell)?;
            Ok(CellAction::Inserted)
        }
    }

    /// Compare the summary table with a fresh aggregation of the raw rows.
    pub fn check_health(&self, schema: &SchemaDefinition) -> Result<SummaryHealth, SummaryError> {
        let table = self.summary_table(schema)?;
        if !self.summary_exists(schema)? {
            return Ok(SummaryHealth::absent(&table));
        }
        let plan = self.plan(schema)?;
        let stored = self.store.list_cells(&plan, None)?;
        let fresh = self.store.aggregate_raw(&plan, None)?;
        let health = SummaryHealth::compare(&plan.summary, &plan.metrics, &stored, &fresh);
        if !health.is_consistent() {
            warn!(
                schema = %schema.name,
                summary = %plan.summary,
                drifted = health.drift.len(),
                "summary table has drifted from raw rows"
            );
        }
        Ok(health)
    }

    /// Drop the summary table if it exists.
    pub fn drop_summary(&self, schema: &SchemaDefinition) -> Result<(), SummaryError> {
        let table = self.summary_table(schema)?;
        self.store.drop_summary(&table)?;
        info!(schema = %schema.name, summary = %table, "dropped monthly summary");
        Ok(())
    }

    /// Monthly cells for `year`, from the summary table when it exists and
    /// from the raw table otherwise.
    pub fn monthly_cells(
        &self,
        schema: &SchemaDefinition,
        year: i32,
    ) -> Result<MonthlyCells, SummaryError> {
        let plan = self.plan(schema)?;
        let (source, cells) = if self.summary_exists(schema)? {
            (MonthlySource::Summary, self.store.list_cells(&plan, Some(year))?)
        } else {
            (MonthlySource::Raw, self.store.aggregate_raw(&plan, Some(year))?)
        };
        Ok(MonthlyCells {
            source,
            metrics: plan.metric_names().map(str::to_owned).collect(),
            cells,
        })
    }
}

impl<S, C> SummaryRefresh for SummaryMaterializer<S, C>
where
    S: SummaryStore,
    C: CatalogInspector,
{
    fn refresh_cell(&self, schema: &SchemaDefinition, key: RecordKey) -> CellAction {
        self.recompute_cell(schema, key.sub_unit, key.date)
    }
}

#[cfg(test)]
#[path = "summary_service_tests.rs"]
mod tests;
