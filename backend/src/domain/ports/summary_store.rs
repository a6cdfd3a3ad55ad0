//! Port abstraction for monthly summary tables.

use crate::domain::identifier::SqlIdentifier;
use crate::domain::record::SubUnitId;
use crate::domain::summary::{MonthAggregate, MonthKey, SummaryCell, SummaryPlan};

use super::define_port_error;

define_port_error! {
    /// Errors raised by summary store adapters.
    pub enum SummaryStoreError {
        /// Connection to the backing datastore failed.
        Connection { message: String } =>
            "summary store connection failed: {message}",
        /// A statement failed; any rebuild in progress was rolled back.
        Query { message: String } =>
            "summary store query failed: {message}",
        /// A summary row could not be mapped back into the domain.
        Decode { message: String } =>
            "summary store row decode failed: {message}",
    }
}

/// Storage for derived monthly roll-ups.
#[cfg_attr(test, mockall::automock)]
pub trait SummaryStore: Send + Sync {
    /// Drop, recreate and repopulate the summary table in one transaction.
    ///
    /// Returns the number of cells written.
    fn rebuild(&self, plan: &SummaryPlan) -> Result<u64, SummaryStoreError>;

    /// Sum every metric and count raw rows for one (sub-unit, month).
    fn aggregate_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<MonthAggregate, SummaryStoreError>;

    /// Read a stored summary cell.
    fn find_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<Option<SummaryCell>, SummaryStoreError>;

    /// Insert a summary cell.
    fn insert_cell(&self, plan: &SummaryPlan, cell: &SummaryCell)
    -> Result<(), SummaryStoreError>;

    /// Overwrite the metrics of an existing cell; `false` when it is absent.
    fn update_cell(&self, plan: &SummaryPlan, cell: &SummaryCell)
    -> Result<bool, SummaryStoreError>;

    /// Remove a cell; `false` when it was already absent.
    fn delete_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<bool, SummaryStoreError>;

    /// Stored cells, optionally restricted to one year, ordered by month
    /// then sub-unit.
    fn list_cells(
        &self,
        plan: &SummaryPlan,
        year: Option<i32>,
    ) -> Result<Vec<SummaryCell>, SummaryStoreError>;

    /// Cells computed straight from the raw table, in the same order as
    /// [`SummaryStore::list_cells`].
    fn aggregate_raw(
        &self,
        plan: &SummaryPlan,
        year: Option<i32>,
    ) -> Result<Vec<SummaryCell>, SummaryStoreError>;

    /// Drop a summary table if it exists.
    fn drop_summary(&self, summary: &SqlIdentifier) -> Result<(), SummaryStoreError>;
}
