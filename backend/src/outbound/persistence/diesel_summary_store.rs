//! PostgreSQL-backed `SummaryStore` implementation using Diesel ORM.
//!
//! A rebuild drops, recreates, indexes and repopulates the summary table in a
//! single transaction, so readers see either the previous table or the new
//! one. Per-cell statements run outside any transaction; callers recompute a
//! cell from scratch, so a lost update is corrected by the next recompute.

use chrono::NaiveDate;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Date, Integer, Text};
use tracing::info;

use crate::domain::identifier::SqlIdentifier;
use crate::domain::ports::{SummaryStore, SummaryStoreError};
use crate::domain::record::SubUnitId;
use crate::domain::summary::{MonthAggregate, MonthKey, SummaryCell, SummaryPlan};

use super::diesel_helpers::{map_diesel_error, map_pool_error_message};
use super::models::PayloadRow;
use super::payload::{decode_aggregate, decode_cell};
use super::pool::{DbPool, PgPooled};
use super::sql;

/// Diesel-backed implementation of the `SummaryStore` port.
#[derive(Clone)]
pub struct DieselSummaryStore {
    pool: DbPool,
}

impl DieselSummaryStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(&self) -> Result<PgPooled, SummaryStoreError> {
        self.pool
            .get()
            .map_err(|error| SummaryStoreError::connection(map_pool_error_message(error)))
    }
}

fn map_error(error: diesel::result::Error, operation: &str) -> SummaryStoreError {
    map_diesel_error(
        error,
        operation,
        SummaryStoreError::connection,
        SummaryStoreError::query,
    )
}

fn month_bounds(month: MonthKey) -> Result<(NaiveDate, NaiveDate), SummaryStoreError> {
    month
        .first_day()
        .zip(month.next_first_day())
        .ok_or_else(|| SummaryStoreError::query(format!("month {month} has no calendar bounds")))
}

fn year_bounds(year: i32) -> Result<(NaiveDate, NaiveDate), SummaryStoreError> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .zip(year.checked_add(1).and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1)))
        .ok_or_else(|| SummaryStoreError::query(format!("year {year} is out of range")))
}

fn decode_cells(plan: &SummaryPlan, rows: Vec<PayloadRow>) -> Result<Vec<SummaryCell>, SummaryStoreError> {
    rows.iter()
        .map(|row| decode_cell(plan, &row.payload))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| SummaryStoreError::decode(error.to_string()))
}

fn bind_metrics<'f>(
    mut query: BoxedSqlQuery<'f, Pg, SqlQuery>,
    plan: &SummaryPlan,
    cell: &SummaryCell,
) -> BoxedSqlQuery<'f, Pg, SqlQuery> {
    for metric in plan.metric_names() {
        query = query.bind::<BigInt, _>(cell.metric(metric));
    }
    query
}

impl SummaryStore for DieselSummaryStore {
    fn rebuild(&self, plan: &SummaryPlan) -> Result<u64, SummaryStoreError> {
        let mut conn = self.connection()?;
        let written = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                sql_query(sql::drop_table(&plan.summary)).execute(conn)?;
                sql_query(sql::create_summary(plan)).execute(conn)?;
                for statement in sql::summary_indexes(plan) {
                    sql_query(statement).execute(conn)?;
                }
                sql_query(sql::populate_summary(plan)).execute(conn)
            })
            .map_err(|error| map_error(error, "rebuild summary"))?;
        info!(summary = %plan.summary, cells = written, "summary table rebuilt");
        Ok(written as u64)
    }

    fn aggregate_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<MonthAggregate, SummaryStoreError> {
        let (from, until) = month_bounds(month)?;
        let mut conn = self.connection()?;
        let row: PayloadRow = sql_query(sql::aggregate_cell(plan))
            .bind::<Integer, _>(sub_unit.get())
            .bind::<Date, _>(from)
            .bind::<Date, _>(until)
            .get_result(&mut conn)
            .map_err(|error| map_error(error, "aggregate cell"))?;
        decode_aggregate(plan, &row.payload)
            .map_err(|error| SummaryStoreError::decode(error.to_string()))
    }

    fn find_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<Option<SummaryCell>, SummaryStoreError> {
        let mut conn = self.connection()?;
        let row: Option<PayloadRow> = sql_query(sql::select_cell(plan))
            .bind::<Text, _>(month.label())
            .bind::<Integer, _>(sub_unit.get())
            .get_result(&mut conn)
            .optional()
            .map_err(|error| map_error(error, "find cell"))?;
        row.map(|row| decode_cell(plan, &row.payload))
            .transpose()
            .map_err(|error| SummaryStoreError::decode(error.to_string()))
    }

    fn insert_cell(&self, plan: &SummaryPlan, cell: &SummaryCell) -> Result<(), SummaryStoreError> {
        let mut conn = self.connection()?;
        let query = sql_query(sql::insert_cell(plan))
            .into_boxed::<Pg>()
            .bind::<Text, _>(cell.month.label())
            .bind::<Integer, _>(cell.month.year())
            .bind::<Integer, _>(cell.sub_unit.get());
        bind_metrics(query, plan, cell)
            .execute(&mut conn)
            .map(drop)
            .map_err(|error| map_error(error, "insert cell"))
    }

    fn update_cell(
        &self,
        plan: &SummaryPlan,
        cell: &SummaryCell,
    ) -> Result<bool, SummaryStoreError> {
        let mut conn = self.connection()?;
        let query = sql_query(sql::update_cell(plan))
            .into_boxed::<Pg>()
            .bind::<Text, _>(cell.month.label())
            .bind::<Integer, _>(cell.sub_unit.get());
        let touched = bind_metrics(query, plan, cell)
            .execute(&mut conn)
            .map_err(|error| map_error(error, "update cell"))?;
        Ok(touched > 0)
    }

    fn delete_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<bool, SummaryStoreError> {
        let mut conn = self.connection()?;
        let touched = sql_query(sql::delete_cell(plan))
            .bind::<Text, _>(month.label())
            .bind::<Integer, _>(sub_unit.get())
            .execute(&mut conn)
            .map_err(|error| map_error(error, "delete cell"))?;
        Ok(touched > 0)
    }

    fn list_cells(
        &self,
        plan: &SummaryPlan,
        year: Option<i32>,
    ) -> Result<Vec<SummaryCell>, SummaryStoreError> {
        let mut conn = self.connection()?;
        let rows: Vec<PayloadRow> = match year {
            Some(year) => sql_query(sql::list_cells(plan, true))
                .bind::<Integer, _>(year)
                .load(&mut conn),
            None => sql_query(sql::list_cells(plan, false)).load(&mut conn),
        }
        .map_err(|error| map_error(error, "list cells"))?;
        decode_cells(plan, rows)
    }

    fn aggregate_raw(
        &self,
        plan: &SummaryPlan,
        year: Option<i32>,
    ) -> Result<Vec<SummaryCell>, SummaryStoreError> {
        let mut conn = self.connection()?;
        let rows: Vec<PayloadRow> = match year {
            Some(year) => {
                let (from, until) = year_bounds(year)?;
                sql_query(sql::aggregate_raw(plan, true))
                    .bind::<Date, _>(from)
                    .bind::<Date, _>(until)
                    .load(&mut conn)
            }
            None => sql_query(sql::aggregate_raw(plan, false)).load(&mut conn),
        }
        .map_err(|error| map_error(error, "aggregate raw"))?;
        decode_cells(plan, rows)
    }

    fn drop_summary(&self, summary: &SqlIdentifier) -> Result<(), SummaryStoreError> {
        let mut conn = self.connection()?;
        sql_query(sql::drop_table(summary))
            .execute(&mut conn)
            .map(drop)
            .map_err(|error| map_error(error, "drop summary"))
    }
}
