//! Monthly roll-up model.
//!
//! A summary table holds one row per (month, sub-unit) and one BIGINT column
//! per metric. [`SummaryPlan`] captures everything an adapter needs to build
//! or patch one: the source table, the summary table name and the metric
//! list derived from the live catalog.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::identifier::{DATE_COLUMN, InvalidName, SUB_UNIT_COLUMN, SqlIdentifier, assert_identifier};
use super::ports::CatalogColumn;
use super::record::SubUnitId;
use super::schema::{ColumnType, NON_METRIC_COLUMNS, SchemaDefinition};

/// Source table that predates per-id summary naming.
pub const HISTORICAL_SOURCE_TABLE: &str = "data_arsip";
/// Summary table name kept for [`HISTORICAL_SOURCE_TABLE`].
pub const HISTORICAL_SUMMARY_TABLE: &str = "data_arsip_monthly_summary";
/// Suffix shared by every summary table name.
pub const SUMMARY_SUFFIX: &str = "_monthly_summary";

/// Summary table name for a schema.
///
/// # Examples
/// ```
/// use tallyhouse::domain::identifier::SqlIdentifier;
/// use tallyhouse::domain::schema::{SchemaDefinition, SchemaId};
/// use tallyhouse::domain::summary::summary_table_name;
///
/// let schema = SchemaDefinition {
///     id: SchemaId::new(7),
///     name: SqlIdentifier::new("surat_masuk").expect("valid"),
///     display_name: "Surat Masuk".into(),
///     description: None,
///     is_default: false,
///     columns: Vec::new(),
/// };
/// assert_eq!(
///     summary_table_name(&schema).expect("valid").as_str(),
///     "table_7_monthly_summary"
/// );
/// ```
pub fn summary_table_name(schema: &SchemaDefinition) -> Result<SqlIdentifier, InvalidName> {
    if schema.name.as_str() == HISTORICAL_SOURCE_TABLE {
        assert_identifier(HISTORICAL_SUMMARY_TABLE)
    } else {
        assert_identifier(&format!("table_{}{SUMMARY_SUFFIX}", schema.id))
    }
}

/// Calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

/// Rejected month key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid month `{0}`; expected YYYY-MM")]
pub struct InvalidMonth(pub String);

impl MonthKey {
    /// Build a month key, rejecting months outside 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidMonth> {
        if (1..=12).contains(&month) && NaiveDate::from_ymd_opt(year, month, 1).is_some() {
            Ok(Self { year, month })
        } else {
            Err(InvalidMonth(format!("{year}-{month}")))
        }
    }

    /// Month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub const fn year(self) -> i32 {
        self.year
    }

    pub const fn month(self) -> u32 {
        self.month
    }

    /// `YYYY-MM` label used as the summary primary-key column.
    pub fn label(self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// First day of the month.
    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// First day of the following month; the exclusive range end.
    pub fn next_first_day(self) -> Option<NaiveDate> {
        if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year.checked_add(1)?, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for MonthKey {
    type Err = InvalidMonth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMonth(s.to_owned());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for MonthKey {
    type Error = InvalidMonth;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(value: MonthKey) -> Self {
        value.label()
    }
}

/// Why a summary plan could not be derived from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryPlanError {
    #[error("table `{table}` has no `{column}` column")]
    MissingColumn { table: String, column: &'static str },
    #[error("table `{table}` has no integer metric columns")]
    NoMetrics { table: String },
    #[error("catalog returned an unusable name: {0}")]
    InvalidName(#[from] InvalidName),
}

/// Everything needed to build or patch a summary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryPlan {
    pub source: SqlIdentifier,
    pub summary: SqlIdentifier,
    pub metrics: Vec<SqlIdentifier>,
}

impl SummaryPlan {
    /// Derive a plan from the live columns of the schema's physical table.
    ///
    /// Metrics are every integer-classified column except identity and
    /// reference columns, so `total` is rolled up alongside the declared
    /// metrics.
    pub fn from_catalog(
        schema: &SchemaDefinition,
        columns: &[CatalogColumn],
    ) -> Result<Self, SummaryPlanError> {
        let table = schema.name.to_string();
        for required in [DATE_COLUMN, SUB_UNIT_COLUMN] {
            if !columns.iter().any(|column| column.name == required) {
                return Err(SummaryPlanError::MissingColumn {
                    table,
                    column: required,
                });
            }
        }

        let metrics = columns
            .iter()
            .filter(|column| ColumnType::classify(&column.data_type) == ColumnType::Integer)
            .filter(|column| !NON_METRIC_COLUMNS.contains(&column.name.as_str()))
            .map(|column| assert_identifier(&column.name))
            .collect::<Result<Vec<_>, _>>()?;
        if metrics.is_empty() {
            return Err(SummaryPlanError::NoMetrics { table });
        }

        Ok(Self {
            source: schema.name.clone(),
            summary: summary_table_name(schema)?,
            metrics,
        })
    }

    /// Metric names as plain strings.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(SqlIdentifier::as_str)
    }
}

/// One summary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCell {
    pub month: MonthKey,
    pub sub_unit: SubUnitId,
    pub metrics: BTreeMap<String, i64>,
}

impl SummaryCell {
    /// Metric value, zero when absent.
    pub fn metric(&self, name: &str) -> i64 {
        self.metrics.get(name).copied().unwrap_or(0)
    }
}

/// Raw aggregation for a single (sub-unit, month).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthAggregate {
    pub row_count: u64,
    pub sums: BTreeMap<String, i64>,
}

/// What an incremental recompute did to the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellAction {
    /// No summary table exists; nothing to maintain.
    NoSummary,
    Inserted,
    Updated,
    Deleted,
    /// The cell had no raw rows and no summary row.
    Unchanged,
    /// The recompute failed and was logged; the summary may have drifted.
    Failed,
}

/// Disagreement between a summary row and the raw table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellDrift {
    /// Raw rows exist but the summary has no row.
    Missing { month: MonthKey, sub_unit: SubUnitId },
    /// The summary has a row with no raw rows behind it.
    Orphaned { month: MonthKey, sub_unit: SubUnitId },
    /// Both exist but a metric differs.
    Mismatch {
        month: MonthKey,
        sub_unit: SubUnitId,
        metric: String,
        expected: i64,
        actual: i64,
    },
}

/// Result of comparing a summary table with a fresh aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryHealth {
    pub summary_table: String,
    pub exists: bool,
    pub summary_cells: usize,
    pub expected_cells: usize,
    pub drift: Vec<CellDrift>,
}

impl SummaryHealth {
    /// Report for a schema that has no summary table.
    pub fn absent(summary_table: &SqlIdentifier) -> Self {
        Self {
            summary_table: summary_table.to_string(),
            exists: false,
            summary_cells: 0,
            expected_cells: 0,
            drift: Vec::new(),
        }
    }

    /// Diff stored summary cells against expected cells.
    pub fn compare(
        summary_table: &SqlIdentifier,
        metrics: &[SqlIdentifier],
        actual: &[SummaryCell],
        expected: &[SummaryCell],
    ) -> Self {
        fn index(cells: &[SummaryCell]) -> BTreeMap<(MonthKey, SubUnitId), &SummaryCell> {
            cells
                .iter()
                .map(|cell| ((cell.month, cell.sub_unit), cell))
                .collect()
        }

        let actual_by_key = index(actual);
        let expected_by_key = index(expected);
        let keys: BTreeSet<_> = actual_by_key
            .keys()
            .chain(expected_by_key.keys())
            .copied()
            .collect();

        let mut drift = Vec::new();
        for (month, sub_unit) in keys {
            match (
                actual_by_key.get(&(month, sub_unit)),
                expected_by_key.get(&(month, sub_unit)),
            ) {
                (None, Some(_)) => drift.push(CellDrift::Missing { month, sub_unit }),
                (Some(_), None) => drift.push(CellDrift::Orphaned { month, sub_unit }),
                (Some(stored), Some(fresh)) => {
                    for metric in metrics {
                        let actual_value = stored.metric(metric.as_str());
                        let expected_value = fresh.metric(metric.as_str());
                        if actual_value != expected_value {
                            drift.push(CellDrift::Mismatch {
                                month,
                                sub_unit,
                                metric: metric.to_string(),
                                expected: expected_value,
                                actual: actual_value,
                            });
                        }
                    }
                }
                (None, None) => {}
            }
        }

        Self {
            summary_table: summary_table.to_string(),
            exists: true,
            summary_cells: actual.len(),
            expected_cells: expected.len(),
            drift,
        }
    }

    /// Whether the summary agrees with the raw table.
    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty()
    }
}
