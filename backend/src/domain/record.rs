//! Records stored in dynamic tables and the merge rules applied on write.
//!
//! Writes are planned here as pure functions and executed by a
//! [`RecordStore`](super::ports::RecordStore) adapter. A plan carries only the
//! columns to assign plus the recomputed `total`; unchanged columns are left
//! out so adapters never rewrite values they did not read back exactly.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identifier::SqlIdentifier;
use super::schema::{ColumnDefinition, ColumnType};

/// Incoming column values keyed by internal column name.
pub type RecordValues = BTreeMap<String, Value>;

/// Sub-unit (organizational unit) a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubUnitId(i32);

impl SubUnitId {
    /// Wrap a raw sub-unit id.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw sub-unit id.
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SubUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a row in a dynamic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wrap a raw row id.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw row id.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Natural key of a record: at most one row per sub-unit and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub sub_unit: SubUnitId,
    pub date: NaiveDate,
}

impl RecordKey {
    /// Build a key.
    pub const fn new(sub_unit: SubUnitId, date: NaiveDate) -> Self {
        Self { sub_unit, date }
    }
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Text(String),
    Date(NaiveDate),
}

impl CellValue {
    /// Integer content, if any.
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Render as JSON for callers that expose records.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Integer(value) => Value::from(*value),
            Self::Text(value) => Value::from(value.as_str()),
            Self::Date(value) => Value::from(value.format("%Y-%m-%d").to_string()),
        }
    }
}

/// A row as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub key: RecordKey,
    /// Declared column values keyed by internal name.
    pub values: BTreeMap<String, CellValue>,
    pub total: i64,
}

impl StoredRecord {
    /// Integer value of a column, zero when absent or non-numeric.
    pub fn integer(&self, column: &str) -> i64 {
        self.values
            .get(column)
            .and_then(CellValue::as_integer)
            .unwrap_or(0)
    }
}

/// One column assignment in a write plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAssignment {
    pub column: SqlIdentifier,
    pub column_type: ColumnType,
    pub value: CellValue,
}

/// Columns to assign plus the recomputed total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWrite {
    pub assignments: Vec<ColumnAssignment>,
    pub total: i64,
}

impl RecordWrite {
    /// Assigned value of `column`, if the plan touches it.
    pub fn value(&self, column: &str) -> Option<&CellValue> {
        self.assignments
            .iter()
            .find(|assignment| assignment.column.as_str() == column)
            .map(|assignment| &assignment.value)
    }
}

/// Outcome of a keyed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    Inserted,
    Updated,
}

/// What a store did with a planned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub action: WriteAction,
    pub id: RecordId,
    pub key: RecordKey,
    pub total: i64,
}

/// Parse an incoming value as an integer, treating anything unusable as zero.
///
/// Numbers are truncated towards zero, numeric strings are trimmed and parsed,
/// booleans count as 0/1. Nothing here ever fails.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use tallyhouse::domain::record::parse_lenient_integer;
///
/// assert_eq!(parse_lenient_integer(&json!(12)), 12);
/// assert_eq!(parse_lenient_integer(&json!(" 7 ")), 7);
/// assert_eq!(parse_lenient_integer(&json!("12.9")), 12);
/// assert_eq!(parse_lenient_integer(&json!("n/a")), 0);
/// assert_eq!(parse_lenient_integer(&json!(null)), 0);
/// ```
pub fn parse_lenient_integer(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(truncate_float))
            .unwrap_or(0),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(truncate_float))
                .unwrap_or(0)
        }
        Value::Bool(flag) => i64::from(*flag),
        Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}

// `as` saturates at the i64 bounds.
fn truncate_float(value: f64) -> i64 {
    if value.is_finite() { value as i64 } else { 0 }
}

/// Clamp to the range of the `INTEGER` columns metrics and `total` live in.
pub fn column_integer(value: i64) -> i64 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX))
}

/// Add two column values, saturating at the `INTEGER` bounds.
pub fn add_column_values(left: i64, right: i64) -> i64 {
    column_integer(left.saturating_add(right))
}

/// Coerce an incoming JSON value into a cell of the column's declared type.
pub fn coerce_value(column_type: ColumnType, value: &Value) -> CellValue {
    match column_type {
        ColumnType::Integer => CellValue::Integer(column_integer(parse_lenient_integer(value))),
        ColumnType::Text => match value {
            Value::Null => CellValue::Null,
            Value::String(text) => CellValue::Text(text.clone()),
            other => CellValue::Text(other.to_string()),
        },
        ColumnType::Date => value
            .as_str()
            .and_then(parse_date)
            .map_or(CellValue::Null, CellValue::Date),
    }
}

/// Parse `YYYY-MM-DD`, also accepting a timestamp that starts with one.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn assign(column: &ColumnDefinition, value: CellValue) -> ColumnAssignment {
    ColumnAssignment {
        column: column.name.clone(),
        column_type: column.column_type,
        value,
    }
}

/// Plan a fresh insert.
///
/// Integer columns default to zero, other columns to null. Keys in
/// `incoming` that are not declared columns are ignored.
pub fn plan_insert(columns: &[ColumnDefinition], incoming: &RecordValues) -> RecordWrite {
    let mut total: i64 = 0;
    let assignments = columns
        .iter()
        .map(|column| {
            let value = incoming.get(column.name.as_str()).map_or_else(
                || default_cell(column.column_type),
                |raw| coerce_value(column.column_type, raw),
            );
            if column.contributes_to_total() {
                total = add_column_values(total, value.as_integer().unwrap_or(0));
            }
            assign(column, value)
        })
        .collect();
    RecordWrite { assignments, total }
}

/// Plan an additive merge into an existing row.
///
/// Summable integer columns become `existing + incoming`; other columns are
/// overwritten when present and left untouched otherwise. `total` is the sum
/// of the new summable values.
pub fn plan_merge(
    columns: &[ColumnDefinition],
    existing: &StoredRecord,
    incoming: &RecordValues,
) -> RecordWrite {
    let mut total: i64 = 0;
    let mut assignments = Vec::new();
    for column in columns {
        let raw = incoming.get(column.name.as_str());
        if column.contributes_to_total() {
            let added = raw.map_or(0, parse_lenient_integer);
            let merged = add_column_values(existing.integer(column.name.as_str()), added);
            total = add_column_values(total, merged);
            assignments.push(assign(column, CellValue::Integer(merged)));
        } else if let Some(value) = raw {
            assignments.push(assign(column, coerce_value(column.column_type, value)));
        }
    }
    RecordWrite { assignments, total }
}

/// Plan an overwrite of the provided columns on an existing row.
///
/// Unlike [`plan_merge`], summable columns are replaced rather than added to;
/// `total` sums the replaced values with the untouched ones.
pub fn plan_overwrite(
    columns: &[ColumnDefinition],
    existing: &StoredRecord,
    incoming: &RecordValues,
) -> RecordWrite {
    let mut total: i64 = 0;
    let mut assignments = Vec::new();
    for column in columns {
        let provided = incoming
            .get(column.name.as_str())
            .map(|raw| coerce_value(column.column_type, raw));
        if column.contributes_to_total() {
            let value = provided
                .as_ref()
                .and_then(CellValue::as_integer)
                .unwrap_or_else(|| existing.integer(column.name.as_str()));
            total = add_column_values(total, value);
        }
        if let Some(value) = provided {
            assignments.push(assign(column, value));
        }
    }
    RecordWrite { assignments, total }
}

/// Recompute `total` from a full set of stored values.
pub fn total_of(columns: &[ColumnDefinition], values: &BTreeMap<String, CellValue>) -> i64 {
    columns
        .iter()
        .filter(|column| column.contributes_to_total())
        .filter_map(|column| values.get(column.name.as_str()).and_then(CellValue::as_integer))
        .fold(0, add_column_values)
}

const fn default_cell(column_type: ColumnType) -> CellValue {
    match column_type {
        ColumnType::Integer => CellValue::Integer(0),
        ColumnType::Text | ColumnType::Date => CellValue::Null,
    }
}
