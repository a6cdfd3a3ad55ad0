//! Decoding of `to_jsonb` row payloads into domain values.
//!
//! PostgreSQL renders dates as `YYYY-MM-DD` strings and every numeric type as
//! a JSON number; `SUM` over wide types may come back fractional, so numbers
//! are truncated rather than rejected.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::domain::identifier::{DATE_COLUMN, ID_COLUMN, SUB_UNIT_COLUMN, TOTAL_COLUMN};
use crate::domain::ports::ColumnTotals;
use crate::domain::record::{
    CellValue, RecordId, RecordKey, StoredRecord, SubUnitId, parse_date, parse_lenient_integer,
};
use crate::domain::schema::{ColumnType, SchemaDefinition};
use crate::domain::summary::{MonthAggregate, MonthKey, SummaryCell, SummaryPlan};

use super::sql::{GRAND_TOTAL_ALIAS, ROW_COUNT_ALIAS};

/// Why a payload could not be mapped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload field `{field}` is missing or malformed")]
    Field { field: String },
}

fn object(payload: &Value) -> Result<&Map<String, Value>, PayloadError> {
    payload.as_object().ok_or(PayloadError::NotAnObject)
}

fn malformed(field: &str) -> PayloadError {
    PayloadError::Field {
        field: field.to_owned(),
    }
}

fn required_integer(fields: &Map<String, Value>, field: &str) -> Result<i64, PayloadError> {
    match fields.get(field) {
        Some(Value::Number(number)) => Ok(parse_lenient_integer(&Value::Number(number.clone()))),
        _ => Err(malformed(field)),
    }
}

fn optional_integer(fields: &Map<String, Value>, field: &str) -> i64 {
    fields.get(field).map_or(0, parse_lenient_integer)
}

fn sub_unit(fields: &Map<String, Value>) -> Result<SubUnitId, PayloadError> {
    let raw = required_integer(fields, SUB_UNIT_COLUMN)?;
    i32::try_from(raw)
        .map(SubUnitId::new)
        .map_err(|_| malformed(SUB_UNIT_COLUMN))
}

fn cell_value(column_type: ColumnType, value: Option<&Value>) -> CellValue {
    match (column_type, value) {
        (_, None | Some(Value::Null)) => CellValue::Null,
        (ColumnType::Integer, Some(raw)) => CellValue::Integer(parse_lenient_integer(raw)),
        (ColumnType::Text, Some(Value::String(text))) => CellValue::Text(text.clone()),
        (ColumnType::Text, Some(other)) => CellValue::Text(other.to_string()),
        (ColumnType::Date, Some(raw)) => raw
            .as_str()
            .and_then(parse_date)
            .map_or(CellValue::Null, CellValue::Date),
    }
}

/// Map a full dynamic-table row.
pub fn decode_record(
    schema: &SchemaDefinition,
    payload: &Value,
) -> Result<StoredRecord, PayloadError> {
    let fields = object(payload)?;
    let id = required_integer(fields, ID_COLUMN)?;
    let date = fields
        .get(DATE_COLUMN)
        .and_then(Value::as_str)
        .and_then(parse_date)
        .ok_or_else(|| malformed(DATE_COLUMN))?;
    let values = schema
        .columns
        .iter()
        .map(|column| {
            (
                column.name.to_string(),
                cell_value(column.column_type, fields.get(column.name.as_str())),
            )
        })
        .collect();
    Ok(StoredRecord {
        id: RecordId::new(id),
        key: RecordKey::new(sub_unit(fields)?, date),
        values,
        total: optional_integer(fields, TOTAL_COLUMN),
    })
}

fn metric_sums<'a>(
    fields: &Map<String, Value>,
    metrics: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, i64> {
    metrics
        .into_iter()
        .map(|metric| (metric.to_owned(), optional_integer(fields, metric)))
        .collect()
}

/// Map a per-column totals payload.
pub fn decode_totals(
    schema: &SchemaDefinition,
    payload: &Value,
) -> Result<ColumnTotals, PayloadError> {
    let fields = object(payload)?;
    Ok(ColumnTotals {
        sums: metric_sums(
            fields,
            schema.summable_columns().map(|column| column.name.as_str()),
        ),
        grand_total: optional_integer(fields, GRAND_TOTAL_ALIAS),
    })
}

/// Map a single-cell aggregation payload.
pub fn decode_aggregate(
    plan: &SummaryPlan,
    payload: &Value,
) -> Result<MonthAggregate, PayloadError> {
    let fields = object(payload)?;
    let row_count = required_integer(fields, ROW_COUNT_ALIAS)?;
    Ok(MonthAggregate {
        row_count: u64::try_from(row_count).map_err(|_| malformed(ROW_COUNT_ALIAS))?,
        sums: metric_sums(fields, plan.metric_names()),
    })
}

/// Map a summary cell payload, stored or freshly aggregated.
pub fn decode_cell(plan: &SummaryPlan, payload: &Value) -> Result<SummaryCell, PayloadError> {
    let fields = object(payload)?;
    let month = fields
        .get("month")
        .and_then(Value::as_str)
        .and_then(|label| label.parse::<MonthKey>().ok())
        .ok_or_else(|| malformed("month"))?;
    Ok(SummaryCell {
        month,
        sub_unit: sub_unit(fields)?,
        metrics: metric_sums(fields, plan.metric_names()),
    })
}
