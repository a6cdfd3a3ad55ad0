//! In-memory stand-in for the PostgreSQL adapters.
//!
//! One [`InMemoryDatabase`] implements every storage port so services can be
//! wired exactly as in production, sharing a single `Arc`. Physical tables,
//! summary tables and registry rows live behind one mutex; holding it across
//! a keyed read-plan-write gives the same atomicity the advisory lock gives
//! in PostgreSQL.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::identifier::{SqlIdentifier, TOTAL_COLUMN};
use crate::domain::ports::{
    CatalogColumn, CatalogError, CatalogInspector, ColumnTotals, KeyedPlan, RecordStore,
    RecordStoreError, RowPlan, SchemaRegistry, SchemaRegistryError, SummaryStore,
    SummaryStoreError,
};
use crate::domain::record::{
    CellValue, RecordId, RecordKey, RecordWrite, StoredRecord, SubUnitId, WriteAction,
    WriteOutcome, total_of,
};
use crate::domain::schema::{ColumnType, SchemaDefinition, SchemaDraft, SchemaId, SchemaUpdate};
use crate::domain::summary::{MonthAggregate, MonthKey, SummaryCell, SummaryPlan};

/// Internal tables the catalog reports alongside user tables.
const INTERNAL_TABLES: [&str; 4] = [
    "__diesel_schema_migrations",
    "column_definitions",
    "table_definitions",
    "unit_kerja",
];

#[derive(Debug, Clone)]
struct MemoryRow {
    key: RecordKey,
    values: BTreeMap<String, CellValue>,
    total: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<CatalogColumn>,
    rows: BTreeMap<i64, MemoryRow>,
    next_id: i64,
}

#[derive(Debug, Clone, Default)]
struct MemorySummary {
    metrics: Vec<String>,
    cells: BTreeMap<(MonthKey, SubUnitId), SummaryCell>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    schemas: BTreeMap<SchemaId, SchemaDefinition>,
    next_schema_id: i32,
    tables: BTreeMap<String, MemoryTable>,
    summaries: BTreeMap<String, MemorySummary>,
    fail_next_ddl: Option<String>,
}

/// Shared in-memory database implementing all storage ports.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    state: Mutex<DatabaseState>,
}

fn catalog_column(name: &str, data_type: &str, is_nullable: bool) -> CatalogColumn {
    CatalogColumn {
        name: name.to_owned(),
        data_type: data_type.to_owned(),
        is_nullable,
    }
}

fn physical_columns(draft: &SchemaDraft) -> Vec<CatalogColumn> {
    let mut columns = vec![
        catalog_column("id", "integer", false),
        catalog_column("unit_kerja_id", "integer", false),
        catalog_column("tanggal", "date", false),
        catalog_column("total", "integer", true),
        catalog_column("created_at", "timestamp without time zone", true),
        catalog_column("updated_at", "timestamp without time zone", true),
    ];
    columns.extend(draft.columns.iter().map(|column| {
        let data_type = match column.column_type {
            ColumnType::Integer => "integer",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
        };
        catalog_column(column.name.as_str(), data_type, true)
    }));
    columns
}

fn missing_relation(table: &str) -> String {
    format!("relation \"{table}\" does not exist")
}

impl MemoryRow {
    fn to_stored(&self, id: i64) -> StoredRecord {
        StoredRecord {
            id: RecordId::new(id),
            key: self.key,
            values: self.values.clone(),
            total: self.total,
        }
    }

    fn apply(&mut self, write: &RecordWrite) {
        for assignment in &write.assignments {
            self.values
                .insert(assignment.column.to_string(), assignment.value.clone());
        }
        self.total = write.total;
    }

    fn metric(&self, name: &str) -> i64 {
        if name == TOTAL_COLUMN {
            self.total
        } else {
            self.values
                .get(name)
                .and_then(CellValue::as_integer)
                .unwrap_or(0)
        }
    }
}

impl MemoryTable {
    fn insert(&mut self, key: RecordKey, write: &RecordWrite) -> i64 {
        self.next_id += 1;
        let mut row = MemoryRow {
            key,
            values: BTreeMap::new(),
            total: 0,
        };
        row.apply(write);
        self.rows.insert(self.next_id, row);
        self.next_id
    }

    fn aggregate(&self, plan: &SummaryPlan, year: Option<i32>) -> Vec<SummaryCell> {
        let mut cells: BTreeMap<(MonthKey, SubUnitId), SummaryCell> = BTreeMap::new();
        for row in self.rows.values() {
            let month = MonthKey::of(row.key.date);
            if year.is_some_and(|wanted| wanted != month.year()) {
                continue;
            }
            let cell = cells
                .entry((month, row.key.sub_unit))
                .or_insert_with(|| SummaryCell {
                    month,
                    sub_unit: row.key.sub_unit,
                    metrics: plan.metric_names().map(|name| (name.to_owned(), 0)).collect(),
                });
            for metric in plan.metric_names() {
                let sum = cell.metrics.entry(metric.to_owned()).or_insert(0);
                *sum = sum.saturating_add(row.metric(metric));
            }
        }
        cells.into_values().collect()
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DatabaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next table-creating call fail as if the DDL was rejected.
    pub fn fail_next_ddl(&self, message: &str) {
        self.lock().fail_next_ddl = Some(message.to_owned());
    }

    /// Create a table outside the registry, as a bulk loader would.
    pub fn create_external_table(&self, name: &str, columns: Vec<CatalogColumn>) {
        self.lock().tables.insert(
            name.to_owned(),
            MemoryTable {
                columns,
                ..MemoryTable::default()
            },
        );
    }

    /// Whether a physical or summary table exists.
    pub fn has_table(&self, name: &str) -> bool {
        let state = self.lock();
        state.tables.contains_key(name) || state.summaries.contains_key(name)
    }

    /// Rows currently stored in `table`.
    pub fn rows(&self, table: &str) -> Vec<StoredRecord> {
        self.lock().tables.get(table).map_or_else(Vec::new, |stored| {
            stored
                .rows
                .iter()
                .map(|(id, row)| row.to_stored(*id))
                .collect()
        })
    }

    /// Delete raw rows behind the service's back, leaving summaries stale.
    pub fn delete_rows_out_of_band(&self, table: &str, sub_unit: SubUnitId, month: MonthKey) -> usize {
        let mut state = self.lock();
        let Some(stored) = state.tables.get_mut(table) else {
            return 0;
        };
        let before = stored.rows.len();
        stored
            .rows
            .retain(|_, row| !(row.key.sub_unit == sub_unit && MonthKey::of(row.key.date) == month));
        before - stored.rows.len()
    }

    /// Read a summary cell directly.
    pub fn summary_cell(
        &self,
        summary: &str,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Option<SummaryCell> {
        self.lock()
            .summaries
            .get(summary)
            .and_then(|stored| stored.cells.get(&(month, sub_unit)).cloned())
    }

    fn register(state: &mut DatabaseState, draft: &SchemaDraft) -> SchemaDefinition {
        state.next_schema_id += 1;
        let id = SchemaId::new(state.next_schema_id);
        if draft.is_default {
            for schema in state.schemas.values_mut() {
                schema.is_default = false;
            }
        }
        let definition = SchemaDefinition {
            id,
            name: draft.name.clone(),
            display_name: draft.display_name.clone(),
            description: draft.description.clone(),
            is_default: draft.is_default,
            columns: draft.columns.clone(),
        };
        state.schemas.insert(id, definition.clone());
        definition
    }

    fn ensure_unregistered(state: &DatabaseState, name: &SqlIdentifier) -> Result<(), SchemaRegistryError> {
        if state.schemas.values().any(|schema| &schema.name == name) {
            return Err(SchemaRegistryError::duplicate(name.as_str()));
        }
        Ok(())
    }
}

impl SchemaRegistry for InMemoryDatabase {
    fn list(&self) -> Result<Vec<SchemaDefinition>, SchemaRegistryError> {
        Ok(self.lock().schemas.values().cloned().collect())
    }

    fn find_by_id(&self, id: SchemaId) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        Ok(self.lock().schemas.get(&id).cloned())
    }

    fn find_by_name(&self, name: &str) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        Ok(self
            .lock()
            .schemas
            .values()
            .find(|schema| schema.name.as_str() == name)
            .cloned())
    }

    fn create_with_table(
        &self,
        draft: &SchemaDraft,
    ) -> Result<SchemaDefinition, SchemaRegistryError> {
        let mut state = self.lock();
        Self::ensure_unregistered(&state, &draft.name)?;
        if let Some(message) = state.fail_next_ddl.take() {
            return Err(SchemaRegistryError::ddl(draft.name.as_str(), message));
        }
        if state.tables.contains_key(draft.name.as_str()) {
            return Err(SchemaRegistryError::ddl(
                draft.name.as_str(),
                format!("relation \"{}\" already exists", draft.name),
            ));
        }
        state.tables.insert(
            draft.name.to_string(),
            MemoryTable {
                columns: physical_columns(draft),
                ..MemoryTable::default()
            },
        );
        Ok(Self::register(&mut state, draft))
    }

    fn register_metadata(
        &self,
        draft: &SchemaDraft,
    ) -> Result<SchemaDefinition, SchemaRegistryError> {
        let mut state = self.lock();
        Self::ensure_unregistered(&state, &draft.name)?;
        Ok(Self::register(&mut state, draft))
    }

    fn update(
        &self,
        id: SchemaId,
        update: &SchemaUpdate,
    ) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        let mut state = self.lock();
        if !state.schemas.contains_key(&id) {
            return Ok(None);
        }
        if update.make_default {
            for schema in state.schemas.values_mut() {
                schema.is_default = schema.id == id;
            }
        }
        let Some(schema) = state.schemas.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(display_name) = &update.display_name {
            schema.display_name.clone_from(display_name);
        }
        if let Some(description) = &update.description {
            schema.description.clone_from(description);
        }
        Ok(Some(schema.clone()))
    }

    fn delete_with_table(
        &self,
        id: SchemaId,
    ) -> Result<Option<SchemaDefinition>, SchemaRegistryError> {
        let mut state = self.lock();
        let Some(removed) = state.schemas.remove(&id) else {
            return Ok(None);
        };
        state.tables.remove(removed.name.as_str());
        Ok(Some(removed))
    }
}

impl CatalogInspector for InMemoryDatabase {
    fn list_tables(&self) -> Result<Vec<String>, CatalogError> {
        let state = self.lock();
        let mut tables: Vec<String> = INTERNAL_TABLES
            .iter()
            .map(|name| (*name).to_owned())
            .chain(state.tables.keys().cloned())
            .chain(state.summaries.keys().cloned())
            .collect();
        tables.sort();
        Ok(tables)
    }

    fn table_columns(&self, table: &str) -> Result<Vec<CatalogColumn>, CatalogError> {
        let state = self.lock();
        if let Some(stored) = state.tables.get(table) {
            return Ok(stored.columns.clone());
        }
        if let Some(summary) = state.summaries.get(table) {
            let mut columns = vec![
                catalog_column("month", "character varying", false),
                catalog_column("year", "integer", false),
                catalog_column("unit_kerja_id", "integer", false),
            ];
            columns.extend(
                summary
                    .metrics
                    .iter()
                    .map(|metric| catalog_column(metric, "bigint", true)),
            );
            return Ok(columns);
        }
        Ok(Vec::new())
    }
}

impl RecordStore for InMemoryDatabase {
    fn write_keyed(
        &self,
        schema: &SchemaDefinition,
        key: RecordKey,
        plan: &KeyedPlan<'_>,
    ) -> Result<WriteOutcome, RecordStoreError> {
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        let existing = table
            .rows
            .iter_mut()
            .find(|(_, row)| row.key == key);

        if let Some((id, row)) = existing {
            let write = plan(Some(&row.to_stored(*id)));
            row.apply(&write);
            return Ok(WriteOutcome {
                action: WriteAction::Updated,
                id: RecordId::new(*id),
                key,
                total: write.total,
            });
        }

        let write = plan(None);
        let id = table.insert(key, &write);
        Ok(WriteOutcome {
            action: WriteAction::Inserted,
            id: RecordId::new(id),
            key,
            total: write.total,
        })
    }

    fn insert(
        &self,
        schema: &SchemaDefinition,
        key: RecordKey,
        write: &RecordWrite,
    ) -> Result<RecordId, RecordStoreError> {
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        Ok(RecordId::new(table.insert(key, write)))
    }

    fn rewrite(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
        plan: &RowPlan<'_>,
    ) -> Result<Option<WriteOutcome>, RecordStoreError> {
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        let Some(row) = table.rows.get_mut(&id.get()) else {
            return Ok(None);
        };
        let write = plan(&row.to_stored(id.get()));
        row.apply(&write);
        Ok(Some(WriteOutcome {
            action: WriteAction::Updated,
            id,
            key: row.key,
            total: write.total,
        }))
    }

    fn find(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<Option<StoredRecord>, RecordStoreError> {
        let state = self.lock();
        let table = state
            .tables
            .get(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        Ok(table.rows.get(&id.get()).map(|row| row.to_stored(id.get())))
    }

    fn delete(
        &self,
        schema: &SchemaDefinition,
        id: RecordId,
    ) -> Result<Option<RecordKey>, RecordStoreError> {
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        Ok(table.rows.remove(&id.get()).map(|row| row.key))
    }

    fn count(&self, schema: &SchemaDefinition) -> Result<u64, RecordStoreError> {
        let state = self.lock();
        let table = state
            .tables
            .get(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        Ok(u64::try_from(table.rows.len()).unwrap_or(u64::MAX))
    }

    fn column_totals(&self, schema: &SchemaDefinition) -> Result<ColumnTotals, RecordStoreError> {
        let state = self.lock();
        let table = state
            .tables
            .get(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        let mut totals = ColumnTotals::default();
        for column in schema.summable_columns() {
            let sum = table
                .rows
                .values()
                .map(|row| row.metric(column.name.as_str()))
                .fold(0_i64, i64::saturating_add);
            totals.sums.insert(column.name.to_string(), sum);
        }
        totals.grand_total = table
            .rows
            .values()
            .map(|row| row.total)
            .fold(0_i64, i64::saturating_add);
        Ok(totals)
    }

    fn recalculate_totals(&self, schema: &SchemaDefinition) -> Result<u64, RecordStoreError> {
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(schema.name.as_str())
            .ok_or_else(|| RecordStoreError::query(missing_relation(schema.name.as_str())))?;
        for row in table.rows.values_mut() {
            row.total = total_of(&schema.columns, &row.values);
        }
        Ok(u64::try_from(table.rows.len()).unwrap_or(u64::MAX))
    }
}

impl SummaryStore for InMemoryDatabase {
    fn rebuild(&self, plan: &SummaryPlan) -> Result<u64, SummaryStoreError> {
        let mut state = self.lock();
        let source = state
            .tables
            .get(plan.source.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.source.as_str())))?;
        let cells = source.aggregate(plan, None);
        let written = u64::try_from(cells.len()).unwrap_or(u64::MAX);
        let summary = MemorySummary {
            metrics: plan.metric_names().map(str::to_owned).collect(),
            cells: cells
                .into_iter()
                .map(|cell| ((cell.month, cell.sub_unit), cell))
                .collect(),
        };
        state.summaries.insert(plan.summary.to_string(), summary);
        Ok(written)
    }

    fn aggregate_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<MonthAggregate, SummaryStoreError> {
        let state = self.lock();
        let source = state
            .tables
            .get(plan.source.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.source.as_str())))?;
        let rows: Vec<&MemoryRow> = source
            .rows
            .values()
            .filter(|row| row.key.sub_unit == sub_unit && MonthKey::of(row.key.date) == month)
            .collect();
        let sums = plan
            .metric_names()
            .map(|metric| {
                let sum = rows
                    .iter()
                    .map(|row| row.metric(metric))
                    .fold(0_i64, i64::saturating_add);
                (metric.to_owned(), sum)
            })
            .collect();
        Ok(MonthAggregate {
            row_count: u64::try_from(rows.len()).unwrap_or(u64::MAX),
            sums,
        })
    }

    fn find_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<Option<SummaryCell>, SummaryStoreError> {
        let state = self.lock();
        let summary = state
            .summaries
            .get(plan.summary.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.summary.as_str())))?;
        Ok(summary.cells.get(&(month, sub_unit)).cloned())
    }

    fn insert_cell(&self, plan: &SummaryPlan, cell: &SummaryCell) -> Result<(), SummaryStoreError> {
        let mut state = self.lock();
        let summary = state
            .summaries
            .get_mut(plan.summary.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.summary.as_str())))?;
        if summary.cells.contains_key(&(cell.month, cell.sub_unit)) {
            return Err(SummaryStoreError::query(
                "duplicate key value violates unique constraint",
            ));
        }
        summary
            .cells
            .insert((cell.month, cell.sub_unit), cell.clone());
        Ok(())
    }

    fn update_cell(&self, plan: &SummaryPlan, cell: &SummaryCell) -> Result<bool, SummaryStoreError> {
        let mut state = self.lock();
        let summary = state
            .summaries
            .get_mut(plan.summary.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.summary.as_str())))?;
        match summary.cells.get_mut(&(cell.month, cell.sub_unit)) {
            Some(stored) => {
                stored.metrics.clone_from(&cell.metrics);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_cell(
        &self,
        plan: &SummaryPlan,
        sub_unit: SubUnitId,
        month: MonthKey,
    ) -> Result<bool, SummaryStoreError> {
        let mut state = self.lock();
        let summary = state
            .summaries
            .get_mut(plan.summary.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.summary.as_str())))?;
        Ok(summary.cells.remove(&(month, sub_unit)).is_some())
    }

    fn list_cells(
        &self,
        plan: &SummaryPlan,
        year: Option<i32>,
    ) -> Result<Vec<SummaryCell>, SummaryStoreError> {
        let state = self.lock();
        let summary = state
            .summaries
            .get(plan.summary.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.summary.as_str())))?;
        Ok(summary
            .cells
            .values()
            .filter(|cell| year.is_none_or(|wanted| wanted == cell.month.year()))
            .cloned()
            .collect())
    }

    fn aggregate_raw(
        &self,
        plan: &SummaryPlan,
        year: Option<i32>,
    ) -> Result<Vec<SummaryCell>, SummaryStoreError> {
        let state = self.lock();
        let source = state
            .tables
            .get(plan.source.as_str())
            .ok_or_else(|| SummaryStoreError::query(missing_relation(plan.source.as_str())))?;
        Ok(source.aggregate(plan, year))
    }

    fn drop_summary(&self, summary: &SqlIdentifier) -> Result<(), SummaryStoreError> {
        self.lock().summaries.remove(summary.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Sanity checks that the double reports the physical layout faithfully.

    use super::*;
    use crate::domain::identifier::RESERVED_COLUMNS;
    use crate::domain::schema::{ColumnSpec, SchemaSpec};
    use rstest::rstest;

    #[rstest]
    fn created_tables_expose_reserved_and_declared_columns() {
        let database = InMemoryDatabase::new();
        let spec = SchemaSpec {
            name: "surat".to_owned(),
            display_name: "Surat".to_owned(),
            description: None,
            columns: vec![ColumnSpec::integer("jumlah", "Jumlah")],
        };
        let draft = SchemaDraft::from_spec(&spec, true).expect("valid spec");

        database.create_with_table(&draft).expect("created");
        let columns = database.table_columns("surat").expect("catalog read");

        let names: Vec<_> = columns.iter().map(|column| column.name.as_str()).collect();
        let mut expected: Vec<&str> = RESERVED_COLUMNS.to_vec();
        expected.push("jumlah");
        assert_eq!(names, expected);
    }
}
