//! Tests for the summary materializer.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::*;
use crate::domain::ports::{CatalogColumn, MockCatalogInspector, MockSummaryStore};
use crate::domain::schema::SchemaId;
use crate::domain::summary::MonthAggregate;
use rstest::{fixture, rstest};

const SUMMARY: &str = "table_4_monthly_summary";

#[fixture]
fn schema() -> SchemaDefinition {
    SchemaDefinition {
        id: SchemaId::new(4),
        name: SqlIdentifier::new("surat").expect("valid name"),
        display_name: "Surat".to_owned(),
        description: None,
        is_default: true,
        columns: Vec::new(),
    }
}

fn column(name: &str, data_type: &str) -> CatalogColumn {
    CatalogColumn {
        name: name.to_owned(),
        data_type: data_type.to_owned(),
        is_nullable: false,
    }
}

fn source_columns() -> Vec<CatalogColumn> {
    vec![
        column("id", "integer"),
        column("unit_kerja_id", "integer"),
        column("tanggal", "date"),
        column("total", "integer"),
        column("jumlah", "integer"),
    ]
}

fn summary_columns() -> Vec<CatalogColumn> {
    vec![
        column("month", "character varying"),
        column("year", "integer"),
        column("unit_kerja_id", "integer"),
        column("total", "bigint"),
        column("jumlah", "bigint"),
    ]
}

fn catalog(summary_exists: bool) -> MockCatalogInspector {
    let mut catalog = MockCatalogInspector::new();
    catalog
        .expect_table_columns()
        .withf(|table| table == SUMMARY)
        .returning(move |_| {
            Ok(if summary_exists {
                summary_columns()
            } else {
                Vec::new()
            })
        });
    catalog
        .expect_table_columns()
        .withf(|table| table == "surat")
        .returning(|_| Ok(source_columns()));
    catalog
}

fn materializer(
    store: MockSummaryStore,
    catalog: MockCatalogInspector,
) -> SummaryMaterializer<MockSummaryStore, MockCatalogInspector> {
    SummaryMaterializer::new(Arc::new(store), Arc::new(catalog))
}

fn march() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date")
}

#[rstest]
fn recompute_is_a_no_op_without_a_summary(schema: SchemaDefinition) {
    let mut store = MockSummaryStore::new();
    store.expect_aggregate_cell().never();
    store.expect_insert_cell().never();

    let action = materializer(store, catalog(false)).recompute_cell(
        &schema,
        SubUnitId::new(1),
        march(),
    );

    assert_eq!(action, CellAction::NoSummary);
}

#[rstest]
fn recompute_deletes_cells_without_raw_rows(schema: SchemaDefinition) {
    let mut store = MockSummaryStore::new();
    store
        .expect_aggregate_cell()
        .times(1)
        .return_once(|_, _, _| Ok(MonthAggregate::default()));
    store
        .expect_delete_cell()
        .withf(|plan, unit, month| {
            plan.summary.as_str() == SUMMARY && unit.get() == 1 && month.label() == "2025-03"
        })
        .times(1)
        .return_once(|_, _, _| Ok(true));
    store.expect_update_cell().never();

    let action = materializer(store, catalog(true)).recompute_cell(
        &schema,
        SubUnitId::new(1),
        march(),
    );

    assert_eq!(action, CellAction::Deleted);
}

#[rstest]
#[case(true, CellAction::Updated)]
#[case(false, CellAction::Inserted)]
fn recompute_updates_or_inserts(
    schema: SchemaDefinition,
    #[case] cell_exists: bool,
    #[case] expected: CellAction,
) {
    let mut store = MockSummaryStore::new();
    store.expect_aggregate_cell().times(1).return_once(|_, _, _| {
        Ok(MonthAggregate {
            row_count: 2,
            sums: BTreeMap::from([("total".to_owned(), 12), ("jumlah".to_owned(), 12)]),
        })
    });
    store
        .expect_update_cell()
        .withf(|_, cell| cell.metric("jumlah") == 12)
        .times(1)
        .return_once(move |_, _| Ok(cell_exists));
    store
        .expect_insert_cell()
        .times(usize::from(!cell_exists))
        .returning(|_, _| Ok(()));

    let action = materializer(store, catalog(true)).recompute_cell(
        &schema,
        SubUnitId::new(1),
        march(),
    );

    assert_eq!(action, expected);
}

#[rstest]
fn recompute_swallows_store_failures(schema: SchemaDefinition) {
    let mut store = MockSummaryStore::new();
    store
        .expect_aggregate_cell()
        .times(1)
        .return_once(|_, _, _| Err(SummaryStoreError::query("deadlock detected")));

    let action = materializer(store, catalog(true)).recompute_cell(
        &schema,
        SubUnitId::new(1),
        march(),
    );

    assert_eq!(action, CellAction::Failed);
}

#[rstest]
fn rebuild_refuses_tables_without_key_columns(schema: SchemaDefinition) {
    let mut store = MockSummaryStore::new();
    store.expect_rebuild().never();
    let mut catalog = MockCatalogInspector::new();
    catalog
        .expect_table_columns()
        .returning(|_| Ok(vec![column("id", "integer"), column("jumlah", "integer")]));

    let error = materializer(store, catalog)
        .rebuild(&schema)
        .expect_err("missing tanggal");

    assert!(matches!(
        error,
        SummaryError::Plan(SummaryPlanError::MissingColumn { column: "tanggal", .. })
    ));
}

#[rstest]
fn rebuild_reports_metrics_and_rows(schema: SchemaDefinition) {
    let mut store = MockSummaryStore::new();
    store
        .expect_rebuild()
        .withf(|plan| plan.metric_names().eq(["total", "jumlah"]))
        .times(1)
        .return_once(|_| Ok(6));

    let report = materializer(store, catalog(false))
        .rebuild(&schema)
        .expect("rebuild succeeds");

    assert_eq!(report.summary_table, SUMMARY);
    assert_eq!(report.rows_written, 6);
    assert_eq!(report.metrics, ["total", "jumlah"]);
}

#[rstest]
#[case(true, MonthlySource::Summary)]
#[case(false, MonthlySource::Raw)]
fn monthly_reads_prefer_the_summary(
    schema: SchemaDefinition,
    #[case] summary_exists: bool,
    #[case] expected: MonthlySource,
) {
    let mut store = MockSummaryStore::new();
    store
        .expect_list_cells()
        .times(usize::from(summary_exists))
        .returning(|_, _| Ok(Vec::new()));
    store
        .expect_aggregate_raw()
        .withf(|_, year| *year == Some(2025))
        .times(usize::from(!summary_exists))
        .returning(|_, _| Ok(Vec::new()));

    let monthly = materializer(store, catalog(summary_exists))
        .monthly_cells(&schema, 2025)
        .expect("monthly read");

    assert_eq!(monthly.source, expected);
}

#[rstest]
fn health_of_a_missing_summary_is_absent(schema: SchemaDefinition) {
    let store = MockSummaryStore::new();

    let health = materializer(store, catalog(false))
        .check_health(&schema)
        .expect("health check");

    assert!(!health.exists);
    assert!(health.is_consistent());
}
