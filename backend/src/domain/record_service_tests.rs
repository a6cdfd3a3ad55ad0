//! Tests for record writes against the in-memory database.

use std::sync::Arc;

use super::*;
use crate::domain::ports::MockSummaryRefresh;
use crate::domain::record::CellValue;
use crate::domain::schema::{ColumnSpec, SchemaDraft, SchemaSpec};
use crate::outbound::cache::{DEFAULT_MAX_ENTRIES, InMemoryCacheBackend};
use crate::test_support::InMemoryDatabase;
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::json;

type Service = RecordService<InMemoryDatabase, InMemoryDatabase, MockSummaryRefresh>;

struct Harness {
    database: Arc<InMemoryDatabase>,
    cache: Arc<CacheService>,
    schema: SchemaDefinition,
}

#[fixture]
fn harness() -> Harness {
    let database = Arc::new(InMemoryDatabase::new());
    let spec = SchemaSpec {
        name: "surat".to_owned(),
        display_name: "Surat".to_owned(),
        description: None,
        columns: vec![
            ColumnSpec::integer("a", "A"),
            ColumnSpec::integer("b", "B"),
            ColumnSpec::integer("nomor", "Nomor").not_summable(),
            ColumnSpec::text("catatan", "Catatan"),
        ],
    };
    let draft = SchemaDraft::from_spec(&spec, true).expect("valid spec");
    let schema = database.create_with_table(&draft).expect("table created");
    let cache = Arc::new(CacheService::new(Arc::new(InMemoryCacheBackend::new(
        DEFAULT_MAX_ENTRIES,
        Arc::new(DefaultClock),
    ))));
    Harness {
        database,
        cache,
        schema,
    }
}

impl Harness {
    fn service(&self, refresh: MockSummaryRefresh) -> Service {
        RecordService::new(
            Arc::clone(&self.database),
            Arc::clone(&self.database),
            Arc::new(refresh),
            Arc::clone(&self.cache),
        )
    }
}

fn quiet_refresh() -> MockSummaryRefresh {
    let mut refresh = MockSummaryRefresh::new();
    refresh
        .expect_refresh_cell()
        .returning(|_, _| CellAction::NoSummary);
    refresh
}

fn values(raw: serde_json::Value) -> RecordValues {
    serde_json::from_value(raw).expect("object")
}

fn day(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
}

#[rstest]
fn repeated_upserts_accumulate(harness: Harness) {
    let service = harness.service(quiet_refresh());
    let unit = SubUnitId::new(1);

    let first = service
        .upsert(&harness.schema, unit, day("2025-01-10"), &values(json!({"a": 10})))
        .expect("first upsert");
    let second = service
        .upsert(&harness.schema, unit, day("2025-01-10"), &values(json!({"a": 10})))
        .expect("second upsert");

    assert_eq!(first.action, WriteAction::Inserted);
    assert_eq!(second.action, WriteAction::Updated);
    assert_eq!(second.id, first.id);
    assert_eq!(second.total, 20);
    assert_eq!(harness.database.rows("surat").len(), 1);
}

#[rstest]
fn merge_adds_only_the_columns_provided(harness: Harness) {
    let service = harness.service(quiet_refresh());
    let unit = SubUnitId::new(2);
    let date = day("2025-02-01");

    service
        .upsert(&harness.schema, unit, date, &values(json!({"a": 3, "b": 4})))
        .expect("insert");
    let merged = service
        .upsert(&harness.schema, unit, date, &values(json!({"a": 1})))
        .expect("merge");

    let stored = service.get_record(&harness.schema, merged.id).expect("row");
    assert_eq!(stored.integer("a"), 4);
    assert_eq!(stored.integer("b"), 4);
    assert_eq!(stored.total, 8);
}

#[rstest]
fn non_summable_columns_are_overwritten_and_excluded_from_total(harness: Harness) {
    let service = harness.service(quiet_refresh());
    let unit = SubUnitId::new(1);
    let date = day("2025-02-01");

    service
        .upsert(
            &harness.schema,
            unit,
            date,
            &values(json!({"a": 2, "nomor": 100, "catatan": "pagi"})),
        )
        .expect("insert");
    let merged = service
        .upsert(
            &harness.schema,
            unit,
            date,
            &values(json!({"nomor": 7, "catatan": "sore"})),
        )
        .expect("merge");

    let stored = service.get_record(&harness.schema, merged.id).expect("row");
    assert_eq!(stored.integer("nomor"), 7);
    assert_eq!(
        stored.values.get("catatan"),
        Some(&CellValue::Text("sore".to_owned()))
    );
    assert_eq!(stored.total, 2);
}

#[rstest]
fn lenient_values_count_as_numbers_or_zero(harness: Harness) {
    let service = harness.service(quiet_refresh());

    let outcome = service
        .upsert(
            &harness.schema,
            SubUnitId::new(1),
            day("2025-03-01"),
            &values(json!({"a": "12.9", "b": "n/a", "unknown": 99})),
        )
        .expect("insert");

    assert_eq!(outcome.total, 12);
}

#[rstest]
fn writes_hand_the_affected_cell_to_the_summary(harness: Harness) {
    let mut refresh = MockSummaryRefresh::new();
    refresh
        .expect_refresh_cell()
        .withf(|schema, key| {
            schema.name.as_str() == "surat"
                && key.sub_unit.get() == 5
                && key.date == NaiveDate::from_ymd_opt(2025, 4, 30).expect("valid date")
        })
        .times(1)
        .return_const(CellAction::Updated);
    let service = harness.service(refresh);

    let outcome = service
        .upsert(
            &harness.schema,
            SubUnitId::new(5),
            day("2025-04-30"),
            &values(json!({"a": 1})),
        )
        .expect("upsert");

    assert_eq!(outcome.summary, CellAction::Updated);
}

#[rstest]
fn writes_invalidate_cached_statistics(harness: Harness) {
    let service = harness.service(quiet_refresh());
    let key = format!("stats_table:{}:cached", harness.schema.id);
    harness
        .cache
        .set(&key, &json!({"row_count": 0}), std::time::Duration::from_secs(60));

    service
        .upsert(
            &harness.schema,
            SubUnitId::new(1),
            day("2025-01-01"),
            &values(json!({"a": 1})),
        )
        .expect("upsert");

    assert_eq!(harness.cache.get(&key), None);
}

#[rstest]
fn create_always_inserts_a_new_row(harness: Harness) {
    let service = harness.service(quiet_refresh());
    let unit = SubUnitId::new(1);
    let date = day("2025-01-01");

    let first = service
        .create(&harness.schema, unit, date, &values(json!({"a": 1})))
        .expect("first");
    let second = service
        .create(&harness.schema, unit, date, &values(json!({"a": 1})))
        .expect("second");

    assert_ne!(first.id, second.id);
    assert_eq!(second.action, WriteAction::Inserted);
    assert_eq!(harness.database.rows("surat").len(), 2);
}

#[rstest]
fn update_record_replaces_values_and_recomputes_total(harness: Harness) {
    let service = harness.service(quiet_refresh());
    let inserted = service
        .upsert(
            &harness.schema,
            SubUnitId::new(1),
            day("2025-01-01"),
            &values(json!({"a": 3, "b": 4})),
        )
        .expect("insert");

    let updated = service
        .update_record(&harness.schema, inserted.id, &values(json!({"a": 10})))
        .expect("update");

    assert_eq!(updated.total, 14);
    let stored = service.get_record(&harness.schema, inserted.id).expect("row");
    assert_eq!(stored.integer("a"), 10);
}

#[rstest]
fn updating_a_missing_record_is_not_found(harness: Harness) {
    let service = harness.service(quiet_refresh());

    let error = service
        .update_record(&harness.schema, RecordId::new(404), &values(json!({"a": 1})))
        .expect_err("missing");

    assert!(matches!(error, UpsertError::RecordNotFound { id } if id.get() == 404));
}

#[rstest]
fn delete_record_refreshes_the_deleted_rows_cell(harness: Harness) {
    let mut refresh = MockSummaryRefresh::new();
    refresh
        .expect_refresh_cell()
        .times(2)
        .return_const(CellAction::Deleted);
    let service = harness.service(refresh);
    let inserted = service
        .upsert(
            &harness.schema,
            SubUnitId::new(3),
            day("2025-06-15"),
            &values(json!({"a": 1})),
        )
        .expect("insert");

    let action = service
        .delete_record(&harness.schema, inserted.id)
        .expect("delete");

    assert_eq!(action, CellAction::Deleted);
    assert!(harness.database.rows("surat").is_empty());
}

#[rstest]
fn recalculate_totals_repairs_every_row(harness: Harness) {
    let service = harness.service(quiet_refresh());
    for unit in 1..=3 {
        service
            .upsert(
                &harness.schema,
                SubUnitId::new(unit),
                day("2025-01-01"),
                &values(json!({"a": unit, "b": 1})),
            )
            .expect("insert");
    }

    let rows = service
        .recalculate_totals(&harness.schema)
        .expect("recalculate");

    assert_eq!(rows, 3);
    let totals: Vec<i64> = harness
        .database
        .rows("surat")
        .iter()
        .map(|row| row.total)
        .collect();
    assert_eq!(totals, [2, 3, 4]);
}

#[rstest]
fn upsert_by_id_requires_a_registered_schema(harness: Harness) {
    let service = harness.service(quiet_refresh());

    let error = service
        .upsert_by_id(
            SchemaId::new(99),
            SubUnitId::new(1),
            day("2025-01-01"),
            &values(json!({"a": 1})),
        )
        .expect_err("unknown schema");

    assert!(matches!(error, UpsertError::SchemaNotFound { id } if id.get() == 99));
}
