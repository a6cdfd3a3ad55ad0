//! Behaviour-driven tests for the monthly summary lifecycle.
//!
//! Scenarios drive the engine over the in-memory adapters: rows are upserted,
//! the summary is rebuilt or recomputed, and cells are read back from the
//! summary table.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use mockable::DefaultClock;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::{ScenarioState, given, scenario, then, when};
use serde_json::json;
use tallyhouse::domain::schema::{ColumnSpec, SchemaDefinition, SchemaSpec};
use tallyhouse::domain::summary_service::MonthlyCells;
use tallyhouse::domain::{MonthKey, SubUnitId};
use tallyhouse::test_support::{InMemoryDatabase, MemoryEngine, memory_engine};

const METRIC: &str = "visits";

fn january() -> MonthKey {
    MonthKey::new(2025, 1).expect("valid month")
}

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("step dates are YYYY-MM-DD")
}

// -----------------------------------------------------------------------------
// Test World
// -----------------------------------------------------------------------------

/// Test world holding the engine, its database and rebuild snapshots.
#[derive(Default, ScenarioState)]
struct SummaryWorld {
    database: Slot<Arc<InMemoryDatabase>>,
    engine: Slot<Arc<MemoryEngine>>,
    schema: Slot<SchemaDefinition>,
    snapshots: Slot<Vec<(u64, MonthlyCells)>>,
}

impl SummaryWorld {
    fn engine(&self) -> Arc<MemoryEngine> {
        self.engine.get().expect("engine should be set")
    }

    fn database(&self) -> Arc<InMemoryDatabase> {
        self.database.get().expect("database should be set")
    }

    fn schema(&self) -> SchemaDefinition {
        self.schema.get().expect("schema should be set")
    }

    fn summary_table(&self) -> String {
        self.engine()
            .summaries()
            .summary_table(&self.schema())
            .expect("summary name")
            .to_string()
    }

    fn january_cell_for(&self, unit: i32) -> Option<i64> {
        self.database()
            .summary_cell(&self.summary_table(), SubUnitId::new(unit), january())
            .map(|cell| cell.metric(METRIC))
    }

    fn rebuild(&self) {
        let engine = self.engine();
        let schema = self.schema();
        let report = engine.rebuild_summary(schema.id).expect("rebuild succeeds");
        let cells = engine
            .summaries()
            .monthly_cells(&schema, 2025)
            .expect("monthly cells");
        let mut snapshots = self.snapshots.get().unwrap_or_default();
        snapshots.push((report.rows_written, cells));
        self.snapshots.set(snapshots);
    }
}

#[fixture]
fn world() -> SummaryWorld {
    SummaryWorld::default()
}

// -----------------------------------------------------------------------------
// Given Steps
// -----------------------------------------------------------------------------

#[given("an engine with a schema counting visits")]
fn an_engine_with_a_schema_counting_visits(world: &SummaryWorld) {
    let database = Arc::new(InMemoryDatabase::new());
    let engine = memory_engine(&database, Arc::new(DefaultClock));
    let schema = engine
        .schemas()
        .create_schema(&SchemaSpec {
            name: "T".to_owned(),
            display_name: "T".to_owned(),
            description: None,
            columns: vec![ColumnSpec::integer(METRIC, "Visits")],
        })
        .expect("schema created");

    world.database.set(database);
    world.engine.set(Arc::new(engine));
    world.schema.set(schema);
}

// -----------------------------------------------------------------------------
// When Steps
// -----------------------------------------------------------------------------

#[when("unit {unit} reports {amount} visits on {date}")]
fn unit_reports_visits(world: &SummaryWorld, unit: i32, amount: i64, date: String) {
    let values = BTreeMap::from([(METRIC.to_owned(), json!(amount))]);
    world
        .engine()
        .records()
        .upsert(&world.schema(), SubUnitId::new(unit), day(&date), &values)
        .expect("upsert succeeds");
}

#[when("the summary is rebuilt")]
fn the_summary_is_rebuilt(world: &SummaryWorld) {
    world.rebuild();
}

#[when("the summary is rebuilt again")]
fn the_summary_is_rebuilt_again(world: &SummaryWorld) {
    world.rebuild();
}

#[when("every January row of unit {unit} is removed out of band")]
fn january_rows_are_removed_out_of_band(world: &SummaryWorld, unit: i32) {
    let removed = world.database().delete_rows_out_of_band(
        world.schema().name.as_str(),
        SubUnitId::new(unit),
        january(),
    );
    assert!(removed > 0, "expected rows to remove");
}

#[when("the cell for unit {unit} on {date} is recomputed")]
fn the_cell_is_recomputed(world: &SummaryWorld, unit: i32, date: String) {
    world
        .engine()
        .summaries()
        .recompute_cell(&world.schema(), SubUnitId::new(unit), day(&date));
}

#[when("every stored row is deleted through the engine")]
fn every_row_is_deleted_through_the_engine(world: &SummaryWorld) {
    let schema = world.schema();
    let engine = world.engine();
    for row in world.database().rows(schema.name.as_str()) {
        engine
            .records()
            .delete_record(&schema, row.id)
            .expect("delete succeeds");
    }
}

// -----------------------------------------------------------------------------
// Then Steps
// -----------------------------------------------------------------------------

#[then("the January cell for unit {unit} counts {amount} visits")]
fn the_january_cell_counts(world: &SummaryWorld, unit: i32, amount: i64) {
    assert_eq!(world.january_cell_for(unit), Some(amount));
}

#[then("unit {unit} has no January cell")]
fn unit_has_no_january_cell(world: &SummaryWorld, unit: i32) {
    assert_eq!(world.january_cell_for(unit), None);
}

#[then("the summary matches the raw rows")]
fn the_summary_matches_the_raw_rows(world: &SummaryWorld) {
    let health = world
        .engine()
        .summary_health(world.schema().id)
        .expect("health check");
    assert!(health.exists);
    assert!(health.is_consistent(), "drift: {:?}", health.drift);
}

#[then("both rebuilds wrote the same cells")]
fn both_rebuilds_wrote_the_same_cells(world: &SummaryWorld) {
    let snapshots = world.snapshots.get().expect("snapshots recorded");
    let [first, second] = snapshots.as_slice() else {
        panic!("expected two rebuilds, got {}", snapshots.len());
    };
    assert_eq!(first, second);
    assert_eq!(first.0, 2);
}

// -----------------------------------------------------------------------------
// Scenario Bindings
// -----------------------------------------------------------------------------

#[scenario(
    path = "tests/features/summary_lifecycle.feature",
    name = "Rebuild rolls up merged rows"
)]
fn rebuild_rolls_up_merged_rows(world: SummaryWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/summary_lifecycle.feature",
    name = "Recompute removes a cell whose rows are gone"
)]
fn recompute_removes_a_cell_whose_rows_are_gone(world: SummaryWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/summary_lifecycle.feature",
    name = "Writes after a rebuild keep the summary current"
)]
fn writes_after_a_rebuild_keep_the_summary_current(world: SummaryWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/summary_lifecycle.feature",
    name = "Deleting the last rows through the engine drops the cell"
)]
fn deleting_the_last_rows_drops_the_cell(world: SummaryWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/summary_lifecycle.feature",
    name = "Rebuilding twice is idempotent"
)]
fn rebuilding_twice_is_idempotent(world: SummaryWorld) {
    let _ = world;
}
