//! Cached read models: per-schema statistics, row counts, monthly totals and
//! the cross-schema dashboard overview.
//!
//! Every read goes through [`CacheService::get_or_load`]; entries are keyed
//! inside the namespace that record writes invalidate, so a cached figure
//! never outlives the next mutation of its schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::cache::{
    CacheService, DASHBOARD_STATS_KEY, MONTHLY_TOTALS_PREFIX, row_count_key, statistics_prefix,
};
use super::ports::{
    CacheKey, CacheKeyValidationError, CatalogInspector, RecordStore, RecordStoreError,
    SchemaRegistry, SchemaRegistryError, SummaryStore,
};
use super::schema::{SchemaDefinition, SchemaId};
use super::summary::MonthKey;
use super::summary_service::{MonthlySource, SummaryError, SummaryMaterializer};

/// Failures of statistics reads.
#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("schema {id} not found")]
    SchemaNotFound { id: SchemaId },
    #[error(transparent)]
    Registry(#[from] SchemaRegistryError),
    #[error(transparent)]
    Records(#[from] RecordStoreError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
    #[error("invalid cache key: {0}")]
    Key(#[from] CacheKeyValidationError),
}

/// Row count and sums of one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub schema_id: SchemaId,
    pub table: String,
    pub row_count: u64,
    pub grand_total: i64,
    /// Sum of each summable column.
    pub column_totals: BTreeMap<String, i64>,
}

/// Metric sums for one month across every sub-unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthTotal {
    pub month: MonthKey,
    pub metrics: BTreeMap<String, i64>,
}

/// Twelve months of totals for one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyTotals {
    pub schema_id: SchemaId,
    pub year: i32,
    pub source: MonthlySource,
    pub metrics: Vec<String>,
    /// January to December; months without rows carry zeros.
    pub months: Vec<MonthTotal>,
}

/// Headline figures of one schema on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaOverview {
    pub id: SchemaId,
    pub name: String,
    pub display_name: String,
    pub is_default: bool,
    pub row_count: u64,
    pub grand_total: i64,
}

/// Cross-schema dashboard aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardOverview {
    pub schema_count: usize,
    pub total_rows: u64,
    pub grand_total: i64,
    pub schemas: Vec<SchemaOverview>,
}

/// Read-side service backed by the cache.
#[derive(Clone)]
pub struct StatisticsService<G, R, S, C> {
    registry: Arc<G>,
    records: Arc<R>,
    summaries: Arc<SummaryMaterializer<S, C>>,
    cache: Arc<CacheService>,
}

impl<G, R, S, C> StatisticsService<G, R, S, C> {
    /// Create a new service over the given ports.
    pub fn new(
        registry: Arc<G>,
        records: Arc<R>,
        summaries: Arc<SummaryMaterializer<S, C>>,
        cache: Arc<CacheService>,
    ) -> Self {
        Self {
            registry,
            records,
            summaries,
            cache,
        }
    }
}

impl<G, R, S, C> StatisticsService<G, R, S, C>
where
    G: SchemaRegistry,
    R: RecordStore,
    S: SummaryStore,
    C: CatalogInspector,
{
    fn schema(&self, id: SchemaId) -> Result<SchemaDefinition, StatisticsError> {
        self.registry
            .find_by_id(id)?
            .ok_or(StatisticsError::SchemaNotFound { id })
    }

    /// Row count, grand total and per-column sums of one schema.
    pub fn table_statistics(&self, id: SchemaId) -> Result<TableStatistics, StatisticsError> {
        let key = CacheKey::derive(&statistics_prefix(id), &json!({ "view": "table" }))?;
        self.cache
            .get_or_load(&key, self.cache.ttls().default, || -> Result<_, StatisticsError> {
                let schema = self.schema(id)?;
                let totals = self.records.column_totals(&schema)?;
                Ok(TableStatistics {
                    schema_id: id,
                    table: schema.name.to_string(),
                    row_count: self.records.count(&schema)?,
                    grand_total: totals.grand_total,
                    column_totals: totals.sums,
                })
            })
    }

    /// Number of rows in one schema.
    pub fn row_count(&self, id: SchemaId) -> Result<u64, StatisticsError> {
        let key = CacheKey::new(row_count_key(id))?;
        self.cache.get_or_load(&key, self.cache.ttls().default, || -> Result<_, StatisticsError> {
            let schema = self.schema(id)?;
            Ok(self.records.count(&schema)?)
        })
    }

    /// Totals per month of `year`, summed over sub-units.
    ///
    /// Read from the summary table when it exists and from the raw rows
    /// otherwise; both paths produce the same figures when the summary is
    /// healthy.
    pub fn monthly_totals(&self, id: SchemaId, year: i32) -> Result<MonthlyTotals, StatisticsError> {
        let key = CacheKey::derive(
            MONTHLY_TOTALS_PREFIX,
            &json!({ "schema": id.get(), "year": year }),
        )?;
        self.cache
            .get_or_load(&key, self.cache.ttls().dashboard, || -> Result<_, StatisticsError> {
                let schema = self.schema(id)?;
                let monthly = self.summaries.monthly_cells(&schema, year)?;
                let mut months: BTreeMap<MonthKey, BTreeMap<String, i64>> = (1..=12)
                    .filter_map(|month| MonthKey::new(year, month).ok())
                    .map(|month| {
                        let zeros = monthly.metrics.iter().map(|name| (name.clone(), 0)).collect();
                        (month, zeros)
                    })
                    .collect();
                for cell in &monthly.cells {
                    let Some(sums) = months.get_mut(&cell.month) else {
                        continue;
                    };
                    for (name, value) in &cell.metrics {
                        let sum = sums.entry(name.clone()).or_insert(0);
                        *sum = sum.saturating_add(*value);
                    }
                }
                Ok(MonthlyTotals {
                    schema_id: id,
                    year,
                    source: monthly.source,
                    metrics: monthly.metrics,
                    months: months
                        .into_iter()
                        .map(|(month, metrics)| MonthTotal { month, metrics })
                        .collect(),
                })
            })
    }

    /// Headline figures for every registered schema.
    pub fn dashboard_overview(&self) -> Result<DashboardOverview, StatisticsError> {
        let key = CacheKey::new(DASHBOARD_STATS_KEY)?;
        self.cache
            .get_or_load(&key, self.cache.ttls().dashboard, || -> Result<_, StatisticsError> {
                let mut schemas = Vec::new();
                for schema in self.registry.list()? {
                    let totals = self.records.column_totals(&schema)?;
                    schemas.push(SchemaOverview {
                        id: schema.id,
                        row_count: self.records.count(&schema)?,
                        grand_total: totals.grand_total,
                        name: schema.name.into(),
                        display_name: schema.display_name,
                        is_default: schema.is_default,
                    });
                }
                Ok(DashboardOverview {
                    schema_count: schemas.len(),
                    total_rows: schemas
                        .iter()
                        .map(|schema| schema.row_count)
                        .fold(0_u64, u64::saturating_add),
                    grand_total: schemas
                        .iter()
                        .map(|schema| schema.grand_total)
                        .fold(0_i64, i64::saturating_add),
                    schemas,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    //! Cached reads over the in-memory database.

    use super::*;
    use crate::domain::record::{RecordKey, SubUnitId, plan_insert};
    use crate::domain::schema::{ColumnSpec, SchemaDraft, SchemaSpec};
    use crate::outbound::cache::{DEFAULT_MAX_ENTRIES, InMemoryCacheBackend};
    use crate::test_support::InMemoryDatabase;
    use chrono::NaiveDate;
    use mockable::DefaultClock;
    use rstest::{fixture, rstest};

    type Service =
        StatisticsService<InMemoryDatabase, InMemoryDatabase, InMemoryDatabase, InMemoryDatabase>;

    struct Harness {
        database: Arc<InMemoryDatabase>,
        cache: Arc<CacheService>,
        service: Service,
    }

    #[fixture]
    fn harness() -> Harness {
        let database = Arc::new(InMemoryDatabase::new());
        let cache = Arc::new(CacheService::new(Arc::new(InMemoryCacheBackend::new(
            DEFAULT_MAX_ENTRIES,
            Arc::new(DefaultClock),
        ))));
        let summaries = Arc::new(SummaryMaterializer::new(
            Arc::clone(&database),
            Arc::clone(&database),
        ));
        let service = StatisticsService::new(
            Arc::clone(&database),
            Arc::clone(&database),
            summaries,
            Arc::clone(&cache),
        );
        Harness {
            database,
            cache,
            service,
        }
    }

    fn create(database: &InMemoryDatabase, name: &str) -> SchemaDefinition {
        let spec = SchemaSpec {
            name: name.to_owned(),
            display_name: String::new(),
            description: None,
            columns: vec![ColumnSpec::integer("jumlah", "Jumlah")],
        };
        let draft = SchemaDraft::from_spec(&spec, false).expect("valid spec");
        database.create_with_table(&draft).expect("created")
    }

    fn insert(database: &InMemoryDatabase, schema: &SchemaDefinition, date: &str, jumlah: i64) {
        let values = BTreeMap::from([("jumlah".to_owned(), json!(jumlah))]);
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid date");
        database
            .insert(
                schema,
                RecordKey::new(SubUnitId::new(1), date),
                &plan_insert(&schema.columns, &values),
            )
            .expect("inserted");
    }

    #[rstest]
    fn statistics_are_served_from_cache_until_invalidated(harness: Harness) {
        let schema = create(&harness.database, "surat");
        insert(&harness.database, &schema, "2025-01-01", 5);

        let first = harness.service.table_statistics(schema.id).expect("stats");
        insert(&harness.database, &schema, "2025-01-02", 7);
        let cached = harness.service.table_statistics(schema.id).expect("stats");
        harness.cache.invalidate_schema_data(schema.id);
        let fresh = harness.service.table_statistics(schema.id).expect("stats");

        assert_eq!(first, cached);
        assert_eq!(fresh.row_count, 2);
        assert_eq!(fresh.grand_total, 12);
        assert_eq!(fresh.column_totals.get("jumlah"), Some(&12));
    }

    #[rstest]
    fn invalidating_one_schema_keeps_another_cached(harness: Harness) {
        let surat = create(&harness.database, "surat");
        let arsip = create(&harness.database, "arsip");
        insert(&harness.database, &arsip, "2025-01-01", 1);
        let cached = harness.service.table_statistics(arsip.id).expect("stats");

        insert(&harness.database, &arsip, "2025-01-02", 1);
        harness.cache.invalidate_schema_data(surat.id);

        assert_eq!(
            harness.service.table_statistics(arsip.id).expect("stats"),
            cached
        );
    }

    #[rstest]
    fn monthly_totals_fill_every_month(harness: Harness) {
        let schema = create(&harness.database, "surat");
        insert(&harness.database, &schema, "2025-03-01", 5);
        insert(&harness.database, &schema, "2025-03-20", 7);
        insert(&harness.database, &schema, "2024-03-20", 100);

        let totals = harness
            .service
            .monthly_totals(schema.id, 2025)
            .expect("monthly");

        assert_eq!(totals.source, MonthlySource::Raw);
        assert_eq!(totals.months.len(), 12);
        let jumlah: Vec<i64> = totals
            .months
            .iter()
            .map(|month| month.metrics.get("jumlah").copied().unwrap_or(-1))
            .collect();
        assert_eq!(jumlah, [0, 0, 12, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[rstest]
    fn dashboard_overview_spans_every_schema(harness: Harness) {
        let surat = create(&harness.database, "surat");
        let arsip = create(&harness.database, "arsip");
        insert(&harness.database, &surat, "2025-01-01", 2);
        insert(&harness.database, &arsip, "2025-01-01", 3);
        insert(&harness.database, &arsip, "2025-01-02", 4);

        let overview = harness.service.dashboard_overview().expect("overview");

        assert_eq!(overview.schema_count, 2);
        assert_eq!(overview.total_rows, 3);
        assert_eq!(overview.grand_total, 9);
    }

    #[rstest]
    fn unknown_schemas_are_reported(harness: Harness) {
        let error = harness
            .service
            .row_count(SchemaId::new(42))
            .expect_err("unknown schema");

        assert!(matches!(error, StatisticsError::SchemaNotFound { id } if id.get() == 42));
    }
}
