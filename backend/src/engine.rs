//! Engine facade wiring the services over one set of adapters.
//!
//! Every service shares the same registry, catalog and cache, so a write made
//! through [`Engine::records`] invalidates what [`Engine::statistics`] has
//! cached and refreshes the summary owned by [`Engine::summaries`].

use std::sync::Arc;

use mockable::DefaultClock;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EngineSettings;
use crate::domain::cache::CacheService;
use crate::domain::ports::{CatalogInspector, RecordStore, SchemaRegistry, SummaryStore};
use crate::domain::schema::{SchemaDefinition, SchemaId};
use crate::domain::summary::SummaryHealth;
use crate::domain::{
    RebuildReport, RecordService, SchemaError, SchemaService, StatisticsService, SummaryError,
    SummaryMaterializer,
};
use crate::outbound::cache::select_backend;
use crate::outbound::persistence::{
    DbPool, DieselCatalogInspector, DieselRecordStore, DieselSchemaRegistry, DieselSummaryStore,
    PoolError,
};

/// Failures of engine-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no database URL configured; set TALLYHOUSE_DATABASE_URL or DATABASE_URL")]
    MissingDatabaseUrl,
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
}

/// Record service whose summary hand-off is the engine's materializer.
pub type EngineRecords<G, R, S, C> = RecordService<G, R, SummaryMaterializer<S, C>>;

/// All engine services over registry `G`, catalog `C`, records `R` and
/// summaries `S`.
pub struct Engine<G, C, R, S> {
    schemas: SchemaService<G, C>,
    records: EngineRecords<G, R, S, C>,
    summaries: Arc<SummaryMaterializer<S, C>>,
    statistics: StatisticsService<G, R, S, C>,
    cache: Arc<CacheService>,
}

impl<G, C, R, S> Engine<G, C, R, S> {
    /// Wire every service over the given adapters.
    pub fn new(
        registry: Arc<G>,
        catalog: Arc<C>,
        records: Arc<R>,
        summaries: Arc<S>,
        cache: Arc<CacheService>,
    ) -> Self {
        let materializer = Arc::new(SummaryMaterializer::new(summaries, Arc::clone(&catalog)));
        Self {
            schemas: SchemaService::new(Arc::clone(&registry), catalog, Arc::clone(&cache)),
            records: RecordService::new(
                Arc::clone(&registry),
                Arc::clone(&records),
                Arc::clone(&materializer),
                Arc::clone(&cache),
            ),
            statistics: StatisticsService::new(
                registry,
                records,
                Arc::clone(&materializer),
                Arc::clone(&cache),
            ),
            summaries: materializer,
            cache,
        }
    }

    /// Schema lifecycle operations.
    pub fn schemas(&self) -> &SchemaService<G, C> {
        &self.schemas
    }

    /// Record writes.
    pub fn records(&self) -> &EngineRecords<G, R, S, C> {
        &self.records
    }

    /// Summary rebuilds, recomputes and health checks.
    pub fn summaries(&self) -> &SummaryMaterializer<S, C> {
        &self.summaries
    }

    /// Cached statistics.
    pub fn statistics(&self) -> &StatisticsService<G, R, S, C> {
        &self.statistics
    }

    /// The shared cache.
    pub fn cache(&self) -> &CacheService {
        &self.cache
    }
}

impl<G, C, R, S> Engine<G, C, R, S>
where
    G: SchemaRegistry,
    C: CatalogInspector,
    R: RecordStore,
    S: SummaryStore,
{
    /// Delete a schema, its physical table and its summary table.
    ///
    /// The summary drop is best-effort: a failure is logged and the schema
    /// stays deleted.
    pub fn delete_schema(&self, id: SchemaId) -> Result<SchemaDefinition, EngineError> {
        let removed = self.schemas.delete_schema(id)?;
        if let Err(error) = self.summaries.drop_summary(&removed) {
            warn!(
                schema = %removed.name,
                error = %error,
                "summary table left behind after schema delete"
            );
        }
        Ok(removed)
    }

    /// Rebuild the summary of schema `id` and drop its cached reads.
    pub fn rebuild_summary(&self, id: SchemaId) -> Result<RebuildReport, EngineError> {
        let schema = self.schemas.get_schema(id)?;
        let report = self.summaries.rebuild(&schema)?;
        self.cache.invalidate_schema_data(id);
        Ok(report)
    }

    /// Compare the summary of schema `id` with its raw rows.
    pub fn summary_health(&self, id: SchemaId) -> Result<SummaryHealth, EngineError> {
        let schema = self.schemas.get_schema(id)?;
        Ok(self.summaries.check_health(&schema)?)
    }
}

/// Engine over the PostgreSQL adapters.
pub type PostgresEngine =
    Engine<DieselSchemaRegistry, DieselCatalogInspector, DieselRecordStore, DieselSummaryStore>;

impl PostgresEngine {
    /// Build the pool, apply registry migrations and pick a cache backend.
    ///
    /// # Errors
    ///
    /// Fails when no database URL is configured, the pool cannot be built or
    /// migrations do not apply. An unreachable Redis is not an error.
    pub fn connect(settings: &EngineSettings) -> Result<Self, EngineError> {
        let config = settings
            .to_pool_config()
            .ok_or(EngineError::MissingDatabaseUrl)?;
        let pool = DbPool::new(config)?;
        pool.run_migrations()?;

        let backend = select_backend(&settings.to_cache_settings(), Arc::new(DefaultClock));
        info!(backend = backend.name(), "engine connected");
        let cache = Arc::new(CacheService::with_ttls(backend, settings.cache_ttls()));
        Ok(Self::new(
            Arc::new(DieselSchemaRegistry::new(pool.clone())),
            Arc::new(DieselCatalogInspector::new(pool.clone())),
            Arc::new(DieselRecordStore::new(pool.clone())),
            Arc::new(DieselSummaryStore::new(pool)),
            cache,
        ))
    }
}

#[cfg(test)]
mod tests {
    //! Facade behaviour over the in-memory adapters.

    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use mockable::DefaultClock;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::domain::schema::{ColumnSpec, SchemaSpec};
    use crate::domain::record::{RecordValues, SubUnitId};
    use crate::test_support::{InMemoryDatabase, MemoryEngine, memory_engine};

    struct Harness {
        database: Arc<InMemoryDatabase>,
        engine: MemoryEngine,
        schema: SchemaDefinition,
    }

    #[fixture]
    fn harness() -> Harness {
        let database = Arc::new(InMemoryDatabase::new());
        let engine = memory_engine(&database, Arc::new(DefaultClock));
        let schema = engine
            .schemas()
            .create_schema(&SchemaSpec {
                name: "kegiatan".to_owned(),
                display_name: "Kegiatan".to_owned(),
                description: None,
                columns: vec![ColumnSpec::integer("peserta", "Peserta")],
            })
            .expect("schema created");
        Harness {
            database,
            engine,
            schema,
        }
    }

    fn values(peserta: i64) -> RecordValues {
        BTreeMap::from([("peserta".to_owned(), json!(peserta))])
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 2).expect("valid date")
    }

    #[rstest]
    fn deleting_a_schema_drops_its_summary(harness: Harness) {
        let Harness {
            database,
            engine,
            schema,
        } = harness;
        engine.rebuild_summary(schema.id).expect("rebuild");
        let summary = engine.summaries().summary_table(&schema).expect("name");
        assert!(database.has_table(summary.as_str()));

        engine.delete_schema(schema.id).expect("delete");

        assert!(!database.has_table(schema.name.as_str()));
        assert!(!database.has_table(summary.as_str()));
    }

    #[rstest]
    fn deleting_without_a_summary_succeeds(harness: Harness) {
        let removed = harness
            .engine
            .delete_schema(harness.schema.id)
            .expect("delete");
        assert_eq!(removed.id, harness.schema.id);
    }

    #[rstest]
    fn deleting_an_unknown_schema_fails(harness: Harness) {
        let outcome = harness.engine.delete_schema(SchemaId::new(999));
        assert!(matches!(
            outcome,
            Err(EngineError::Schema(SchemaError::NotFound { .. }))
        ));
    }

    #[rstest]
    fn rebuild_refreshes_cached_monthly_totals(harness: Harness) {
        let Harness { engine, schema, .. } = harness;
        engine
            .records()
            .upsert(&schema, SubUnitId::new(1), date(), &values(4))
            .expect("upsert");
        let before = engine
            .statistics()
            .monthly_totals(schema.id, 2025)
            .expect("totals");

        engine.rebuild_summary(schema.id).expect("rebuild");
        let after = engine
            .statistics()
            .monthly_totals(schema.id, 2025)
            .expect("totals");

        assert_ne!(before.source, after.source);
        assert_eq!(before.months, after.months);
    }

    #[rstest]
    fn health_reports_an_absent_summary(harness: Harness) {
        let health = harness
            .engine
            .summary_health(harness.schema.id)
            .expect("health");
        assert!(!health.exists);
    }
}
