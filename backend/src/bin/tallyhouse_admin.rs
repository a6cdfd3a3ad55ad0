//! Administrative CLI for schemas, records, summaries and the cache.
//!
//! Results are printed to stdout as JSON; logs go to stderr.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use ortho_config::OrthoConfig;
use serde::Serialize;
use tallyhouse::config::EngineSettings;
use tallyhouse::domain::record::RecordValues;
use tallyhouse::domain::schema::{ColumnSpec, ColumnType, SchemaSpec, SchemaUpdate, display_name_for};
use tallyhouse::domain::{RecordId, SchemaId, SubUnitId};
use tallyhouse::PostgresEngine;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

/// `tallyhouse-admin` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "tallyhouse-admin",
    about = "Manage runtime-defined metric tables and their monthly summaries",
    version
)]
struct CliArgs {
    /// Database connection URL. Overrides `TALLYHOUSE_DATABASE_URL`.
    #[arg(long = "database-url", value_name = "url", global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Schema registry operations.
    #[command(subcommand)]
    Schema(SchemaCommand),
    /// Record writes and reads.
    #[command(subcommand)]
    Record(RecordCommand),
    /// Monthly summary maintenance.
    #[command(subcommand)]
    Summary(SummaryCommand),
    /// Cached statistics.
    #[command(subcommand)]
    Stats(StatsCommand),
    /// Cache inspection.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Debug, Subcommand)]
enum SchemaCommand {
    /// List registered schemas.
    List,
    /// Show one schema.
    Show { id: i32 },
    /// Show the default schema.
    Default,
    /// Create a schema and its physical table.
    Create(CreateSchemaArgs),
    /// Register a table that already exists.
    Register {
        table: String,
        #[arg(long = "display-name", default_value = "")]
        display_name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Tables that could be registered.
    Candidates,
    /// Change display metadata or promote to default.
    Update {
        id: i32,
        #[arg(long = "display-name")]
        display_name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "make-default")]
        make_default: bool,
    },
    /// Delete a schema with its physical and summary tables.
    Delete { id: i32 },
}

#[derive(Debug, Args)]
struct CreateSchemaArgs {
    /// Table name; sanitized before validation.
    name: String,
    #[arg(long = "display-name")]
    display_name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Column as `name:type[:required][:nosum]`; repeatable.
    #[arg(long = "column", value_name = "name:type", value_parser = parse_column)]
    columns: Vec<ColumnSpec>,
}

#[derive(Debug, Args)]
struct RecordTarget {
    /// Schema id.
    schema: i32,
    #[arg(long = "unit")]
    sub_unit: i32,
    #[arg(long, value_parser = parse_day)]
    date: NaiveDate,
    /// Column values as a JSON object.
    #[arg(long, value_parser = parse_values)]
    values: RecordValues,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    /// Insert or additively merge the row for a sub-unit and date.
    Upsert(RecordTarget),
    /// Insert without merging.
    Create(RecordTarget),
    /// Read one row.
    Get { schema: i32, id: i64 },
    /// Overwrite columns of one row.
    Update {
        schema: i32,
        id: i64,
        #[arg(long, value_parser = parse_values)]
        values: RecordValues,
    },
    /// Delete one row.
    Delete { schema: i32, id: i64 },
    /// Recompute `total` for every row.
    Recalculate { schema: i32 },
}

#[derive(Debug, Subcommand)]
enum SummaryCommand {
    /// Drop and rebuild the summary table.
    Rebuild { schema: i32 },
    /// Compare the summary table with the raw rows.
    Health { schema: i32 },
    /// Recompute one cell.
    Recompute {
        schema: i32,
        #[arg(long = "unit")]
        sub_unit: i32,
        #[arg(long, value_parser = parse_day)]
        date: NaiveDate,
    },
}

#[derive(Debug, Subcommand)]
enum StatsCommand {
    /// Row count, grand total and per-column sums.
    Table { schema: i32 },
    /// Twelve months of totals.
    Monthly {
        schema: i32,
        #[arg(long)]
        year: i32,
    },
    /// Figures across every schema.
    Dashboard,
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    /// Backend, size and hit rate.
    Stats,
    /// Remove every entry.
    Clear,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(error) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .try_init()
    {
        warn!(error = %error, "tracing init failed");
    }

    let args = CliArgs::parse();
    let mut settings = EngineSettings::load_from_iter([OsString::from("tallyhouse-admin")])
        .wrap_err("load engine settings")?;
    if let Some(url) = args.database_url {
        if url.trim().is_empty() {
            return Err(eyre!("--database-url must not be empty when provided"));
        }
        settings.database_url = Some(url);
    }

    let engine = PostgresEngine::connect(&settings).wrap_err("connect engine")?;
    run(&engine, args.command)
}

fn run(engine: &PostgresEngine, command: Command) -> Result<()> {
    match command {
        Command::Schema(command) => run_schema(engine, command),
        Command::Record(command) => run_record(engine, command),
        Command::Summary(command) => run_summary(engine, command),
        Command::Stats(command) => run_stats(engine, command),
        Command::Cache(CacheCommand::Stats) => emit(&engine.cache().stats()),
        Command::Cache(CacheCommand::Clear) => {
            engine.cache().clear();
            emit(&serde_json::json!({ "cleared": true }))
        }
    }
}

fn run_schema(engine: &PostgresEngine, command: SchemaCommand) -> Result<()> {
    let schemas = engine.schemas();
    match command {
        SchemaCommand::List => emit(&schemas.list_schemas()?),
        SchemaCommand::Show { id } => emit(&schemas.get_schema(SchemaId::new(id))?),
        SchemaCommand::Default => emit(&schemas.default_schema()?),
        SchemaCommand::Create(args) => {
            let display_name = args
                .display_name
                .unwrap_or_else(|| display_name_for(&args.name));
            let spec = SchemaSpec {
                name: args.name,
                display_name,
                description: args.description,
                columns: args.columns,
            };
            emit(&schemas.create_schema(&spec)?)
        }
        SchemaCommand::Register {
            table,
            display_name,
            description,
        } => emit(&schemas.register_existing(&table, &display_name, description)?),
        SchemaCommand::Candidates => emit(&schemas.candidate_tables()?),
        SchemaCommand::Update {
            id,
            display_name,
            description,
            make_default,
        } => {
            let update = SchemaUpdate {
                display_name,
                description: description.map(|text| Some(text).filter(|text| !text.is_empty())),
                make_default,
            };
            emit(&schemas.update_schema(SchemaId::new(id), &update)?)
        }
        SchemaCommand::Delete { id } => emit(&engine.delete_schema(SchemaId::new(id))?),
    }
}

fn run_record(engine: &PostgresEngine, command: RecordCommand) -> Result<()> {
    let records = engine.records();
    match command {
        RecordCommand::Upsert(target) => emit(&records.upsert_by_id(
            SchemaId::new(target.schema),
            SubUnitId::new(target.sub_unit),
            target.date,
            &target.values,
        )?),
        RecordCommand::Create(target) => {
            let schema = engine.schemas().get_schema(SchemaId::new(target.schema))?;
            emit(&records.create(
                &schema,
                SubUnitId::new(target.sub_unit),
                target.date,
                &target.values,
            )?)
        }
        RecordCommand::Get { schema, id } => {
            let schema = engine.schemas().get_schema(SchemaId::new(schema))?;
            emit(&records.get_record(&schema, RecordId::new(id))?)
        }
        RecordCommand::Update { schema, id, values } => {
            let schema = engine.schemas().get_schema(SchemaId::new(schema))?;
            emit(&records.update_record(&schema, RecordId::new(id), &values)?)
        }
        RecordCommand::Delete { schema, id } => {
            let schema = engine.schemas().get_schema(SchemaId::new(schema))?;
            emit(&records.delete_record(&schema, RecordId::new(id))?)
        }
        RecordCommand::Recalculate { schema } => {
            let schema = engine.schemas().get_schema(SchemaId::new(schema))?;
            emit(&serde_json::json!({ "rows": records.recalculate_totals(&schema)? }))
        }
    }
}

fn run_summary(engine: &PostgresEngine, command: SummaryCommand) -> Result<()> {
    match command {
        SummaryCommand::Rebuild { schema } => emit(&engine.rebuild_summary(SchemaId::new(schema))?),
        SummaryCommand::Health { schema } => emit(&engine.summary_health(SchemaId::new(schema))?),
        SummaryCommand::Recompute {
            schema,
            sub_unit,
            date,
        } => {
            let schema = engine.schemas().get_schema(SchemaId::new(schema))?;
            let action = engine
                .summaries()
                .recompute_cell(&schema, SubUnitId::new(sub_unit), date);
            engine.cache().invalidate_schema_data(schema.id);
            emit(&action)
        }
    }
}

fn run_stats(engine: &PostgresEngine, command: StatsCommand) -> Result<()> {
    let statistics = engine.statistics();
    match command {
        StatsCommand::Table { schema } => emit(&statistics.table_statistics(SchemaId::new(schema))?),
        StatsCommand::Monthly { schema, year } => {
            emit(&statistics.monthly_totals(SchemaId::new(schema), year)?)
        }
        StatsCommand::Dashboard => emit(&statistics.dashboard_overview()?),
    }
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).wrap_err("render output")?;
    println!("{rendered}");
    Ok(())
}

fn parse_column(raw: &str) -> Result<ColumnSpec, String> {
    let mut parts = raw.split(':').map(str::trim);
    let name = parts
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| format!("column `{raw}` has no name"))?;
    let column_type = parts
        .next()
        .ok_or_else(|| format!("column `{raw}` has no type"))?
        .parse::<ColumnType>()
        .map_err(|error| error.to_string())?;
    let display_name = display_name_for(name);
    let mut spec = match column_type {
        ColumnType::Integer => ColumnSpec::integer(name, display_name),
        ColumnType::Text => ColumnSpec::text(name, display_name),
        ColumnType::Date => ColumnSpec::date(name, display_name),
    };
    for flag in parts {
        spec = match flag {
            "required" => spec.required(),
            "nosum" => spec.not_summable(),
            other => return Err(format!("unknown column flag `{other}`")),
        };
    }
    Ok(spec)
}

fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|error| format!("expected YYYY-MM-DD: {error}"))
}

fn parse_values(raw: &str) -> Result<RecordValues, String> {
    serde_json::from_str(raw).map_err(|error| format!("values must be a JSON object: {error}"))
}

#[cfg(test)]
mod tests {
    //! Unit tests for CLI parsing helpers.

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn columns_parse_with_flags() {
        let spec = parse_column("jumlah_surat:integer:required:nosum").expect("column parses");
        assert_eq!(spec.name, "jumlah_surat");
        assert_eq!(spec.display_name, "Jumlah Surat");
        assert!(spec.is_required);
        assert!(!spec.is_summable);
    }

    #[rstest]
    #[case("")]
    #[case("nomor")]
    #[case("nomor:uuid")]
    #[case("nomor:text:unique")]
    fn malformed_columns_are_rejected(#[case] raw: &str) {
        assert!(parse_column(raw).is_err());
    }

    #[rstest]
    fn values_must_be_an_object() {
        let values = parse_values(r#"{"a": 3, "b": "4"}"#).expect("object parses");
        assert_eq!(values.get("a"), Some(&json!(3)));
        assert!(parse_values("[1, 2]").is_err());
    }

    #[rstest]
    fn commands_parse() {
        let args = CliArgs::try_parse_from([
            "tallyhouse-admin",
            "record",
            "upsert",
            "3",
            "--unit",
            "5",
            "--date",
            "2025-03-01",
            "--values",
            r#"{"surat_masuk": 10}"#,
        ])
        .expect("arguments parse");
        assert!(matches!(
            args.command,
            Command::Record(RecordCommand::Upsert(RecordTarget { schema: 3, sub_unit: 5, .. }))
        ));
    }
}
