//! SQL text for dynamic tables.
//!
//! Pure functions over validated identifiers; every name is double-quoted via
//! [`SqlIdentifier::quoted`] and every value travels as a bind parameter.
//! Reads wrap their projection as `SELECT to_jsonb(r) AS payload FROM (...) r`
//! so one row type decodes any table shape.

use crate::domain::identifier::SqlIdentifier;
use crate::domain::record::ColumnAssignment;
use crate::domain::schema::{ColumnDefinition, ColumnType};
use crate::domain::summary::SummaryPlan;

/// Alias of the raw row count in aggregate payloads. `#` can never appear in
/// a validated identifier, so it cannot collide with a metric.
pub const ROW_COUNT_ALIAS: &str = "#row_count";
/// Alias of the grand total in column-total payloads.
pub const GRAND_TOTAL_ALIAS: &str = "#grand_total";

/// Physical column type for a declared column.
pub const fn column_sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER DEFAULT 0",
        ColumnType::Text => "TEXT",
        ColumnType::Date => "DATE",
    }
}

fn payload(inner: &str) -> String {
    format!("SELECT to_jsonb(r) AS payload FROM ({inner}) r")
}

fn index_name(table: &SqlIdentifier, suffix: &str) -> String {
    table.auxiliary("idx", suffix).quoted()
}

/// Placeholder `$n` for an assigned value.
///
/// Text binds go through the table's own row type, so a registered column of
/// any type (`NUMERIC`, `BOOLEAN`, ...) parses the text with its input
/// function instead of rejecting a `text` expression.
fn value_placeholder(table: &SqlIdentifier, assignment: &ColumnAssignment, n: usize) -> String {
    match assignment.column_type {
        ColumnType::Text => format!(
            "(jsonb_populate_record(NULL::{}, jsonb_build_object('{}', ${n}::TEXT))).{}",
            table.quoted(),
            assignment.column,
            assignment.column.quoted()
        ),
        ColumnType::Integer | ColumnType::Date => format!("${n}"),
    }
}

fn summed(column: &SqlIdentifier) -> String {
    format!("COALESCE(SUM({0}), 0)::BIGINT AS {0}", column.quoted())
}

/// `CREATE TABLE` with the reserved columns followed by the declared ones.
pub fn create_table(table: &SqlIdentifier, columns: &[ColumnDefinition]) -> String {
    let mut ddl = format!(
        concat!(
            "CREATE TABLE {} (",
            "id SERIAL PRIMARY KEY, ",
            "unit_kerja_id INTEGER NOT NULL, ",
            "tanggal DATE NOT NULL, ",
            "total INTEGER DEFAULT 0, ",
            "created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, ",
            "updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP"
        ),
        table.quoted()
    );
    for column in columns {
        ddl.push_str(&format!(
            ", {} {}",
            column.name.quoted(),
            column_sql_type(column.column_type)
        ));
    }
    ddl.push(')');
    ddl
}

/// Lookup indexes every dynamic table carries.
pub fn table_indexes(table: &SqlIdentifier) -> [String; 3] {
    let quoted = table.quoted();
    [
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} (unit_kerja_id)",
            index_name(table, "unit_kerja_id")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} (tanggal)",
            index_name(table, "tanggal")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} (unit_kerja_id, tanggal)",
            index_name(table, "unit_tanggal")
        ),
    ]
}

/// Foreign key from `unit_kerja_id` to the sub-unit table.
pub fn sub_unit_foreign_key(table: &SqlIdentifier) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY (unit_kerja_id) \
         REFERENCES unit_kerja(id) ON DELETE CASCADE",
        table.quoted(),
        table.auxiliary("fk", "unit").quoted()
    )
}

/// `DROP TABLE IF EXISTS`.
pub fn drop_table(table: &SqlIdentifier) -> String {
    format!("DROP TABLE IF EXISTS {}", table.quoted())
}

/// Transaction-scoped advisory lock keyed by a text bind.
pub const ADVISORY_LOCK: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

/// Row for (`$1` sub-unit, `$2` date) as a JSON payload.
pub fn select_row_by_key(table: &SqlIdentifier) -> String {
    payload(&format!(
        "SELECT * FROM {} WHERE unit_kerja_id = $1 AND tanggal = $2 ORDER BY id LIMIT 1",
        table.quoted()
    ))
}

/// Row for `$1` id as a JSON payload, optionally locked for update.
pub fn select_row_by_id(table: &SqlIdentifier, lock: bool) -> String {
    let locking = if lock { " FOR UPDATE" } else { "" };
    payload(&format!(
        "SELECT * FROM {} WHERE id = $1{locking}",
        table.quoted()
    ))
}

/// Insert binding `$1` sub-unit, `$2` date, then each assignment, then total.
pub fn insert_row(table: &SqlIdentifier, assignments: &[ColumnAssignment]) -> String {
    let mut columns = vec!["unit_kerja_id".to_owned(), "tanggal".to_owned()];
    columns.extend(assignments.iter().map(|assignment| assignment.column.quoted()));
    columns.push("total".to_owned());
    let mut placeholders = vec!["$1".to_owned(), "$2".to_owned()];
    placeholders.extend(
        assignments
            .iter()
            .zip(3..)
            .map(|(assignment, n)| value_placeholder(table, assignment, n)),
    );
    placeholders.push(format!("${}", assignments.len() + 3));
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING id::BIGINT AS id",
        table.quoted(),
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Update of row `$1` binding each assignment, then total.
pub fn update_row(table: &SqlIdentifier, assignments: &[ColumnAssignment]) -> String {
    let mut sets: Vec<String> = assignments
        .iter()
        .zip(2..)
        .map(|(assignment, n)| {
            format!(
                "{} = {}",
                assignment.column.quoted(),
                value_placeholder(table, assignment, n)
            )
        })
        .collect();
    sets.push(format!("total = ${}", assignments.len() + 2));
    sets.push("updated_at = CURRENT_TIMESTAMP".to_owned());
    format!(
        "UPDATE {} SET {} WHERE id = $1",
        table.quoted(),
        sets.join(", ")
    )
}

/// Delete of row `$1`, returning its key.
pub fn delete_row(table: &SqlIdentifier) -> String {
    format!(
        "DELETE FROM {} WHERE id = $1 RETURNING unit_kerja_id, tanggal",
        table.quoted()
    )
}

/// Row count aliased as `count`.
pub fn count_rows(table: &SqlIdentifier) -> String {
    format!("SELECT COUNT(*) AS count FROM {}", table.quoted())
}

/// Sums of each summable column plus the grand total.
pub fn column_totals<'a>(
    table: &SqlIdentifier,
    summable: impl IntoIterator<Item = &'a SqlIdentifier>,
) -> String {
    let mut projection: Vec<String> = summable.into_iter().map(summed).collect();
    projection.push(format!(
        "COALESCE(SUM(total), 0)::BIGINT AS \"{GRAND_TOTAL_ALIAS}\""
    ));
    payload(&format!(
        "SELECT {} FROM {}",
        projection.join(", "),
        table.quoted()
    ))
}

/// Recompute `total` from the summable columns for every row.
pub fn recalculate_totals<'a>(
    table: &SqlIdentifier,
    summable: impl IntoIterator<Item = &'a SqlIdentifier>,
) -> String {
    let terms: Vec<String> = summable
        .into_iter()
        .map(|column| format!("COALESCE({}, 0)", column.quoted()))
        .collect();
    let expression = if terms.is_empty() {
        "0".to_owned()
    } else {
        terms.join(" + ")
    };
    format!(
        "UPDATE {} SET total = {expression}, updated_at = CURRENT_TIMESTAMP",
        table.quoted()
    )
}

/// Summary table with its reserved columns, metrics and primary key.
pub fn create_summary(plan: &SummaryPlan) -> String {
    let mut columns = vec![
        "month VARCHAR(7) NOT NULL".to_owned(),
        "year INT NOT NULL".to_owned(),
        "unit_kerja_id INT NOT NULL".to_owned(),
    ];
    columns.extend(
        plan.metrics
            .iter()
            .map(|metric| format!("{} BIGINT DEFAULT 0", metric.quoted())),
    );
    columns.push("PRIMARY KEY (month, unit_kerja_id)".to_owned());
    format!(
        "CREATE TABLE {} ({})",
        plan.summary.quoted(),
        columns.join(", ")
    )
}

/// Month, year and sub-unit indexes of a summary table.
pub fn summary_indexes(plan: &SummaryPlan) -> [String; 3] {
    let quoted = plan.summary.quoted();
    [
        format!(
            "CREATE INDEX {} ON {quoted} (month)",
            index_name(&plan.summary, "month")
        ),
        format!(
            "CREATE INDEX {} ON {quoted} (year)",
            index_name(&plan.summary, "year")
        ),
        format!(
            "CREATE INDEX {} ON {quoted} (unit_kerja_id)",
            index_name(&plan.summary, "unit")
        ),
    ]
}

/// Populate a freshly created summary from the source rows.
pub fn populate_summary(plan: &SummaryPlan) -> String {
    let metrics: Vec<String> = plan.metrics.iter().map(SqlIdentifier::quoted).collect();
    let sums: Vec<String> = plan.metrics.iter().map(summed).collect();
    format!(
        concat!(
            "INSERT INTO {} (month, year, unit_kerja_id, {}) ",
            "SELECT to_char(tanggal, 'YYYY-MM'), EXTRACT(YEAR FROM tanggal)::INT, unit_kerja_id, {} ",
            "FROM {} WHERE tanggal IS NOT NULL ",
            "GROUP BY 1, 2, 3"
        ),
        plan.summary.quoted(),
        metrics.join(", "),
        sums.join(", "),
        plan.source.quoted()
    )
}

/// Sums and row count for `$1` sub-unit within [`$2`, `$3`).
pub fn aggregate_cell(plan: &SummaryPlan) -> String {
    let mut projection = vec![format!("COUNT(*) AS \"{ROW_COUNT_ALIAS}\"")];
    projection.extend(plan.metrics.iter().map(summed));
    payload(&format!(
        "SELECT {} FROM {} WHERE unit_kerja_id = $1 AND tanggal >= $2 AND tanggal < $3",
        projection.join(", "),
        plan.source.quoted()
    ))
}

fn cell_projection(plan: &SummaryPlan) -> String {
    let mut projection = vec!["month".to_owned(), "unit_kerja_id".to_owned()];
    projection.extend(plan.metrics.iter().map(SqlIdentifier::quoted));
    projection.join(", ")
}

/// Stored cell for (`$1` month label, `$2` sub-unit).
pub fn select_cell(plan: &SummaryPlan) -> String {
    payload(&format!(
        "SELECT {} FROM {} WHERE month = $1 AND unit_kerja_id = $2",
        cell_projection(plan),
        plan.summary.quoted()
    ))
}

/// Insert binding month, year, sub-unit, then each metric.
pub fn insert_cell(plan: &SummaryPlan) -> String {
    let mut columns = vec![
        "month".to_owned(),
        "year".to_owned(),
        "unit_kerja_id".to_owned(),
    ];
    columns.extend(plan.metrics.iter().map(SqlIdentifier::quoted));
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${n}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        plan.summary.quoted(),
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Update of (`$1` month, `$2` sub-unit) binding each metric.
pub fn update_cell(plan: &SummaryPlan) -> String {
    let sets: Vec<String> = plan
        .metrics
        .iter()
        .zip(3..)
        .map(|(metric, n)| format!("{} = ${n}", metric.quoted()))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE month = $1 AND unit_kerja_id = $2",
        plan.summary.quoted(),
        sets.join(", ")
    )
}

/// Delete of (`$1` month, `$2` sub-unit).
pub fn delete_cell(plan: &SummaryPlan) -> String {
    format!(
        "DELETE FROM {} WHERE month = $1 AND unit_kerja_id = $2",
        plan.summary.quoted()
    )
}

/// Stored cells ordered by month then sub-unit, optionally for `$1` year.
pub fn list_cells(plan: &SummaryPlan, by_year: bool) -> String {
    let filter = if by_year { " WHERE year = $1" } else { "" };
    format!(
        "{} ORDER BY r.month, r.unit_kerja_id",
        payload(&format!(
            "SELECT {} FROM {}{filter}",
            cell_projection(plan),
            plan.summary.quoted()
        ))
    )
}

/// Cells aggregated from the source rows, optionally within [`$1`, `$2`).
pub fn aggregate_raw(plan: &SummaryPlan, by_range: bool) -> String {
    let range = if by_range {
        " AND tanggal >= $1 AND tanggal < $2"
    } else {
        ""
    };
    let mut projection = vec![
        "to_char(tanggal, 'YYYY-MM') AS month".to_owned(),
        "unit_kerja_id".to_owned(),
    ];
    projection.extend(plan.metrics.iter().map(summed));
    format!(
        "{} ORDER BY r.month, r.unit_kerja_id",
        payload(&format!(
            "SELECT {} FROM {} WHERE tanggal IS NOT NULL{range} GROUP BY 1, 2",
            projection.join(", "),
            plan.source.quoted()
        ))
    )
}
