//! Runtime-defined metric schemas.
//!
//! A schema names a physical table and lists its declared columns. Operator
//! input arrives as a [`SchemaSpec`]; [`SchemaDraft::from_spec`] sanitises and
//! validates it before any DDL is issued. Registered schemas come back from
//! storage as [`SchemaDefinition`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::identifier::{InvalidName, SqlIdentifier, assert_identifier, is_reserved_column};
use super::ports::CatalogColumn;

/// Integer columns that identify rows or reference other entities; never
/// summed into `total` and never rolled up as summary metrics.
pub const NON_METRIC_COLUMNS: [&str; 3] = ["id", "unit_kerja_id", "instansi_id"];

/// Tables that are never offered for registration.
pub const SYSTEM_TABLES: [&str; 7] = [
    "__diesel_schema_migrations",
    "table_definitions",
    "column_definitions",
    "users",
    "instansi",
    "unit_kerja",
    "dynamic_data",
];

/// Stable identifier of a registered schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(i32);

impl SchemaId {
    /// Wrap a raw registry id.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw registry id.
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Whole numbers; the only type that can contribute to `total`.
    Integer,
    /// Free text.
    Text,
    /// Calendar date.
    Date,
}

impl ColumnType {
    /// Registry spelling of the type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Date => "date",
        }
    }

    /// Classify a catalog type name by substring.
    ///
    /// `int` anywhere means integer, `date` or `time` means date, anything
    /// else is text.
    ///
    /// # Examples
    /// ```
    /// use tallyhouse::domain::schema::ColumnType;
    ///
    /// assert_eq!(ColumnType::classify("bigint"), ColumnType::Integer);
    /// assert_eq!(ColumnType::classify("timestamp without time zone"), ColumnType::Date);
    /// assert_eq!(ColumnType::classify("character varying"), ColumnType::Text);
    /// ```
    pub fn classify(catalog_type: &str) -> Self {
        let lowered = catalog_type.to_ascii_lowercase();
        if lowered.contains("int") {
            Self::Integer
        } else if lowered.contains("date") || lowered.contains("time") {
            Self::Date
        } else {
            Self::Text
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown registry type spelling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown column type `{0}`")]
pub struct UnknownColumnType(pub String);

impl FromStr for ColumnType {
    type Err = UnknownColumnType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(Self::Integer),
            "text" => Ok(Self::Text),
            "date" => Ok(Self::Date),
            other => Err(UnknownColumnType(other.to_owned())),
        }
    }
}

/// A declared column of a registered schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: SqlIdentifier,
    pub display_name: String,
    pub column_type: ColumnType,
    pub is_required: bool,
    pub is_summable: bool,
    pub order: i32,
}

impl ColumnDefinition {
    /// Whether the column feeds the `total` column.
    pub fn contributes_to_total(&self) -> bool {
        self.is_summable && self.column_type == ColumnType::Integer
    }

    /// Build a definition from a live catalog column.
    ///
    /// The catalog name is validated but not sanitised; summable means
    /// integer-classified and not an identity or reference column.
    pub fn from_catalog(column: &CatalogColumn, order: i32) -> Result<Self, InvalidName> {
        let name = assert_identifier(&column.name)?;
        let column_type = ColumnType::classify(&column.data_type);
        let is_summable =
            column_type == ColumnType::Integer && !NON_METRIC_COLUMNS.contains(&name.as_str());
        Ok(Self {
            display_name: display_name_for(name.as_str()),
            name,
            column_type,
            is_required: !column.is_nullable,
            is_summable,
            order,
        })
    }
}

/// A registered schema with its ordered columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub id: SchemaId,
    /// Physical table name.
    pub name: SqlIdentifier,
    pub display_name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub columns: Vec<ColumnDefinition>,
}

impl SchemaDefinition {
    /// Columns that feed `total`, in display order.
    pub fn summable_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns
            .iter()
            .filter(|column| column.contributes_to_total())
    }

    /// Look up a declared column by internal name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|column| column.name.as_str() == name)
    }
}

/// Operator input describing a column before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default = "default_summable")]
    pub is_summable: bool,
}

const fn default_summable() -> bool {
    true
}

impl ColumnSpec {
    /// Summable integer column.
    pub fn integer(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            column_type: ColumnType::Integer,
            is_required: false,
            is_summable: true,
        }
    }

    /// Free-text column.
    pub fn text(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            column_type: ColumnType::Text,
            is_required: false,
            is_summable: false,
        }
    }

    /// Date column.
    pub fn date(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            column_type: ColumnType::Date,
            is_required: false,
            is_summable: false,
        }
    }

    /// Mark the column as excluded from `total`.
    #[must_use]
    pub fn not_summable(mut self) -> Self {
        self.is_summable = false;
        self
    }

    /// Mark the column as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }
}

/// Operator input describing a new schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

/// Why a [`SchemaSpec`] was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaValidationError {
    #[error("invalid schema name `{raw}`: {source}")]
    InvalidSchemaName { raw: String, source: InvalidName },
    #[error("invalid column name `{raw}`: {source}")]
    InvalidColumnName { raw: String, source: InvalidName },
    #[error("column `{name}` collides with a reserved column")]
    ReservedColumn { name: String },
    #[error("column `{name}` is declared more than once")]
    DuplicateColumn { name: String },
}

/// Validated schema ready to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDraft {
    pub name: SqlIdentifier,
    pub display_name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub columns: Vec<ColumnDefinition>,
}

impl SchemaDraft {
    /// Sanitise and validate operator input.
    ///
    /// Non-integer columns are never summable, whatever the input says.
    ///
    /// # Examples
    /// ```
    /// use tallyhouse::domain::schema::{ColumnSpec, SchemaDraft, SchemaSpec};
    ///
    /// let spec = SchemaSpec {
    ///     name: "Surat Masuk".into(),
    ///     display_name: "Surat Masuk".into(),
    ///     description: None,
    ///     columns: vec![ColumnSpec::integer("Jumlah", "Jumlah")],
    /// };
    /// let draft = SchemaDraft::from_spec(&spec, true).expect("valid spec");
    /// assert_eq!(draft.name.as_str(), "suratmasuk");
    /// assert_eq!(draft.columns[0].name.as_str(), "jumlah");
    /// ```
    pub fn from_spec(spec: &SchemaSpec, is_default: bool) -> Result<Self, SchemaValidationError> {
        let name = SqlIdentifier::sanitized(&spec.name).map_err(|source| {
            SchemaValidationError::InvalidSchemaName {
                raw: spec.name.clone(),
                source,
            }
        })?;

        let mut seen = BTreeSet::new();
        let mut columns = Vec::with_capacity(spec.columns.len());
        for (index, column) in spec.columns.iter().enumerate() {
            let column_name = SqlIdentifier::sanitized(&column.name).map_err(|source| {
                SchemaValidationError::InvalidColumnName {
                    raw: column.name.clone(),
                    source,
                }
            })?;
            if is_reserved_column(column_name.as_str()) {
                return Err(SchemaValidationError::ReservedColumn {
                    name: column_name.into(),
                });
            }
            if !seen.insert(column_name.clone()) {
                return Err(SchemaValidationError::DuplicateColumn {
                    name: column_name.into(),
                });
            }
            let display_name = if column.display_name.trim().is_empty() {
                display_name_for(column_name.as_str())
            } else {
                column.display_name.trim().to_owned()
            };
            columns.push(ColumnDefinition {
                name: column_name,
                display_name,
                column_type: column.column_type,
                is_required: column.is_required,
                is_summable: column.is_summable && column.column_type == ColumnType::Integer,
                order: i32::try_from(index).unwrap_or(i32::MAX),
            });
        }

        let display_name = if spec.display_name.trim().is_empty() {
            display_name_for(name.as_str())
        } else {
            spec.display_name.trim().to_owned()
        };

        Ok(Self {
            name,
            display_name,
            description: spec.description.clone(),
            is_default,
            columns,
        })
    }
}

/// Metadata changes applied by an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaUpdate {
    pub display_name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    /// `true` promotes the schema to default and demotes the previous one.
    #[serde(default)]
    pub make_default: bool,
}

/// Title-case an internal name for display: `jumlah_surat` → `Jumlah Surat`.
pub fn display_name_for(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
