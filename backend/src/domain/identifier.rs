//! Identifier hygiene for runtime-generated SQL.
//!
//! Schema, column and summary-table names are spliced into SQL text, so every
//! one of them travels as a [`SqlIdentifier`]. The only ways to obtain one are
//! [`assert_identifier`] (names read from the catalog) and
//! [`SqlIdentifier::sanitized`] (operator input), both of which restrict the
//! alphabet to ASCII letters, digits and underscores.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// PostgreSQL truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Hex digits of the digest appended to shortened auxiliary names.
const NAME_DIGEST_LEN: usize = 8;

/// Physical columns every dynamic table carries.
pub const RESERVED_COLUMNS: [&str; 6] = [
    "id",
    "unit_kerja_id",
    "tanggal",
    "total",
    "created_at",
    "updated_at",
];

/// Primary key column of dynamic tables.
pub const ID_COLUMN: &str = "id";
/// Sub-unit reference column.
pub const SUB_UNIT_COLUMN: &str = "unit_kerja_id";
/// Calendar date column.
pub const DATE_COLUMN: &str = "tanggal";
/// Derived sum of summable columns.
pub const TOTAL_COLUMN: &str = "total";

/// Rejection raised by [`assert_identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidName {
    /// The name was empty, or became empty after sanitising.
    #[error("identifier must not be empty")]
    Empty,
    /// The name contains a character outside `[A-Za-z0-9_]`.
    #[error("identifier `{value}` may only contain ASCII letters, digits and underscores")]
    IllegalCharacters { value: String },
    /// The name exceeds the PostgreSQL identifier limit.
    #[error("identifier `{value}` is longer than {max} bytes")]
    TooLong { value: String, max: usize },
}

/// Strip every character that is not an ASCII letter, digit or underscore and
/// lowercase the rest.
///
/// # Examples
/// ```
/// use tallyhouse::domain::identifier::sanitize;
///
/// assert_eq!(sanitize("Data Arsip-2024!"), "dataarsip2024");
/// ```
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Validate a name for use inside SQL text without altering it.
///
/// # Examples
/// ```
/// use tallyhouse::domain::identifier::{InvalidName, assert_identifier};
///
/// assert!(assert_identifier("data_arsip").is_ok());
/// assert_eq!(assert_identifier(""), Err(InvalidName::Empty));
/// assert!(assert_identifier("x; DROP TABLE y").is_err());
/// ```
pub fn assert_identifier(raw: &str) -> Result<SqlIdentifier, InvalidName> {
    if raw.is_empty() {
        return Err(InvalidName::Empty);
    }
    if !raw
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(InvalidName::IllegalCharacters {
            value: raw.to_owned(),
        });
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(InvalidName::TooLong {
            value: raw.to_owned(),
            max: MAX_IDENTIFIER_LEN,
        });
    }
    Ok(SqlIdentifier(raw.to_owned()))
}

/// Whether `name` is one of the physical columns every dynamic table owns.
pub fn is_reserved_column(name: &str) -> bool {
    RESERVED_COLUMNS.contains(&name)
}

/// Validated SQL identifier.
///
/// ## Invariants
/// - Non-empty, at most [`MAX_IDENTIFIER_LEN`] bytes.
/// - Only ASCII letters, digits and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SqlIdentifier(String);

impl SqlIdentifier {
    /// Validate `raw` verbatim.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, InvalidName> {
        assert_identifier(raw.as_ref())
    }

    /// Sanitise operator input, then validate the result.
    ///
    /// # Examples
    /// ```
    /// use tallyhouse::domain::identifier::SqlIdentifier;
    ///
    /// let name = SqlIdentifier::sanitized("Jumlah Arsip").expect("valid");
    /// assert_eq!(name.as_str(), "jumlaharsip");
    /// ```
    pub fn sanitized(raw: impl AsRef<str>) -> Result<Self, InvalidName> {
        assert_identifier(&sanitize(raw.as_ref()))
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Render the identifier double-quoted for SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Name an auxiliary object (index, constraint) after `self`.
    ///
    /// Produces `<prefix>_<self>_<suffix>`. When that exceeds
    /// [`MAX_IDENTIFIER_LEN`] it is cut short and ends in a digest of the full
    /// name, so sibling objects of a long table never truncate to one name.
    ///
    /// # Examples
    /// ```
    /// use tallyhouse::domain::identifier::{MAX_IDENTIFIER_LEN, SqlIdentifier};
    ///
    /// let table = SqlIdentifier::new("surat").expect("valid");
    /// assert_eq!(table.auxiliary("idx", "tanggal").as_str(), "idx_surat_tanggal");
    ///
    /// let long = SqlIdentifier::new("a".repeat(MAX_IDENTIFIER_LEN)).expect("valid");
    /// let date = long.auxiliary("idx", "tanggal");
    /// let pair = long.auxiliary("idx", "unit_tanggal");
    /// assert_eq!(date.as_str().len(), MAX_IDENTIFIER_LEN);
    /// assert_ne!(date, pair);
    /// ```
    pub fn auxiliary(&self, prefix: &str, suffix: &str) -> Self {
        let full = format!("{prefix}_{}_{suffix}", self.0);
        if full.len() <= MAX_IDENTIFIER_LEN {
            return Self(full);
        }
        let digest = hex::encode(Sha256::digest(full.as_bytes()));
        let tag = digest.get(..NAME_DIGEST_LEN).unwrap_or(&digest);
        let keep = MAX_IDENTIFIER_LEN - NAME_DIGEST_LEN - 1;
        let head = full.get(..keep).unwrap_or(&full);
        Self(format!("{head}_{tag}"))
    }

    /// Derive a new identifier by appending `suffix`.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, InvalidName> {
        assert_identifier(&format!("{}{suffix}", self.0))
    }
}

impl AsRef<str> for SqlIdentifier {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for SqlIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SqlIdentifier {
    type Error = InvalidName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        assert_identifier(&value)
    }
}

impl From<SqlIdentifier> for String {
    fn from(value: SqlIdentifier) -> Self {
        value.0
    }
}
