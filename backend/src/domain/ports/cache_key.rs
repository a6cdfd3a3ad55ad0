//! Cache keys: semantic prefix plus a fingerprint of canonical arguments.
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key under which a cached payload is stored.
///
/// Derived keys have the shape `<prefix>:<sha256 hex>`, so invalidating
/// `<prefix>:` removes every argument variant of the same query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Use `value` verbatim after validating that it is non-empty and trimmed.
    pub fn new(value: impl Into<String>) -> Result<Self, CacheKeyValidationError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(CacheKeyValidationError::Empty);
        }
        if raw.trim() != raw {
            return Err(CacheKeyValidationError::ContainsWhitespace);
        }
        Ok(Self(raw))
    }

    /// Derive a key from a prefix and arguments.
    ///
    /// Object keys are sorted before hashing so logically equal arguments
    /// always land on the same key.
    ///
    /// # Examples
    /// ```
    /// use serde_json::json;
    /// use tallyhouse::domain::ports::CacheKey;
    ///
    /// let a = CacheKey::derive("stats_table:1", &json!({"b": 2, "a": 1})).expect("key");
    /// let b = CacheKey::derive("stats_table:1", &json!({"a": 1, "b": 2})).expect("key");
    /// assert_eq!(a, b);
    /// assert!(a.as_str().starts_with("stats_table:1:"));
    /// ```
    pub fn derive(prefix: &str, args: &Value) -> Result<Self, CacheKeyValidationError> {
        let prefix = Self::new(prefix)?;
        let mut canonical = String::new();
        write_canonical(args, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(Self(format!("{}:{}", prefix.0, hex::encode(digest))))
    }

    /// Borrow the underlying key as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, entry)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(entry, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Validation errors returned when constructing [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheKeyValidationError {
    /// Key is empty after trimming whitespace.
    #[error("cache key must not be empty")]
    Empty,
    /// Key contains leading or trailing whitespace.
    #[error("cache key must not contain surrounding whitespace")]
    ContainsWhitespace,
}
