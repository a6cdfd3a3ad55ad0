//! Hand-off from record writes to summary maintenance.

use crate::domain::record::RecordKey;
use crate::domain::schema::SchemaDefinition;
use crate::domain::summary::CellAction;

/// Receives every successful record mutation.
///
/// Implementations are best-effort: they never fail the write that triggered
/// them and report what happened through [`CellAction`].
#[cfg_attr(test, mockall::automock)]
pub trait SummaryRefresh: Send + Sync {
    /// Bring the summary cell covering `key` back in line with the raw rows.
    fn refresh_cell(&self, schema: &SchemaDefinition, key: RecordKey) -> CellAction;
}
