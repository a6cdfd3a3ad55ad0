//! Shared helpers for the Diesel adapters.
//!
//! Each adapter maps pool and Diesel failures into its own port error through
//! these functions, so connection loss is reported consistently.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use super::pool::PoolError;

/// Extract a readable message from a pool error.
pub fn map_pool_error_message(error: PoolError) -> String {
    match error {
        PoolError::Checkout { message }
        | PoolError::Build { message }
        | PoolError::Migration { message } => message,
    }
}

/// Extract a readable message from a Diesel error and emit debug context.
pub fn map_diesel_error_message(error: &DieselError, operation: &str) -> String {
    let error_message = error.to_string();
    match error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), %operation, "diesel operation failed");
        }
        _ => debug!(%error_message, %operation, "diesel operation failed"),
    }
    error_message
}

/// Whether the error means the connection itself is gone.
pub fn is_connection_error(error: &DieselError) -> bool {
    matches!(
        error,
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
            | DieselError::BrokenTransactionManager
    )
}

/// Whether the error is a unique-constraint violation.
pub fn is_unique_violation(error: &DieselError) -> bool {
    matches!(
        error,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

/// Map a Diesel error through connection/query constructors.
pub fn map_diesel_error<E>(
    error: DieselError,
    operation: &str,
    connection: impl FnOnce(String) -> E,
    query: impl FnOnce(String) -> E,
) -> E {
    let message = map_diesel_error_message(&error, operation);
    if is_connection_error(&error) {
        connection(message)
    } else {
        query(message)
    }
}

#[cfg(test)]
mod tests {
    //! Error classification.

    use super::*;
    use rstest::rstest;

    #[derive(Debug, PartialEq, Eq)]
    enum Mapped {
        Connection(String),
        Query(String),
    }

    #[rstest]
    fn not_found_maps_to_query() {
        let mapped = map_diesel_error(DieselError::NotFound, "lookup", Mapped::Connection, Mapped::Query);
        assert_eq!(mapped, Mapped::Query("Record not found".to_owned()));
    }

    #[rstest]
    fn broken_transactions_map_to_connection() {
        let mapped = map_diesel_error(
            DieselError::BrokenTransactionManager,
            "lookup",
            Mapped::Connection,
            Mapped::Query,
        );
        assert!(matches!(mapped, Mapped::Connection(_)));
    }

    #[rstest]
    fn pool_messages_are_preserved() {
        assert_eq!(
            map_pool_error_message(PoolError::checkout("timed out")),
            "timed out"
        );
    }
}
