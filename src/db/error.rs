//! Database error types.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to bootstrap the schema.
    #[error("schema bootstrap failed: {0}")]
    Schema(#[source] sqlx::Error),

    /// The database URL scheme maps to no supported dialect.
    #[error("unsupported database url scheme: {0}")]
    UnsupportedScheme(String),

    /// A reservation references a node row that does not exist.
    #[error("reservation {request_id} references missing node {node_id}")]
    MissingNode { request_id: String, node_id: i64 },
}

impl DbError {
    /// Check if this is a retryable error.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Connect(_) => true,
            DbError::Query(e) => is_retryable_sqlx_error(e),
            _ => false,
        }
    }
}

fn is_retryable_sqlx_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                matches!(
                    code.as_ref(),
                    "40001" | // serialization_failure
                    "40P01" | // deadlock_detected
                    "57P03" | // cannot_connect_now
                    "5"     | // SQLITE_BUSY
                    "6"       // SQLITE_LOCKED
                )
            } else {
                false
            }
        }
        _ => false,
    }
}

/// Check whether an error is a unique-constraint violation.
///
/// Unique collisions on the reservation primary key are an expected signal
/// (a concurrent call for the same request id won the insert race), so the
/// allocator needs to tell them apart from genuine failures. Covers the
/// Postgres SQLSTATE and the SQLite extended result codes for primary-key
/// and unique-index conflicts.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => matches!(code.as_ref(), "23505" | "1555" | "2067"),
            None => db_err.message().contains("UNIQUE constraint failed"),
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(DbError::Query(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!DbError::Query(sqlx::Error::RowNotFound).is_retryable());
    }
}
