// src/error/types.rs
//
// PRINCIPLES:
// - One error per failed operation
// - Store failures are propagated untouched, never retried
// - "No match" is Ok(None), never an error

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store refused to finalize because of a concurrent modification.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// An update or delete was flushed for a key the store does not hold.
    #[error("Entity {collection}/{key} is not known to the store")]
    UntrackedEntity { collection: String, key: String },

    /// Rollback failed while handling `cause`. The connection may be left
    /// in an inconsistent state, so this takes precedence over the cause.
    #[error("Rollback failed: {rollback} (while handling: {cause})")]
    RollbackFailed {
        rollback: Box<DataError>,
        cause: Box<DataError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl DataError {
    /// True when the failure is a transaction conflict, including one
    /// that was followed by a failed rollback.
    pub fn is_conflict(&self) -> bool {
        match self {
            DataError::Conflict(_) => true,
            DataError::RollbackFailed { cause, .. } => cause.is_conflict(),
            _ => false,
        }
    }

    /// Combine a failed rollback with the failure that triggered it.
    pub fn rollback_failed(rollback: DataError, cause: DataError) -> Self {
        DataError::RollbackFailed {
            rollback: Box::new(rollback),
            cause: Box::new(cause),
        }
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                DataError::Conflict(err.to_string())
            }
            _ => DataError::Database(err),
        }
    }
}

impl From<r2d2::Error> for DataError {
    fn from(err: r2d2::Error) -> Self {
        DataError::Pool(err.to_string())
    }
}

pub type DataResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn test_busy_maps_to_conflict() {
        let err: DataError = busy_error().into();
        assert!(matches!(err, DataError::Conflict(_)));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_other_sqlite_errors_stay_database_errors() {
        let err: DataError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, DataError::Database(_)));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_rollback_failure_keeps_cause() {
        let err = DataError::rollback_failed(
            DataError::Other("connection dropped".to_string()),
            DataError::Conflict("write-write".to_string()),
        );

        assert!(err.is_conflict());
        let message = err.to_string();
        assert!(message.starts_with("Rollback failed: Other error: connection dropped"));
        assert!(message.contains("write-write"));
    }
}
