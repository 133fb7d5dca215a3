//! Storage error types.
//!
//! Used by store implementations and callers of storage APIs.

use thiserror::Error;

/// Errors that can occur when using storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    /// The mutation is inconsistent with the current state (e.g. closing a closed record).
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Backend temporarily unreachable (pool timeout, closed pool).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be decoded. Retrying will not help.
    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// True for errors worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Database(_) | StorageError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StorageError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::AlreadyExists(db.message().to_string())
            }
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Corrupt(format!("json: {}", err))
    }
}
