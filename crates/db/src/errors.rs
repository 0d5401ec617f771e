use thiserror::Error;

use crate::persistent::errors::StorageError;

/// Errors surfaced by any [`Storage`](crate::Storage) backend.
#[derive(Debug, Error)]
pub enum DbError {
    /// The SQLite backend failed.
    #[error("sqlite: {0}")]
    Storage(#[from] StorageError),

    /// A host-provided backend failed.
    #[error("backend: {0}")]
    Backend(String),
}

/// Result type of every storage operation.
pub type DbResult<T> = Result<T, DbError>;
