//! Persistent database errors.

use thiserror::Error;

/// Errors that can occur when interacting with the database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An error occurred when interacting with the SQLite database.
    #[error("sqlite: {0}")]
    Driver(#[from] sqlx::Error),

    /// The schema could not be brought up to date.
    #[error("migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
