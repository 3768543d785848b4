//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
