//! Error types for the storage layer.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be decoded back into its in-memory form.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would violate a store invariant.
    #[error("constraint violated: {0}")]
    Constraint(String),
}
