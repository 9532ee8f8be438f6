use thiserror::Error;

/// Storage-level failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database call failed (message carries the driver's text).
    #[error("database error: {0}")]
    Database(String),

    /// A row no longer has the version the writer loaded (optimistic
    /// concurrency) or a unique key is taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored JSON does not fit the current types.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// In-memory lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}
