use thiserror::Error;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

/// `STORAGE_ERROR` from spec §7, plus the lookup-miss cases callers need
/// to distinguish from a hard failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("session not found: {id}")]
    SessionNotFound { id: Uuid },

    #[error("snapshot not found: {id}")]
    SnapshotNotFound { id: Uuid },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        StoreError::Storage {
            message: e.to_string(),
        }
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        StoreError::Storage {
            message: format!("connection pool error: {e}"),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<trace_core::CoreError> for StoreError {
    fn from(e: trace_core::CoreError) -> Self {
        StoreError::Serialization {
            message: e.to_string(),
        }
    }
}
