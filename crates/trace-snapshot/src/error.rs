use thiserror::Error;
use uuid::Uuid;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {id} not found")]
    NotFound { id: Uuid },

    #[error("snapshot checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("incremental snapshot {id} has no base snapshot recorded")]
    MissingBase { id: Uuid },

    #[error("snapshot chain for {id} exceeds the recursion guard ({limit} hops)")]
    ChainTooDeep { id: Uuid, limit: usize },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("codec error: {message}")]
    Codec { message: String },
}

impl From<trace_store::StoreError> for SnapshotError {
    fn from(e: trace_store::StoreError) -> Self {
        SnapshotError::Storage {
            message: e.to_string(),
        }
    }
}

impl From<trace_core::CoreError> for SnapshotError {
    fn from(e: trace_core::CoreError) -> Self {
        SnapshotError::Codec {
            message: e.to_string(),
        }
    }
}
