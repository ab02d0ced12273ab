use thiserror::Error;
use uuid::Uuid;

pub type ReconstructResult<T> = Result<T, ReconstructError>;

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("session {id} has no recorded events at or before the requested time")]
    NoHistory { id: Uuid },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("snapshot error: {message}")]
    Snapshot { message: String },
}

impl From<trace_store::StoreError> for ReconstructError {
    fn from(e: trace_store::StoreError) -> Self {
        ReconstructError::Storage {
            message: e.to_string(),
        }
    }
}

impl From<trace_snapshot::SnapshotError> for ReconstructError {
    fn from(e: trace_snapshot::SnapshotError) -> Self {
        ReconstructError::Snapshot {
            message: e.to_string(),
        }
    }
}
