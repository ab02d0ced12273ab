//! Error types shared by the event model and codec.

use thiserror::Error;

/// Result type for trace-core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid event: {message}")]
    InvalidEvent { message: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("frame length mismatch: header said {declared}, payload was {actual}")]
    FrameLengthMismatch { declared: usize, actual: usize },

    #[error("compression error: {message}")]
    CompressionError { message: String },
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::SerializationError {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::CompressionError {
            message: e.to_string(),
        }
    }
}
