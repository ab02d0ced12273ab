use thiserror::Error;

pub type StreamingResult<T> = Result<T, StreamingError>;

/// Error kinds from spec §7 that originate in the streaming server. Each
/// carries the wire `code` sent back to the client in an `error` message.
#[derive(Debug, Error, Clone)]
pub enum StreamingError {
    #[error("authentication failed")]
    AuthFailed,

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("history query failed: {message}")]
    HistoryError { message: String },

    #[error("session error: {message}")]
    SessionError { message: String },

    #[error("time travel failed: {message}")]
    TimeTravelError { message: String },

    #[error("rate limited")]
    RateLimited,

    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl StreamingError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamingError::AuthFailed => "AUTH_FAILED",
            StreamingError::InvalidRequest { .. } => "INVALID_REQUEST",
            StreamingError::HistoryError { .. } => "HISTORY_ERROR",
            StreamingError::SessionError { .. } => "SESSION_ERROR",
            StreamingError::TimeTravelError { .. } => "TIME_TRAVEL_ERROR",
            StreamingError::RateLimited => "RATE_LIMITED",
            StreamingError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<trace_store::StoreError> for StreamingError {
    fn from(e: trace_store::StoreError) -> Self {
        StreamingError::SessionError {
            message: e.to_string(),
        }
    }
}

impl From<trace_reconstruct::ReconstructError> for StreamingError {
    fn from(e: trace_reconstruct::ReconstructError) -> Self {
        StreamingError::TimeTravelError {
            message: e.to_string(),
        }
    }
}
