use thiserror::Error;

pub type CollectorResult<T> = Result<T, CollectorError>;

/// Error kinds from spec §7 that originate inside the admission pipeline.
/// `INVALID_EVENT`, `RATE_LIMITED`, and `BACKPRESSURE` are deliberately not
/// represented here: per spec §7 they never propagate out of `collect()`,
/// they only increment counters and are observable via `metrics()`.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("collection error: {message}")]
    CollectionError { message: String },
}

impl From<trace_store::StoreError> for CollectorError {
    fn from(e: trace_store::StoreError) -> Self {
        CollectorError::Storage {
            message: e.to_string(),
        }
    }
}

impl From<trace_core::CoreError> for CollectorError {
    fn from(e: trace_core::CoreError) -> Self {
        CollectorError::CollectionError {
            message: e.to_string(),
        }
    }
}
