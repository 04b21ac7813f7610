//! Worker error types.

use thiserror::Error;

/// Worker errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] cutroom_queue::QueueError),

    #[error(transparent)]
    Engine(#[from] cutroom_engine::EngineError),

    #[error(transparent)]
    Store(#[from] cutroom_store::StoreError),

    #[error("Worker error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
