//! Engine error types.

use thiserror::Error;

use cutroom_models::{IllegalTransition, StepKind, WorkflowId, WorkflowStatus};
use cutroom_queue::QueueError;
use cutroom_store::StoreError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the orchestration core.
///
/// Step execution failures are NOT errors at this level: a failing step
/// moves the workflow to `error` and the operation returns `Ok` with the
/// updated document. Only invalid requests and infrastructure failures
/// come back as `Err`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Workflow {0} is already completed")]
    AlreadyCompleted(WorkflowId),

    #[error("No step is mapped for status {0}; supply the step explicitly")]
    StepRequired(WorkflowStatus),

    #[error("No executor registered for step {0}")]
    StepNotRegistered(StepKind),

    #[error("Analysis step {0} cannot be driven through the pipeline")]
    NotChainable(StepKind),

    #[error("Step {0} is not an analysis step")]
    NotAnalysis(StepKind),

    #[error("Analysis step {step} failed: {message}")]
    AnalysisFailed { step: StepKind, message: String },
}

impl EngineError {
    /// True if the underlying document could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::NotFound(_)))
    }
}
