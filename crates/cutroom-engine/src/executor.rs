//! The step execution contract.

use async_trait::async_trait;
use thiserror::Error;

use cutroom_models::{Payload, StepKind, Workflow, WorkflowStatus};

/// What a successful step hands back to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// Override the default success status for the step.
    ///
    /// Must still be legal from the step's running status; the
    /// orchestrator validates it against the transition table. Analysis
    /// steps leave this `None` (they never touch status).
    pub new_status: Option<WorkflowStatus>,

    /// Keys merged into the workflow payload on success. Existing keys
    /// are overwritten, others are left alone.
    pub payload_patch: Payload,

    /// Override the default chain successor.
    pub next_step: Option<StepKind>,
}

impl StepOutput {
    /// Output with no status override and no payload changes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Output carrying a payload patch.
    pub fn patch(payload_patch: Payload) -> Self {
        Self {
            payload_patch,
            ..Self::default()
        }
    }

    /// Insert a single payload key.
    pub fn set(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload_patch.insert(key.into(), value);
        self
    }

    /// Override the success status.
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.new_status = Some(status);
        self
    }

    /// Override the chain successor.
    pub fn with_next_step(mut self, step: StepKind) -> Self {
        self.next_step = Some(step);
        self
    }
}

/// A failed step execution.
///
/// `retryable` distinguishes transient provider trouble (timeouts,
/// availability) from failures that will repeat on the same input; it is
/// recorded on the workflow and consulted by batch recovery.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepFailure {
    pub message: String,
    pub retryable: bool,
}

impl StepFailure {
    /// A transient failure recovery may auto-retry.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will repeat on the same input.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// A single pipeline step or analyzer.
///
/// Executors are pure with respect to orchestration state: they read the
/// workflow, do their work, and report an outcome. All status writes and
/// payload merges happen in the orchestrator, under the store's
/// optimistic-concurrency discipline.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, workflow: &Workflow) -> Result<StepOutput, StepFailure>;
}
