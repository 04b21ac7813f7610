//! Task types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cutroom_models::{StepKind, WorkflowId};

/// A single pipeline-step execution request.
///
/// Delivery is at-least-once: the orchestrator's stale-delivery guard makes
/// duplicate or delayed deliveries safe, and the idempotency key suppresses
/// back-to-back duplicate enqueues of the same step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTask {
    /// Unique task ID
    pub task_id: String,
    /// Workflow to drive
    pub workflow_id: WorkflowId,
    /// Step to execute
    pub step: StepKind,
    /// When the task was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl StepTask {
    /// Create a new step task.
    pub fn new(workflow_id: WorkflowId, step: StepKind) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            workflow_id,
            step,
            enqueued_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("step:{}:{}", self.workflow_id, self.step)
    }
}
