//! Workflow document model.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::payload;
use crate::project::ProjectId;
use crate::status::WorkflowStatus;
use crate::step::StepKind;

/// Unique identifier for a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    /// Generate a new random workflow ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Step-specific intermediate artifacts, keyed by the constants in
/// [`crate::payload`]. Opaque to the orchestration core.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Structured failure record, present only while `status == error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FailureRecord {
    /// Human-readable failure message
    pub message: String,
    /// Step that failed
    pub stage: StepKind,
    /// Whether recovery may auto-retry this failure
    pub retryable: bool,
    /// Status the workflow held when the failure was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_status: Option<WorkflowStatus>,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    /// Create a new failure record.
    pub fn new(stage: StepKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            stage,
            retryable,
            prior_status: None,
            failed_at: Utc::now(),
        }
    }

    /// Attach the status held before the failure.
    pub fn with_prior_status(mut self, status: WorkflowStatus) -> Self {
        self.prior_status = Some(status);
        self
    }
}

/// Workflow document stored in the versioned document store.
///
/// The concurrency version token is carried by the store alongside the
/// document, not serialized here; all writes go through the repository's
/// read-modify-write helper.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Workflow {
    /// Unique workflow ID, immutable
    pub id: WorkflowId,

    /// Source video reference (URL or storage location)
    pub video_ref: String,

    /// Current pipeline state; mutated only through the state machine
    #[serde(default)]
    pub status: WorkflowStatus,

    /// Owning project, if any (weak reference, lookup only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,

    /// Step artifacts (transcript, markup, timeline, preview/output refs)
    #[serde(default)]
    pub payload: Payload,

    /// Failure record, present only while `status == error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureRecord>,

    /// Times recovery has re-driven this workflow
    #[serde(default)]
    pub retry_count: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Refreshed on every successful write; basis for stuck detection
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a new workflow in `created` status.
    pub fn new(video_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            video_ref: video_ref.into(),
            status: WorkflowStatus::Created,
            project_id: None,
            payload: Payload::new(),
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach to a project.
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Refresh the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record a failure and move to `error`.
    ///
    /// Callers must have validated the transition; this only mutates fields.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.error = Some(record);
        self.status = WorkflowStatus::Error;
    }

    /// Terminal artifact reference, non-empty for completed workflows.
    pub fn output_ref(&self) -> Option<&str> {
        self.payload.get(payload::OUTPUT_REF).and_then(|v| v.as_str())
    }

    /// True if the transcript artifact is present.
    pub fn has_transcript(&self) -> bool {
        self.payload.contains_key(payload::TRANSCRIPT)
    }

    /// How long since the last successful write.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }
}
