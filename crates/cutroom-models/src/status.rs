//! Workflow status enum and the legal-transition table.
//!
//! Status is the backbone of the orchestration core: every mutation of a
//! workflow's `status` field must pass through [`WorkflowStatus::verify_transition`].
//! The table is pure data; guards and scheduling decisions live in the engine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::step::StepKind;

/// A transition not present in the legal-transition table.
///
/// Always a caller or logic bug, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

/// Pipeline state of a single workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, nothing has run yet
    #[default]
    Created,
    /// Transcription in progress
    Transcribing,
    /// Transcript stored, ready for analysis
    Transcribed,
    /// AI analysis in progress
    Analyzing,
    /// Waiting for human approval of the analysis markup
    #[serde(rename = "pending_review_1")]
    PendingReview1,
    /// Markup approved, ready for processing
    XmlApproved,
    /// Timeline processing in progress
    Processing,
    /// Preview generation in progress
    GeneratingPreview,
    /// Waiting for human approval of the preview
    #[serde(rename = "pending_review_2")]
    PendingReview2,
    /// Human is editing timeline blocks
    ModifyingBlocks,
    /// Preview re-generation after block edits
    RegeneratingPreview,
    /// Final render in progress
    Rendering,
    /// Terminal: output rendered
    Completed,
    /// A step failed; carries a failure record
    Error,
}

impl WorkflowStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Transcribing => "transcribing",
            WorkflowStatus::Transcribed => "transcribed",
            WorkflowStatus::Analyzing => "analyzing",
            WorkflowStatus::PendingReview1 => "pending_review_1",
            WorkflowStatus::XmlApproved => "xml_approved",
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::GeneratingPreview => "generating_preview",
            WorkflowStatus::PendingReview2 => "pending_review_2",
            WorkflowStatus::ModifyingBlocks => "modifying_blocks",
            WorkflowStatus::RegeneratingPreview => "regenerating_preview",
            WorkflowStatus::Rendering => "rendering",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Error => "error",
        }
    }

    /// Legal targets from this status.
    ///
    /// The `Error` row exists solely for recovery re-entry; ordinary step
    /// executors never request a transition out of `Error`.
    pub fn allowed_targets(&self) -> &'static [WorkflowStatus] {
        use WorkflowStatus::*;
        match self {
            Created => &[Transcribing],
            Transcribing => &[Transcribed, Error],
            Transcribed => &[Analyzing],
            Analyzing => &[PendingReview1, Error],
            PendingReview1 => &[XmlApproved],
            XmlApproved => &[Processing],
            Processing => &[GeneratingPreview, Error],
            GeneratingPreview => &[PendingReview2, Error],
            PendingReview2 => &[ModifyingBlocks, Rendering],
            ModifyingBlocks => &[RegeneratingPreview, Rendering],
            RegeneratingPreview => &[PendingReview2, Error],
            Rendering => &[Completed, Error],
            // Re-render of an already-completed workflow
            Completed => &[Rendering],
            Error => &[
                Transcribing,
                Analyzing,
                Processing,
                GeneratingPreview,
                Rendering,
            ],
        }
    }

    /// Validate a transition against the table.
    pub fn verify_transition(&self, to: WorkflowStatus) -> Result<WorkflowStatus, IllegalTransition> {
        if self.allowed_targets().contains(&to) {
            Ok(to)
        } else {
            Err(IllegalTransition { from: *self, to })
        }
    }

    /// Terminal: no further automatic progress expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed)
    }

    /// HITL stop-point: auto-chaining must halt here.
    pub fn is_review_gate(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::PendingReview1 | WorkflowStatus::PendingReview2
        )
    }

    /// A background step is (supposedly) running in this status.
    ///
    /// These are the statuses eligible for stuck detection.
    pub fn is_processing(&self) -> bool {
        self.processing_step().is_some()
    }

    /// Map a processing status to the step that drives it.
    ///
    /// Returns `None` for statuses with no background step (review gates,
    /// terminal and intermediate rest states).
    pub fn processing_step(&self) -> Option<StepKind> {
        match self {
            WorkflowStatus::Transcribing => Some(StepKind::Transcribe),
            WorkflowStatus::Analyzing => Some(StepKind::Analyze),
            WorkflowStatus::Processing => Some(StepKind::Process),
            WorkflowStatus::GeneratingPreview | WorkflowStatus::RegeneratingPreview => {
                Some(StepKind::Preview)
            }
            WorkflowStatus::Rendering => Some(StepKind::Render),
            _ => None,
        }
    }

    /// Coarse pipeline position, used to tell a stale task delivery
    /// ("this workflow already moved past the step") from a premature one.
    ///
    /// The review-2 loop states share a rank because they cycle.
    pub fn phase(&self) -> u8 {
        match self {
            WorkflowStatus::Created => 0,
            WorkflowStatus::Transcribing => 1,
            WorkflowStatus::Transcribed => 2,
            WorkflowStatus::Analyzing => 3,
            WorkflowStatus::PendingReview1 => 4,
            WorkflowStatus::XmlApproved => 5,
            WorkflowStatus::Processing => 6,
            WorkflowStatus::GeneratingPreview => 7,
            WorkflowStatus::PendingReview2
            | WorkflowStatus::ModifyingBlocks
            | WorkflowStatus::RegeneratingPreview => 8,
            WorkflowStatus::Rendering => 9,
            WorkflowStatus::Completed => 10,
            // Error keeps no position; recovery decides re-entry explicitly
            WorkflowStatus::Error => 0,
        }
    }

    /// All statuses, in pipeline order. Useful for exhaustive table tests.
    pub fn all() -> &'static [WorkflowStatus] {
        use WorkflowStatus::*;
        &[
            Created,
            Transcribing,
            Transcribed,
            Analyzing,
            PendingReview1,
            XmlApproved,
            Processing,
            GeneratingPreview,
            PendingReview2,
            ModifyingBlocks,
            RegeneratingPreview,
            Rendering,
            Completed,
            Error,
        ]
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
