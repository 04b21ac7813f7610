//! Shared data models for the Cutroom pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Workflows and their payloads
//! - The workflow status enum and its legal-transition table
//! - Pipeline step identifiers
//! - Projects and derived project statistics

pub mod payload;
pub mod project;
pub mod status;
pub mod step;
pub mod workflow;

// Re-export common types
pub use project::{Project, ProjectId, ProjectState, ProjectStats};
pub use status::{IllegalTransition, WorkflowStatus};
pub use step::StepKind;
pub use workflow::{FailureRecord, Payload, Workflow, WorkflowId};
