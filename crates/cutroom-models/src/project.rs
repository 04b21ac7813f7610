//! Project document model and derived statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::status::WorkflowStatus;
use crate::workflow::{Workflow, WorkflowId};

/// Unique identifier for a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// Generate a new random project ID.
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

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Coarse aggregate state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Created, no videos added yet
    #[default]
    Created,
    /// Videos added, nothing started
    Ready,
    /// At least one member workflow in flight
    Processing,
    /// All member workflows completed
    Completed,
    /// Some completed, some failed
    PartialComplete,
    /// All member workflows failed
    Failed,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Created => "created",
            ProjectState::Ready => "ready",
            ProjectState::Processing => "processing",
            ProjectState::Completed => "completed",
            ProjectState::PartialComplete => "partial_complete",
            ProjectState::Failed => "failed",
        }
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named, ordered collection of workflows processed as a batch.
///
/// `workflow_ids` order is semantically meaningful (downstream narrative
/// analysis), not just bookkeeping. Member references are weak: deleting a
/// workflow does not cascade here, so readers must tolerate dangling ids.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    /// Unique project ID
    pub id: ProjectId,

    /// Display name
    pub name: String,

    /// Aggregate state (derived, refreshed on demand)
    #[serde(default)]
    pub state: ProjectState,

    /// Ordered member workflow references
    #[serde(default)]
    pub workflow_ids: Vec<WorkflowId>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a new, empty project.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            state: ProjectState::Created,
            workflow_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the given workflow belongs to this project.
    pub fn contains(&self, id: &WorkflowId) -> bool {
        self.workflow_ids.contains(id)
    }
}

/// Aggregate statistics derived from member workflows.
///
/// Recomputed on demand; never the source of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProjectStats {
    /// Member workflows found (dangling references excluded)
    pub total: u32,
    /// Member workflows referenced but missing from the store
    pub missing: u32,
    /// Count per status string
    pub by_status: BTreeMap<String, u32>,
    /// Completed members
    pub completed: u32,
    /// Members in error
    pub failed: u32,
    /// Members waiting at a review gate
    pub in_review: u32,
    /// Members with a background step running
    pub processing: u32,
    /// Cumulative created→updated duration of completed members, seconds
    pub total_duration_secs: i64,
}

impl ProjectStats {
    /// Compute stats over the resolved member workflows.
    ///
    /// `missing` is the number of ids that could not be resolved (weak
    /// references the project tolerates).
    pub fn collect<'a>(workflows: impl IntoIterator<Item = &'a Workflow>, missing: u32) -> Self {
        let mut stats = ProjectStats {
            missing,
            ..Default::default()
        };

        for wf in workflows {
            stats.total += 1;
            *stats.by_status.entry(wf.status.as_str().to_string()).or_insert(0) += 1;

            match wf.status {
                WorkflowStatus::Completed => {
                    stats.completed += 1;
                    stats.total_duration_secs += (wf.updated_at - wf.created_at).num_seconds();
                }
                WorkflowStatus::Error => stats.failed += 1,
                s if s.is_review_gate() => stats.in_review += 1,
                s if s.is_processing() => stats.processing += 1,
                _ => {}
            }
        }

        stats
    }

    /// Derive the coarse project state from the counts.
    pub fn aggregate_state(&self) -> ProjectState {
        if self.total == 0 {
            return ProjectState::Created;
        }
        if self.completed == self.total {
            return ProjectState::Completed;
        }
        if self.failed == self.total {
            return ProjectState::Failed;
        }
        if self.completed > 0 && self.completed + self.failed == self.total {
            return ProjectState::PartialComplete;
        }
        if self.processing > 0 || self.in_review > 0 || self.completed > 0 || self.failed > 0 {
            return ProjectState::Processing;
        }
        ProjectState::Ready
    }
}
