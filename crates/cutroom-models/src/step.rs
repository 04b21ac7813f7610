//! Pipeline step identifiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A pipeline step, executed by a matching step executor.
///
/// The first five are the chained pipeline stages. The remaining four are
/// Phase-5 analyzers: same execution contract, but never chained — they run
/// only on explicit project-level calls and patch the payload without
/// touching status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Transcribe,
    Analyze,
    Process,
    Preview,
    Render,
    RedundancyQuality,
    NarrativeStructure,
    VisualNeeds,
    GraphSync,
}

impl StepKind {
    /// Get string representation of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Transcribe => "transcribe",
            StepKind::Analyze => "analyze",
            StepKind::Process => "process",
            StepKind::Preview => "preview",
            StepKind::Render => "render",
            StepKind::RedundancyQuality => "redundancy_quality",
            StepKind::NarrativeStructure => "narrative_structure",
            StepKind::VisualNeeds => "visual_needs",
            StepKind::GraphSync => "graph_sync",
        }
    }

    /// True for the Phase-5 analyzers (payload-only, never chained).
    pub fn is_analysis(&self) -> bool {
        matches!(
            self,
            StepKind::RedundancyQuality
                | StepKind::NarrativeStructure
                | StepKind::VisualNeeds
                | StepKind::GraphSync
        )
    }

    /// The chained pipeline steps, in order.
    pub fn pipeline() -> &'static [StepKind] {
        &[
            StepKind::Transcribe,
            StepKind::Analyze,
            StepKind::Process,
            StepKind::Preview,
            StepKind::Render,
        ]
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(StepKind::Transcribe),
            "analyze" => Ok(StepKind::Analyze),
            "process" => Ok(StepKind::Process),
            "preview" => Ok(StepKind::Preview),
            "render" => Ok(StepKind::Render),
            "redundancy_quality" => Ok(StepKind::RedundancyQuality),
            "narrative_structure" => Ok(StepKind::NarrativeStructure),
            "visual_needs" => Ok(StepKind::VisualNeeds),
            "graph_sync" => Ok(StepKind::GraphSync),
            other => Err(format!("unknown step: {other}")),
        }
    }
}
