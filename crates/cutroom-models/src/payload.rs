//! Well-known payload keys.
//!
//! The orchestration core treats the workflow payload as an opaque JSON map;
//! only presence checks against these keys are used in guard conditions.
//! Step executors own the value shapes.

/// Transcript artifact reference, written by the transcribe step.
pub const TRANSCRIPT: &str = "transcript";

/// Human-approved analysis markup, written on review-1 approval.
pub const APPROVED_MARKUP: &str = "approved_markup";

/// Timeline segments, written by the process step.
pub const TIMELINE: &str = "timeline";

/// Preview artifact location, written by the preview step.
pub const PREVIEW_REF: &str = "preview_ref";

/// Final output artifact location, written by the render step.
pub const OUTPUT_REF: &str = "output_ref";

/// Render options supplied with review-2 approval.
pub const RENDER_OPTIONS: &str = "render_options";

/// Block modifications submitted from review 2.
pub const BLOCK_CHANGES: &str = "block_changes";

/// Step statistics (durations, token counts), merged by each executor.
pub const STATS: &str = "stats";
