//! Human review gate handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use cutroom_models::{Workflow, WorkflowId};

use crate::error::ApiResult;
use crate::state::AppState;

fn default_true() -> bool {
    true
}

/// Request body for review-1 approval.
#[derive(Debug, Deserialize)]
pub struct Review1Request {
    /// The (possibly human-edited) analysis markup being approved
    pub approved_markup: serde_json::Value,
    /// Start the process step immediately
    #[serde(default = "default_true")]
    pub auto_continue: bool,
}

/// Approve the review-1 analysis markup.
pub async fn submit_review1(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<Review1Request>,
) -> ApiResult<Json<Workflow>> {
    let id = WorkflowId::from_string(id);
    let workflow = state
        .orchestrator
        .submit_review1(&id, req.approved_markup, req.auto_continue)
        .await?;
    info!(workflow_id = %id, status = %workflow.status, "Review 1 submitted");
    Ok(Json(workflow))
}

/// Request body for review-2 render approval.
#[derive(Debug, Default, Deserialize)]
pub struct ApproveRenderRequest {
    /// Options forwarded to the render step
    #[serde(default)]
    pub render_options: Option<serde_json::Value>,
}

/// Approve the preview and start the final render.
pub async fn approve_render(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ApproveRenderRequest>>,
) -> ApiResult<Json<Workflow>> {
    let id = WorkflowId::from_string(id);
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let workflow = state
        .orchestrator
        .approve_render(&id, req.render_options)
        .await?;
    info!(workflow_id = %id, status = %workflow.status, "Render approved");
    Ok(Json(workflow))
}

/// Request body for block modifications.
#[derive(Debug, Deserialize)]
pub struct BlockModificationsRequest {
    /// Timeline block edits from the review-2 UI
    pub changes: serde_json::Value,
    /// Regenerate the preview immediately
    #[serde(default = "default_true")]
    pub regenerate: bool,
}

/// Submit timeline block modifications from review 2.
pub async fn submit_block_modifications(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BlockModificationsRequest>,
) -> ApiResult<Json<Workflow>> {
    let id = WorkflowId::from_string(id);
    let workflow = state
        .orchestrator
        .submit_block_modifications(&id, req.changes, req.regenerate)
        .await?;
    info!(workflow_id = %id, status = %workflow.status, "Block modifications submitted");
    Ok(Json(workflow))
}
