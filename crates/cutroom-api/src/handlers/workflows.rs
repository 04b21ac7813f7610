//! Workflow CRUD and manual step dispatch.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use cutroom_models::{ProjectId, StepKind, Workflow, WorkflowId, WorkflowStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn default_true() -> bool {
    true
}

/// Request body for workflow creation.
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    /// Source video reference (URL or storage location)
    pub video_ref: String,
    /// Optional owning project
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    /// Start the transcribe step immediately
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

/// Create a workflow, optionally kicking off the pipeline.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    if req.video_ref.trim().is_empty() {
        return Err(ApiError::bad_request("video_ref must not be empty"));
    }

    let workflow = state
        .orchestrator
        .create_workflow(req.video_ref, req.project_id, req.auto_start)
        .await?;

    info!(workflow_id = %workflow.id, auto_start = req.auto_start, "Workflow created");
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// Query parameters for workflow listing.
#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    /// Filter by status
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
}

/// List response.
#[derive(Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<Workflow>,
    pub total: usize,
}

/// List workflows, optionally filtered by status.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> ApiResult<Json<WorkflowListResponse>> {
    let workflows = state.orchestrator.list_workflows(query.status).await?;
    let total = workflows.len();
    Ok(Json(WorkflowListResponse { workflows, total }))
}

/// Get a workflow by ID.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state
        .orchestrator
        .get_workflow(&WorkflowId::from_string(id))
        .await?;
    Ok(Json(workflow))
}

/// Delete a workflow.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = WorkflowId::from_string(id);
    state.orchestrator.delete_workflow(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Manually dispatch a step against a workflow.
///
/// Pipeline steps run under the full state-machine discipline; analysis
/// steps patch the payload in place.
pub async fn run_step(
    State(state): State<AppState>,
    Path((id, step)): Path<(String, String)>,
) -> ApiResult<Json<Workflow>> {
    let id = WorkflowId::from_string(id);
    let step: StepKind = step
        .parse()
        .map_err(|e: String| ApiError::bad_request(e))?;

    let workflow = if step.is_analysis() {
        state.orchestrator.run_analysis_step(&id, step).await?
    } else {
        state.orchestrator.dispatch(&id, step).await?
    };
    Ok(Json(workflow))
}
