//! Project batch handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use cutroom_engine::{
    default_stuck_threshold, AnalysisReport, RecoveryReport, RetryStuckOptions, StartOptions,
    StartReport,
};
use cutroom_models::{Project, ProjectId, ProjectStats, StepKind, Workflow, WorkflowId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request body for project creation.
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

/// Create a project.
pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    let project = state.coordinator.create_project(req.name).await?;
    info!(project_id = %project.id, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// Get a project by ID.
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project = state
        .coordinator
        .get_project(&ProjectId::from_string(id))
        .await?;
    Ok(Json(project))
}

/// Request body for adding videos.
#[derive(Debug, Deserialize)]
pub struct AddVideosRequest {
    /// Source video references, in batch order
    pub video_refs: Vec<String>,
}

/// Create one workflow per video and attach them to the project.
pub async fn add_videos(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddVideosRequest>,
) -> ApiResult<(StatusCode, Json<Vec<Workflow>>)> {
    if req.video_refs.is_empty() {
        return Err(ApiError::bad_request("video_refs must not be empty"));
    }
    if req.video_refs.iter().any(|r| r.trim().is_empty()) {
        return Err(ApiError::bad_request("video_refs must not contain empty entries"));
    }
    let created = state
        .coordinator
        .add_videos(&ProjectId::from_string(id), req.video_refs)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Request body for starting a project batch.
#[derive(Debug, Default, Deserialize)]
pub struct StartProjectRequest {
    /// Restrict to these members
    #[serde(default)]
    pub workflow_ids: Option<Vec<WorkflowId>>,
    /// Requested concurrency, clamped to 1..=10
    #[serde(default)]
    pub parallel_limit: Option<usize>,
    /// Also restart members in `error`
    #[serde(default)]
    pub include_failed: bool,
}

/// Start the pipeline for the project's startable members.
pub async fn start_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StartProjectRequest>>,
) -> ApiResult<Json<StartReport>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let report = state
        .coordinator
        .start_project(
            &ProjectId::from_string(id),
            StartOptions {
                workflow_ids: req.workflow_ids,
                parallel_limit: req.parallel_limit,
                include_failed: req.include_failed,
            },
        )
        .await?;
    Ok(Json(report))
}

/// Aggregate statistics over the project's members.
pub async fn project_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectStats>> {
    let stats = state
        .coordinator
        .project_stats(&ProjectId::from_string(id))
        .await?;
    Ok(Json(stats))
}

/// Recompute the project's aggregate state from member statuses.
pub async fn refresh_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project = state
        .coordinator
        .refresh_state(&ProjectId::from_string(id))
        .await?;
    Ok(Json(project))
}

/// Request body for batch recovery.
#[derive(Debug, Default, Deserialize)]
pub struct RetryStuckRequest {
    #[serde(default)]
    pub workflow_ids: Option<Vec<WorkflowId>>,
    /// Idle threshold in minutes (default 30)
    #[serde(default)]
    pub threshold_minutes: Option<i64>,
    /// Also re-drive members whose failure was retryable
    #[serde(default)]
    pub include_error: bool,
}

/// Re-drive every stuck member of a project.
pub async fn retry_stuck(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RetryStuckRequest>>,
) -> ApiResult<Json<RecoveryReport>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let threshold = match req.threshold_minutes {
        None => default_stuck_threshold(),
        Some(m) if m > 0 => chrono::Duration::minutes(m),
        Some(m) => {
            return Err(ApiError::bad_request(format!(
                "threshold_minutes must be positive, got {m}"
            )))
        }
    };

    let report = state
        .recovery
        .retry_stuck(
            &ProjectId::from_string(id),
            RetryStuckOptions {
                workflow_ids: req.workflow_ids,
                threshold,
                include_error: req.include_error,
            },
        )
        .await?;
    Ok(Json(report))
}

/// Run a Phase-5 analyzer across the project's members.
pub async fn run_analysis(
    State(state): State<AppState>,
    Path((id, step)): Path<(String, String)>,
) -> ApiResult<Json<AnalysisReport>> {
    let step: StepKind = step
        .parse()
        .map_err(|e: String| ApiError::bad_request(e))?;
    let report = state
        .coordinator
        .run_analysis(&ProjectId::from_string(id), step)
        .await?;
    Ok(Json(report))
}
