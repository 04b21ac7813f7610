//! Stuck detection and manual recovery handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use cutroom_engine::{default_stuck_threshold, StuckCheck};
use cutroom_models::{StepKind, Workflow, WorkflowId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Query parameters for the stuck check.
#[derive(Debug, Deserialize)]
pub struct StuckQuery {
    /// Idle threshold in minutes (default 30)
    #[serde(default)]
    pub threshold_minutes: Option<i64>,
}

fn threshold_from(minutes: Option<i64>) -> ApiResult<chrono::Duration> {
    match minutes {
        None => Ok(default_stuck_threshold()),
        Some(m) if m > 0 => Ok(chrono::Duration::minutes(m)),
        Some(m) => Err(ApiError::bad_request(format!(
            "threshold_minutes must be positive, got {m}"
        ))),
    }
}

/// Check whether a workflow counts as stuck.
pub async fn check_stuck(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StuckQuery>,
) -> ApiResult<Json<StuckCheck>> {
    let id = WorkflowId::from_string(id);
    let threshold = threshold_from(query.threshold_minutes)?;
    let check = state.recovery.check(&id, threshold).await?;
    Ok(Json(check))
}

/// Request body for workflow retry.
#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    /// Step to re-run; derived from the workflow when omitted
    #[serde(default)]
    pub from_step: Option<StepKind>,
}

/// Re-drive a workflow from its current (or an explicit) step.
pub async fn retry_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RetryRequest>>,
) -> ApiResult<Json<Workflow>> {
    let id = WorkflowId::from_string(id);
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let workflow = state.recovery.retry(&id, req.from_step).await?;
    info!(workflow_id = %id, status = %workflow.status, "Workflow retried");
    Ok(Json(workflow))
}

/// Request body for manual fail.
#[derive(Debug, Deserialize)]
pub struct FailRequest {
    /// Reason recorded on the workflow
    pub reason: String,
}

/// Force a workflow into `error`.
pub async fn fail_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FailRequest>,
) -> ApiResult<Json<Workflow>> {
    if req.reason.trim().is_empty() {
        return Err(ApiError::bad_request("reason must not be empty"));
    }
    let id = WorkflowId::from_string(id);
    let workflow = state.recovery.fail(&id, req.reason).await?;
    Ok(Json(workflow))
}
