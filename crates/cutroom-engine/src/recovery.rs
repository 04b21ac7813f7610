//! Stuck-workflow detection and recovery.
//!
//! A workflow is stuck when it sits in a processing status with no write
//! for longer than the threshold: the driving task was lost, its worker
//! died, or the provider hung past every timeout. Recovery re-dispatches
//! the mapped step; the orchestrator's guards make the re-drive safe
//! even when the original task turns out to still be alive.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use cutroom_models::{
    FailureRecord, ProjectId, StepKind, Workflow, WorkflowId, WorkflowStatus,
};
use cutroom_store::{Commit, StoreError, WorkflowRepository};

use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::notify::WorkflowEvent;
use crate::orchestrator::TaskOrchestrator;

/// Default idle threshold before a processing workflow counts as stuck.
pub fn default_stuck_threshold() -> Duration {
    Duration::minutes(30)
}

/// Outcome of a stuck check, with a human-readable reason either way.
#[derive(Debug, Clone, Serialize)]
pub struct StuckCheck {
    pub stuck: bool,
    /// The step that would re-drive the workflow, for processing statuses.
    pub step: Option<StepKind>,
    pub reason: String,
}

/// Decide whether a workflow is stuck, against `now`.
///
/// Pure over the document; callers supply the clock.
pub fn check_stuck(workflow: &Workflow, threshold: Duration, now: DateTime<Utc>) -> StuckCheck {
    match workflow.status.processing_step() {
        None => StuckCheck {
            stuck: false,
            step: None,
            reason: format!("no background step runs in {}", workflow.status),
        },
        Some(step) => {
            let idle = workflow.idle_for(now);
            if idle > threshold {
                StuckCheck {
                    stuck: true,
                    step: Some(step),
                    reason: format!(
                        "stuck in {} for {} min (threshold {} min)",
                        workflow.status,
                        idle.num_minutes(),
                        threshold.num_minutes()
                    ),
                }
            } else {
                StuckCheck {
                    stuck: false,
                    step: Some(step),
                    reason: format!(
                        "not stuck (last update {} min ago, threshold {} min)",
                        idle.num_minutes(),
                        threshold.num_minutes()
                    ),
                }
            }
        }
    }
}

/// A workflow batch recovery chose not to touch.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedWorkflow {
    pub workflow_id: WorkflowId,
    pub reason: String,
}

/// A workflow batch recovery failed to re-drive.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryFailure {
    pub workflow_id: WorkflowId,
    pub message: String,
}

/// Per-workflow outcome of a batch recovery pass.
#[derive(Debug, Default, Serialize)]
pub struct RecoveryReport {
    pub retried: Vec<WorkflowId>,
    pub skipped: Vec<SkippedWorkflow>,
    pub errors: Vec<RecoveryFailure>,
}

/// Options for [`RecoveryManager::retry_stuck`].
#[derive(Debug, Clone)]
pub struct RetryStuckOptions {
    /// Restrict to these members; `None` scans the whole project.
    pub workflow_ids: Option<Vec<WorkflowId>>,
    /// Idle threshold.
    pub threshold: Duration,
    /// Also re-drive workflows in `error` whose failure was retryable.
    pub include_error: bool,
}

impl Default for RetryStuckOptions {
    fn default() -> Self {
        Self {
            workflow_ids: None,
            threshold: default_stuck_threshold(),
            include_error: false,
        }
    }
}

/// Manual and batch recovery over stuck or failed workflows.
pub struct RecoveryManager {
    repo: WorkflowRepository,
    orchestrator: Arc<TaskOrchestrator>,
}

impl RecoveryManager {
    pub fn new(repo: WorkflowRepository, orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self { repo, orchestrator }
    }

    /// Check a single workflow against the threshold.
    pub async fn check(&self, id: &WorkflowId, threshold: Duration) -> EngineResult<StuckCheck> {
        let workflow = self.repo.get_workflow(id).await?;
        Ok(check_stuck(&workflow, threshold, Utc::now()))
    }

    /// Re-drive a workflow.
    ///
    /// Without an explicit step, the step is derived from the current
    /// processing status, or from the failure record for `error`
    /// workflows. Completed workflows are protected; a re-render goes
    /// through render approval, not recovery. `retry_count` is bumped
    /// and never reset; it records lifetime recovery attempts, not
    /// attempts since the last success.
    pub async fn retry(
        &self,
        id: &WorkflowId,
        from_step: Option<StepKind>,
    ) -> EngineResult<Workflow> {
        let workflow = self.repo.get_workflow(id).await?;
        if workflow.status == WorkflowStatus::Completed {
            return Err(EngineError::AlreadyCompleted(id.clone()));
        }

        let step = match from_step {
            Some(step) => {
                if step.is_analysis() {
                    return Err(EngineError::NotChainable(step));
                }
                step
            }
            None => workflow
                .status
                .processing_step()
                .or_else(|| workflow.error.as_ref().map(|e| e.stage))
                .ok_or(EngineError::StepRequired(workflow.status))?,
        };

        info!(
            workflow_id = %id,
            step = %step,
            status = %workflow.status,
            retry_count = workflow.retry_count + 1,
            "Retrying workflow"
        );
        metrics::record_recovery_retry();

        self.repo
            .update_workflow(id, |w| {
                w.retry_count += 1;
                Commit::Write
            })
            .await?;

        // The lost task's dedup key can outlive the stuck threshold and
        // would swallow the re-enqueue as a duplicate.
        self.orchestrator.clear_step_dedup(id, step).await?;
        self.orchestrator.dispatch(id, step).await
    }

    /// Force a workflow into `error` with the supplied reason.
    ///
    /// Completed workflows are protected; workflows already in `error`
    /// keep their original failure record.
    pub async fn fail(&self, id: &WorkflowId, reason: impl Into<String>) -> EngineResult<Workflow> {
        let reason = reason.into();
        let workflow = self.repo.get_workflow(id).await?;

        if workflow.status == WorkflowStatus::Completed {
            return Err(EngineError::AlreadyCompleted(id.clone()));
        }
        if workflow.status == WorkflowStatus::Error {
            return Ok(workflow);
        }

        // Administrative edge into `error`; the transition table only
        // covers step-driven transitions.
        let record = FailureRecord::new(stage_for(workflow.status), reason.clone(), false)
            .with_prior_status(workflow.status);
        let prior = workflow.status;
        let outcome = self
            .repo
            .update_workflow(id, |w| match w.status {
                WorkflowStatus::Completed | WorkflowStatus::Error => Commit::Skip,
                _ => {
                    w.record_failure(record.clone());
                    Commit::Write
                }
            })
            .await?;

        if !outcome.written {
            if outcome.document.status == WorkflowStatus::Completed {
                return Err(EngineError::AlreadyCompleted(id.clone()));
            }
            return Ok(outcome.document);
        }

        warn!(workflow_id = %id, "Workflow failed manually: {}", reason);
        self.orchestrator
            .emit(WorkflowEvent::step_failed(
                id,
                record.stage,
                prior,
                reason,
            ))
            .await;
        Ok(outcome.document)
    }

    /// Scan a project and re-drive every stuck member.
    ///
    /// Per-workflow failures are collected, never aborting the pass.
    pub async fn retry_stuck(
        &self,
        project_id: &ProjectId,
        opts: RetryStuckOptions,
    ) -> EngineResult<RecoveryReport> {
        let project = self.repo.get_project(project_id).await?;
        let mut report = RecoveryReport::default();

        let ids = match opts.workflow_ids {
            Some(ids) => {
                let (members, foreign): (Vec<_>, Vec<_>) =
                    ids.into_iter().partition(|id| project.contains(id));
                for id in foreign {
                    report.errors.push(RecoveryFailure {
                        workflow_id: id,
                        message: "not a member of this project".to_string(),
                    });
                }
                members
            }
            None => project.workflow_ids.clone(),
        };

        let now = Utc::now();
        for id in ids {
            let workflow = match self.repo.get_workflow(&id).await {
                Ok(wf) => wf,
                Err(StoreError::NotFound(_)) => {
                    report.skipped.push(SkippedWorkflow {
                        workflow_id: id,
                        reason: "workflow document missing".to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    report.errors.push(RecoveryFailure {
                        workflow_id: id,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let check = check_stuck(&workflow, opts.threshold, now);
            let retry_step = if check.stuck {
                check.step
            } else if opts.include_error && workflow.status == WorkflowStatus::Error {
                match workflow.error.as_ref() {
                    Some(record) if record.retryable => Some(record.stage),
                    _ => {
                        report.skipped.push(SkippedWorkflow {
                            workflow_id: id,
                            reason: "failure marked non-retryable".to_string(),
                        });
                        continue;
                    }
                }
            } else {
                report.skipped.push(SkippedWorkflow {
                    workflow_id: id,
                    reason: check.reason,
                });
                continue;
            };

            match self.retry(&id, retry_step).await {
                Ok(_) => report.retried.push(id),
                Err(e) => report.errors.push(RecoveryFailure {
                    workflow_id: id,
                    message: e.to_string(),
                }),
            }
        }

        info!(
            project_id = %project_id,
            retried = report.retried.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Batch recovery pass complete"
        );
        Ok(report)
    }
}

/// Step blamed in a manual-fail record for a given status.
fn stage_for(status: WorkflowStatus) -> StepKind {
    use WorkflowStatus::*;
    status.processing_step().unwrap_or(match status {
        Created => StepKind::Transcribe,
        Transcribed | PendingReview1 => StepKind::Analyze,
        XmlApproved => StepKind::Process,
        PendingReview2 | ModifyingBlocks => StepKind::Preview,
        _ => StepKind::Transcribe,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, harness_with, harness_with_queue, FakeQueue, Harness, ScriptedExecutor};
    use cutroom_models::Project;

    fn manager(h: &Harness) -> RecoveryManager {
        RecoveryManager::new(h.repo.clone(), h.orchestrator.clone())
    }

    fn wf_idle(status: WorkflowStatus, idle_minutes: i64) -> Workflow {
        let mut wf = Workflow::new("ref");
        wf.status = status;
        wf.updated_at = Utc::now() - Duration::minutes(idle_minutes);
        wf
    }

    #[test]
    fn test_check_stuck_over_threshold() {
        let wf = wf_idle(WorkflowStatus::Rendering, 45);
        let check = check_stuck(&wf, default_stuck_threshold(), Utc::now());
        assert!(check.stuck);
        assert_eq!(check.step, Some(StepKind::Render));
        assert!(check.reason.contains("stuck in rendering"));
    }

    #[test]
    fn test_check_not_stuck_under_threshold() {
        let wf = wf_idle(WorkflowStatus::Rendering, 10);
        let check = check_stuck(&wf, default_stuck_threshold(), Utc::now());
        assert!(!check.stuck);
        assert_eq!(
            check.reason,
            "not stuck (last update 10 min ago, threshold 30 min)"
        );
    }

    #[test]
    fn test_check_non_processing_status() {
        for status in [
            WorkflowStatus::PendingReview1,
            WorkflowStatus::Completed,
            WorkflowStatus::Error,
        ] {
            let wf = wf_idle(status, 500);
            let check = check_stuck(&wf, default_stuck_threshold(), Utc::now());
            assert!(!check.stuck, "{status} must never count as stuck");
            assert_eq!(check.step, None);
        }
    }

    #[tokio::test]
    async fn test_retry_from_error_resumes_chain() {
        let h = harness_with(vec![(
            StepKind::Analyze,
            ScriptedExecutor::failing("markup", "model unavailable", true),
        )]);
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::Error);

        h.executors[&StepKind::Analyze].heal();
        let recovered = manager(&h).retry(&wf.id, None).await.unwrap();

        // Step derived from the failure record, artifacts preserved
        assert_eq!(recovered.status, WorkflowStatus::PendingReview1);
        assert!(recovered.error.is_none());
        assert!(recovered.has_transcript());
        assert_eq!(recovered.retry_count, 1);
    }

    #[tokio::test]
    async fn test_retry_count_is_monotonic() {
        let h = harness_with(vec![(
            StepKind::Analyze,
            ScriptedExecutor::failing("markup", "still down", true),
        )]);
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();

        let m = manager(&h);
        m.retry(&wf.id, None).await.unwrap();
        m.retry(&wf.id, None).await.unwrap();
        h.executors[&StepKind::Analyze].heal();
        let recovered = m.retry(&wf.id, None).await.unwrap();

        assert_eq!(recovered.status, WorkflowStatus::PendingReview1);
        // Counts lifetime recoveries, not attempts since last success
        assert_eq!(recovered.retry_count, 3);
    }

    #[tokio::test]
    async fn test_retry_stuck_processing_workflow() {
        let h = harness();
        let wf = wf_idle(WorkflowStatus::Rendering, 45);
        h.repo.create_workflow(&wf).await.unwrap();

        let recovered = manager(&h).retry(&wf.id, None).await.unwrap();
        assert_eq!(recovered.status, WorkflowStatus::Completed);
        assert_eq!(h.calls(StepKind::Render), 1);
    }

    #[tokio::test]
    async fn test_retry_completed_is_rejected() {
        let h = harness();
        let mut wf = Workflow::new("ref");
        wf.status = WorkflowStatus::Completed;
        h.repo.create_workflow(&wf).await.unwrap();

        let err = manager(&h).retry(&wf.id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyCompleted(_)));

        // Even with an explicit step: re-renders go through approval
        let err = manager(&h)
            .retry(&wf.id, Some(StepKind::Render))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyCompleted(_)));
        assert_eq!(h.calls(StepKind::Render), 0);
    }

    #[tokio::test]
    async fn test_retry_clears_dedup_before_redispatch() {
        let queue = Arc::new(FakeQueue::default());
        let h = harness_with_queue(queue.clone());
        let wf = wf_idle(WorkflowStatus::Rendering, 45);
        h.repo.create_workflow(&wf).await.unwrap();
        // The lost task's dedup key is still live.
        queue.seed_dedup(&wf.id, StepKind::Render);

        manager(&h).retry(&wf.id, None).await.unwrap();

        // Without the clear, the enqueue would be suppressed as a
        // duplicate and the workflow would stay stuck.
        assert_eq!(queue.enqueued_steps(), vec![StepKind::Render]);
    }

    #[tokio::test]
    async fn test_retry_rest_state_requires_step() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::PendingReview1);

        let err = manager(&h).retry(&wf.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::StepRequired(WorkflowStatus::PendingReview1)
        ));
    }

    #[tokio::test]
    async fn test_fail_guards_completed() {
        let h = harness();
        let mut wf = Workflow::new("ref");
        wf.status = WorkflowStatus::Completed;
        h.repo.create_workflow(&wf).await.unwrap();

        let err = manager(&h).fail(&wf.id, "operator gave up").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyCompleted(_)));
    }

    #[tokio::test]
    async fn test_fail_is_idempotent_on_error() {
        let h = harness_with(vec![(
            StepKind::Transcribe,
            ScriptedExecutor::failing(cutroom_models::payload::TRANSCRIPT, "no audio track", false),
        )]);
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::Error);

        let failed = manager(&h).fail(&wf.id, "unrelated reason").await.unwrap();
        // Original record survives
        assert_eq!(failed.error.as_ref().unwrap().message, "no audio track");
    }

    #[tokio::test]
    async fn test_fail_from_rest_state() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::PendingReview1);

        let failed = manager(&h)
            .fail(&wf.id, "source video withdrawn")
            .await
            .unwrap();
        assert_eq!(failed.status, WorkflowStatus::Error);
        let record = failed.error.as_ref().unwrap();
        assert_eq!(record.message, "source video withdrawn");
        assert!(!record.retryable);
        assert_eq!(record.prior_status, Some(WorkflowStatus::PendingReview1));
    }

    async fn project_with(h: &Harness, workflows: &[&Workflow]) -> Project {
        let mut project = Project::new("batch");
        for wf in workflows {
            project.workflow_ids.push(wf.id.clone());
            h.repo.create_workflow(wf).await.unwrap();
        }
        h.repo.create_project(&project).await.unwrap();
        project
    }

    #[tokio::test]
    async fn test_retry_stuck_scans_project() {
        let h = harness();
        let stuck = wf_idle(WorkflowStatus::Rendering, 45);
        let fresh = wf_idle(WorkflowStatus::Processing, 5);
        let done = wf_idle(WorkflowStatus::Completed, 500);
        let project = project_with(&h, &[&stuck, &fresh, &done]).await;

        let report = manager(&h)
            .retry_stuck(&project.id, RetryStuckOptions::default())
            .await
            .unwrap();

        assert_eq!(report.retried, vec![stuck.id.clone()]);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.errors.is_empty());

        let reasons: Vec<&str> = report.skipped.iter().map(|s| s.reason.as_str()).collect();
        assert!(reasons.contains(&"not stuck (last update 5 min ago, threshold 30 min)"));
        assert!(reasons.contains(&"no background step runs in completed"));

        // The stuck one actually got re-driven to completion
        let recovered = h.repo.get_workflow(&stuck.id).await.unwrap();
        assert_eq!(recovered.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_retry_stuck_includes_retryable_errors() {
        let h = harness();
        let mut failed = Workflow::new("ref");
        failed.record_failure(
            FailureRecord::new(StepKind::Render, "encoder crashed", true)
                .with_prior_status(WorkflowStatus::Rendering),
        );
        let mut hopeless = Workflow::new("ref");
        hopeless.record_failure(FailureRecord::new(StepKind::Transcribe, "no audio", false));
        let project = project_with(&h, &[&failed, &hopeless]).await;

        let report = manager(&h)
            .retry_stuck(
                &project.id,
                RetryStuckOptions {
                    include_error: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.retried, vec![failed.id.clone()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, "failure marked non-retryable");
    }

    #[tokio::test]
    async fn test_retry_stuck_rejects_foreign_ids() {
        let h = harness();
        let stuck = wf_idle(WorkflowStatus::Rendering, 45);
        let project = project_with(&h, &[&stuck]).await;

        let foreign = WorkflowId::new();
        let report = manager(&h)
            .retry_stuck(
                &project.id,
                RetryStuckOptions {
                    workflow_ids: Some(vec![stuck.id.clone(), foreign.clone()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.retried, vec![stuck.id.clone()]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].workflow_id, foreign);
    }

    #[tokio::test]
    async fn test_retry_stuck_tolerates_dangling_members() {
        let h = harness();
        let mut project = Project::new("batch");
        project.workflow_ids.push(WorkflowId::new());
        h.repo.create_project(&project).await.unwrap();

        let report = manager(&h)
            .retry_stuck(&project.id, RetryStuckOptions::default())
            .await
            .unwrap();

        assert!(report.retried.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, "workflow document missing");
    }
}
