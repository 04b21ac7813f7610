//! Project-level batch coordination.
//!
//! Projects group workflows for batch starting, aggregate progress, and
//! cross-video analysis. Starting is throttled: startable members are
//! dispatched in chunks of `parallel_limit`, with a fixed delay between
//! chunks so a large project cannot flood the providers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use cutroom_models::{
    Project, ProjectId, ProjectState, ProjectStats, StepKind, Workflow, WorkflowId,
    WorkflowStatus,
};
use cutroom_store::{Commit, StoreError, WorkflowRepository};

use crate::error::{EngineError, EngineResult};
use crate::orchestrator::TaskOrchestrator;

/// Concurrency used when the caller does not ask for one.
pub const DEFAULT_PARALLEL_LIMIT: usize = 3;

/// Lower clamp for requested concurrency.
pub const MIN_PARALLEL_LIMIT: usize = 1;

/// Upper clamp for requested concurrency.
pub const MAX_PARALLEL_LIMIT: usize = 10;

/// Pause between dispatch chunks.
const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(5);

/// Options for [`ProjectCoordinator::start_project`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Restrict to these members; `None` considers the whole project.
    pub workflow_ids: Option<Vec<WorkflowId>>,
    /// Requested concurrency, clamped to `1..=10`.
    pub parallel_limit: Option<usize>,
    /// Also restart members sitting in `error`.
    pub include_failed: bool,
}

/// A workflow the coordinator could not dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchFailure {
    pub workflow_id: WorkflowId,
    pub message: String,
}

/// What a start pass did with each requested member.
#[derive(Debug, Default, Serialize)]
pub struct StartReport {
    /// Members dispatched into the pipeline, in project order.
    pub started: Vec<WorkflowId>,
    /// Members held back, grouped by their current status.
    pub skipped_by_status: BTreeMap<String, Vec<WorkflowId>>,
    /// Requested ids that do not belong to the project.
    pub invalid_workflow_ids: Vec<WorkflowId>,
    /// Member ids whose documents are gone (weak references).
    pub missing: Vec<WorkflowId>,
    /// Members whose dispatch failed.
    pub errors: Vec<DispatchFailure>,
}

/// Per-workflow outcome of a project analysis pass.
#[derive(Debug, Default, Serialize)]
pub struct AnalysisReport {
    pub analyzed: Vec<WorkflowId>,
    pub missing: Vec<WorkflowId>,
    pub errors: Vec<DispatchFailure>,
}

/// Batch operations over a project's member workflows.
pub struct ProjectCoordinator {
    repo: WorkflowRepository,
    orchestrator: Arc<TaskOrchestrator>,
    batch_delay: Duration,
}

impl ProjectCoordinator {
    pub fn new(repo: WorkflowRepository, orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self {
            repo,
            orchestrator,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    /// Override the inter-chunk delay (tests shrink it).
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Create a new, empty project.
    pub async fn create_project(&self, name: impl Into<String>) -> EngineResult<Project> {
        let project = Project::new(name);
        self.repo.create_project(&project).await?;
        Ok(project)
    }

    /// Get a project by ID.
    pub async fn get_project(&self, id: &ProjectId) -> EngineResult<Project> {
        Ok(self.repo.get_project(id).await?)
    }

    /// Create one workflow per video and attach them to the project, in
    /// the given order.
    pub async fn add_videos(
        &self,
        project_id: &ProjectId,
        video_refs: Vec<String>,
    ) -> EngineResult<Vec<Workflow>> {
        // Surface a missing project before creating anything.
        self.repo.get_project(project_id).await?;

        let mut created = Vec::with_capacity(video_refs.len());
        for video_ref in video_refs {
            let workflow = Workflow::new(video_ref).with_project(project_id.clone());
            self.repo.create_workflow(&workflow).await?;
            created.push(workflow);
        }

        let ids: Vec<WorkflowId> = created.iter().map(|w| w.id.clone()).collect();
        self.repo
            .update_project(project_id, |p| {
                for id in &ids {
                    if !p.contains(id) {
                        p.workflow_ids.push(id.clone());
                    }
                }
                if p.state == ProjectState::Created {
                    p.state = ProjectState::Ready;
                }
                Commit::Write
            })
            .await?;

        info!(project_id = %project_id, added = created.len(), "Added videos to project");
        Ok(created)
    }

    /// Start the pipeline for the project's startable members.
    ///
    /// Only `created` workflows start; `error` members join when
    /// `include_failed` is set, everything else is reported under its
    /// current status. Dispatch happens in chunks of the clamped
    /// parallel limit with a pause between chunks.
    pub async fn start_project(
        &self,
        project_id: &ProjectId,
        opts: StartOptions,
    ) -> EngineResult<StartReport> {
        let project = self.repo.get_project(project_id).await?;
        let limit = clamp_limit(opts.parallel_limit);
        let mut report = StartReport::default();

        let candidates = match opts.workflow_ids {
            Some(ids) => {
                let (members, foreign): (Vec<_>, Vec<_>) =
                    ids.into_iter().partition(|id| project.contains(id));
                report.invalid_workflow_ids = foreign;
                members
            }
            None => project.workflow_ids.clone(),
        };

        let mut startable = Vec::new();
        for id in candidates {
            let workflow = match self.repo.get_workflow(&id).await {
                Ok(wf) => wf,
                Err(StoreError::NotFound(_)) => {
                    report.missing.push(id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match workflow.status {
                WorkflowStatus::Created => startable.push(id),
                WorkflowStatus::Error if opts.include_failed => startable.push(id),
                WorkflowStatus::Error => {
                    // Held back silently; include_failed opts these in.
                    debug!(workflow_id = %id, "Skipping failed workflow");
                }
                status => {
                    report
                        .skipped_by_status
                        .entry(status.as_str().to_string())
                        .or_default()
                        .push(id);
                }
            }
        }

        for (index, chunk) in startable.chunks(limit).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.batch_delay).await;
            }
            let dispatches = chunk
                .iter()
                .map(|id| self.orchestrator.dispatch(id, StepKind::Transcribe));
            let results = futures::future::join_all(dispatches).await;
            for (id, result) in chunk.iter().zip(results) {
                match result {
                    Ok(_) => report.started.push(id.clone()),
                    Err(e) => report.errors.push(DispatchFailure {
                        workflow_id: id.clone(),
                        message: e.to_string(),
                    }),
                }
            }
        }

        if !report.started.is_empty() {
            self.repo
                .update_project(project_id, |p| {
                    if p.state == ProjectState::Processing {
                        Commit::Skip
                    } else {
                        p.state = ProjectState::Processing;
                        Commit::Write
                    }
                })
                .await?;
        }

        info!(
            project_id = %project_id,
            started = report.started.len(),
            skipped = report.skipped_by_status.len(),
            invalid = report.invalid_workflow_ids.len(),
            parallel_limit = limit,
            "Project start pass complete"
        );
        Ok(report)
    }

    /// Aggregate statistics over the project's members.
    pub async fn project_stats(&self, project_id: &ProjectId) -> EngineResult<ProjectStats> {
        let project = self.repo.get_project(project_id).await?;

        let mut found = Vec::with_capacity(project.workflow_ids.len());
        let mut missing = 0u32;
        for id in &project.workflow_ids {
            match self.repo.get_workflow(id).await {
                Ok(wf) => found.push(wf),
                Err(StoreError::NotFound(_)) => missing += 1,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(ProjectStats::collect(&found, missing))
    }

    /// Recompute the project's aggregate state from member statuses.
    pub async fn refresh_state(&self, project_id: &ProjectId) -> EngineResult<Project> {
        let stats = self.project_stats(project_id).await?;
        let state = stats.aggregate_state();

        let outcome = self
            .repo
            .update_project(project_id, |p| {
                if p.state == state {
                    Commit::Skip
                } else {
                    p.state = state;
                    Commit::Write
                }
            })
            .await?;

        if outcome.written {
            info!(project_id = %project_id, state = %state, "Refreshed project state");
        }
        Ok(outcome.document)
    }

    /// Run a Phase-5 analyzer across every member workflow.
    pub async fn run_analysis(
        &self,
        project_id: &ProjectId,
        step: StepKind,
    ) -> EngineResult<AnalysisReport> {
        if !step.is_analysis() {
            return Err(EngineError::NotAnalysis(step));
        }
        let project = self.repo.get_project(project_id).await?;
        let mut report = AnalysisReport::default();

        for id in &project.workflow_ids {
            match self.orchestrator.run_analysis_step(id, step).await {
                Ok(_) => report.analyzed.push(id.clone()),
                Err(e) if e.is_not_found() => report.missing.push(id.clone()),
                Err(e) => report.errors.push(DispatchFailure {
                    workflow_id: id.clone(),
                    message: e.to_string(),
                }),
            }
        }

        info!(
            project_id = %project_id,
            step = %step,
            analyzed = report.analyzed.len(),
            "Project analysis pass complete"
        );
        Ok(report)
    }
}

/// Clamp the requested concurrency to the allowed range.
pub(crate) fn clamp_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_PARALLEL_LIMIT)
        .clamp(MIN_PARALLEL_LIMIT, MAX_PARALLEL_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, harness_with, Harness, ScriptedExecutor};
    use cutroom_models::FailureRecord;

    fn coordinator(h: &Harness) -> ProjectCoordinator {
        ProjectCoordinator::new(h.repo.clone(), h.orchestrator.clone())
            .with_batch_delay(Duration::ZERO)
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 3);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(7)), 7);
        assert_eq!(clamp_limit(Some(50)), 10);
    }

    #[tokio::test]
    async fn test_add_videos_attaches_and_readies() {
        let h = harness();
        let c = coordinator(&h);
        let project = c.create_project("launch").await.unwrap();

        let created = c
            .add_videos(
                &project.id,
                vec!["videos/a.mp4".into(), "videos/b.mp4".into()],
            )
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        let project = c.get_project(&project.id).await.unwrap();
        assert_eq!(project.state, ProjectState::Ready);
        assert_eq!(project.workflow_ids.len(), 2);
        for wf in &created {
            assert!(project.contains(&wf.id));
            assert_eq!(wf.project_id.as_ref(), Some(&project.id));
        }
    }

    /// Seed a project with members in the given statuses; returns ids in
    /// project order.
    async fn seeded_project(h: &Harness, statuses: &[WorkflowStatus]) -> (ProjectId, Vec<WorkflowId>) {
        let c = coordinator(h);
        let project = c.create_project("batch").await.unwrap();
        let mut ids = Vec::new();
        for status in statuses {
            let mut wf = Workflow::new("ref").with_project(project.id.clone());
            wf.status = *status;
            if *status == WorkflowStatus::Error {
                wf.error = Some(FailureRecord::new(StepKind::Transcribe, "boom", true));
            }
            h.repo.create_workflow(&wf).await.unwrap();
            ids.push(wf.id.clone());
        }
        let member_ids = ids.clone();
        h.repo
            .update_project(&project.id, |p| {
                p.workflow_ids = member_ids.clone();
                Commit::Write
            })
            .await
            .unwrap();
        (project.id, ids)
    }

    #[tokio::test]
    async fn test_start_project_filters_by_status() {
        let h = harness();
        let (project_id, ids) = seeded_project(
            &h,
            &[
                WorkflowStatus::Created,        // a: starts
                WorkflowStatus::PendingReview1, // b: skipped with reason
                WorkflowStatus::Error,          // c: held back silently
                WorkflowStatus::Created,        // d: starts
            ],
        )
        .await;

        let report = coordinator(&h)
            .start_project(&project_id, StartOptions::default())
            .await
            .unwrap();

        assert_eq!(report.started, vec![ids[0].clone(), ids[3].clone()]);
        assert_eq!(
            report.skipped_by_status.get("pending_review_1"),
            Some(&vec![ids[1].clone()])
        );
        // The error member appears nowhere until include_failed opts it in
        assert!(!report.started.contains(&ids[2]));
        assert!(report
            .skipped_by_status
            .values()
            .all(|v| !v.contains(&ids[2])));
        assert!(report.errors.is_empty());

        // Started members ran the inline chain to the first review gate
        let a = h.repo.get_workflow(&ids[0]).await.unwrap();
        assert_eq!(a.status, WorkflowStatus::PendingReview1);
    }

    #[tokio::test]
    async fn test_start_project_include_failed() {
        let h = harness();
        let (project_id, ids) =
            seeded_project(&h, &[WorkflowStatus::Error, WorkflowStatus::Created]).await;

        let report = coordinator(&h)
            .start_project(
                &project_id,
                StartOptions {
                    include_failed: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.started.len(), 2);
        assert!(report.started.contains(&ids[0]));

        let recovered = h.repo.get_workflow(&ids[0]).await.unwrap();
        assert_eq!(recovered.status, WorkflowStatus::PendingReview1);
        assert!(recovered.error.is_none());
    }

    #[tokio::test]
    async fn test_start_project_rejects_foreign_ids() {
        let h = harness();
        let (project_id, ids) = seeded_project(&h, &[WorkflowStatus::Created]).await;
        let foreign = WorkflowId::new();

        let report = coordinator(&h)
            .start_project(
                &project_id,
                StartOptions {
                    workflow_ids: Some(vec![ids[0].clone(), foreign.clone()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.started, vec![ids[0].clone()]);
        assert_eq!(report.invalid_workflow_ids, vec![foreign]);
    }

    #[tokio::test]
    async fn test_start_project_chunks_whole_batch() {
        let h = harness();
        let statuses = vec![WorkflowStatus::Created; 7];
        let (project_id, _) = seeded_project(&h, &statuses).await;

        let report = coordinator(&h)
            .start_project(
                &project_id,
                StartOptions {
                    parallel_limit: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // 3 + 3 + 1, all dispatched
        assert_eq!(report.started.len(), 7);
        assert_eq!(h.calls(StepKind::Transcribe), 7);

        let project = h.repo.get_project(&project_id).await.unwrap();
        assert_eq!(project.state, ProjectState::Processing);
    }

    #[tokio::test]
    async fn test_start_project_reports_missing_members() {
        let h = harness();
        let c = coordinator(&h);
        let project = c.create_project("batch").await.unwrap();
        let dangling = WorkflowId::new();
        h.repo
            .update_project(&project.id, |p| {
                p.workflow_ids.push(dangling.clone());
                Commit::Write
            })
            .await
            .unwrap();

        let report = c
            .start_project(&project.id, StartOptions::default())
            .await
            .unwrap();
        assert!(report.started.is_empty());
        assert_eq!(report.missing, vec![dangling]);
    }

    #[tokio::test]
    async fn test_start_project_collects_dispatch_failures() {
        let h = harness_with(vec![(
            StepKind::Transcribe,
            ScriptedExecutor::failing("t", "provider down", true),
        )]);
        let (project_id, ids) = seeded_project(&h, &[WorkflowStatus::Created]).await;

        let report = coordinator(&h)
            .start_project(&project_id, StartOptions::default())
            .await
            .unwrap();

        // A failing step still counts as started: the dispatch succeeded
        // and the failure is recorded on the workflow itself.
        assert_eq!(report.started, vec![ids[0].clone()]);
        let wf = h.repo.get_workflow(&ids[0]).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Error);
    }

    #[tokio::test]
    async fn test_project_stats_and_refresh() {
        let h = harness();
        let (project_id, _) = seeded_project(
            &h,
            &[
                WorkflowStatus::Completed,
                WorkflowStatus::Error,
                WorkflowStatus::Rendering,
            ],
        )
        .await;

        let c = coordinator(&h);
        let stats = c.project_stats(&project_id).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processing, 1);

        let project = c.refresh_state(&project_id).await.unwrap();
        assert_eq!(project.state, ProjectState::Processing);
    }

    #[tokio::test]
    async fn test_refresh_state_partial_complete() {
        let h = harness();
        let (project_id, _) =
            seeded_project(&h, &[WorkflowStatus::Completed, WorkflowStatus::Error]).await;

        let project = coordinator(&h).refresh_state(&project_id).await.unwrap();
        assert_eq!(project.state, ProjectState::PartialComplete);
    }

    #[tokio::test]
    async fn test_stats_count_dangling_members() {
        let h = harness();
        let (project_id, _) = seeded_project(&h, &[WorkflowStatus::Completed]).await;
        h.repo
            .update_project(&project_id, |p| {
                p.workflow_ids.push(WorkflowId::new());
                Commit::Write
            })
            .await
            .unwrap();

        let stats = coordinator(&h).project_stats(&project_id).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.missing, 1);
    }

    #[tokio::test]
    async fn test_run_analysis_patches_members() {
        let h = harness();
        let (project_id, ids) = seeded_project(
            &h,
            &[WorkflowStatus::PendingReview1, WorkflowStatus::Completed],
        )
        .await;

        let report = coordinator(&h)
            .run_analysis(&project_id, StepKind::NarrativeStructure)
            .await
            .unwrap();

        assert_eq!(report.analyzed.len(), 2);
        for id in &ids {
            let wf = h.repo.get_workflow(id).await.unwrap();
            assert!(wf.payload.contains_key("narrative"));
        }
        // Statuses untouched
        let first = h.repo.get_workflow(&ids[0]).await.unwrap();
        assert_eq!(first.status, WorkflowStatus::PendingReview1);
    }

    #[tokio::test]
    async fn test_run_analysis_rejects_pipeline_step() {
        let h = harness();
        let (project_id, _) = seeded_project(&h, &[]).await;

        let err = coordinator(&h)
            .run_analysis(&project_id, StepKind::Render)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAnalysis(StepKind::Render)));
    }
}
