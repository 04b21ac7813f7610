//! Task orchestration: driving workflows through the pipeline.
//!
//! `run_step` is the single entry point for step execution, whether a
//! task arrived from the queue, a retry, or an inline call. It marks the
//! workflow as running, executes the matching [`StepExecutor`], commits
//! the outcome under the store's optimistic-concurrency discipline, and
//! chains the next step unless a review gate or terminal status halts
//! the pipeline.
//!
//! Every status write re-checks the observed status inside the mutator
//! and answers `Commit::Skip` when the document moved underneath us, so
//! duplicate or delayed task deliveries degrade to no-ops instead of
//! corrupting state.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use cutroom_models::{
    payload, FailureRecord, Payload, Project, ProjectId, StepKind, Workflow, WorkflowId,
    WorkflowStatus,
};
use cutroom_queue::{QueueError, StepTask, TaskQueue};
use cutroom_store::{Commit, WorkflowRepository};

use crate::error::{EngineError, EngineResult};
use crate::executor::StepFailure;
use crate::metrics;
use crate::notify::{NoopSink, NotificationSink, WorkflowEvent};
use crate::registry::ExecutorRegistry;

/// The queue operations the orchestrator needs.
///
/// A seam over [`TaskQueue`] so the dispatch and dedup paths can run
/// against a test double.
#[async_trait]
pub trait StepQueue: Send + Sync {
    async fn enqueue(&self, task: &StepTask) -> Result<String, QueueError>;
    async fn clear_dedup(&self, task: &StepTask) -> Result<(), QueueError>;
}

#[async_trait]
impl StepQueue for TaskQueue {
    async fn enqueue(&self, task: &StepTask) -> Result<String, QueueError> {
        TaskQueue::enqueue(self, task).await
    }

    async fn clear_dedup(&self, task: &StepTask) -> Result<(), QueueError> {
        TaskQueue::clear_dedup(self, task).await
    }
}

/// Statuses a step runs under and lands on when it succeeds.
struct StepPlan {
    running: WorkflowStatus,
    success: WorkflowStatus,
}

/// The status a step runs under when entered from `current`.
///
/// Returns `None` when `current` is not a legal entry point for the
/// step; the caller then decides between stale delivery and illegal
/// transition using pipeline phases.
fn plan_for(step: StepKind, current: WorkflowStatus) -> Option<StepPlan> {
    use WorkflowStatus::*;

    let running = match (step, current) {
        (StepKind::Transcribe, Created | Transcribing | Error) => Transcribing,
        (StepKind::Analyze, Transcribed | Analyzing | Error) => Analyzing,
        (StepKind::Process, XmlApproved | Processing | Error) => Processing,
        (StepKind::Preview, GeneratingPreview | Error) => GeneratingPreview,
        // Re-preview after block edits runs under its own status so the
        // review loop is visible in the status history.
        (StepKind::Preview, ModifyingBlocks | RegeneratingPreview) => RegeneratingPreview,
        // Completed is deliberately absent: a render delivery against a
        // completed workflow is a duplicate, and re-renders take the
        // `completed -> rendering` edge through render approval instead.
        (StepKind::Render, PendingReview2 | ModifyingBlocks | Rendering | Error) => Rendering,
        _ => return None,
    };

    Some(StepPlan {
        running,
        success: success_status(step)?,
    })
}

/// Default success status for a pipeline step.
fn success_status(step: StepKind) -> Option<WorkflowStatus> {
    use WorkflowStatus::*;
    match step {
        StepKind::Transcribe => Some(Transcribed),
        StepKind::Analyze => Some(PendingReview1),
        StepKind::Process => Some(GeneratingPreview),
        StepKind::Preview => Some(PendingReview2),
        StepKind::Render => Some(Completed),
        _ => None,
    }
}

/// Nominal running status, used in illegal-transition errors.
fn running_status(step: StepKind) -> WorkflowStatus {
    use WorkflowStatus::*;
    match step {
        StepKind::Transcribe => Transcribing,
        StepKind::Analyze => Analyzing,
        StepKind::Process => Processing,
        StepKind::Preview => GeneratingPreview,
        StepKind::Render => Rendering,
        // Analysis steps never run under a status
        _ => Error,
    }
}

/// Chain table: which step follows automatically on success.
///
/// Analyze and preview land on review gates, so their successors only
/// run after explicit human approval; render is terminal.
pub fn successor(step: StepKind) -> Option<StepKind> {
    match step {
        StepKind::Transcribe => Some(StepKind::Analyze),
        StepKind::Process => Some(StepKind::Preview),
        _ => None,
    }
}

/// Whether the workflow would hold an output artifact reference after
/// `patch` is merged. The payload is opaque here beyond presence, but an
/// empty string is as absent as a missing key.
fn has_output_ref(patch: &Payload, current: &Workflow) -> bool {
    match patch
        .get(payload::OUTPUT_REF)
        .or_else(|| current.payload.get(payload::OUTPUT_REF))
    {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Orchestrates step execution, approvals, and chaining for workflows.
pub struct TaskOrchestrator {
    repo: WorkflowRepository,
    registry: Arc<ExecutorRegistry>,
    queue: Option<Arc<dyn StepQueue>>,
    sink: Arc<dyn NotificationSink>,
}

impl TaskOrchestrator {
    /// Create an orchestrator that executes steps inline.
    pub fn new(repo: WorkflowRepository, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            repo,
            registry,
            queue: None,
            sink: Arc::new(NoopSink),
        }
    }

    /// Dispatch steps through a queue instead of running them inline.
    pub fn with_queue(mut self, queue: Arc<dyn StepQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attach a notification sink.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The underlying repository.
    pub fn repository(&self) -> &WorkflowRepository {
        &self.repo
    }

    pub(crate) async fn emit(&self, event: WorkflowEvent) {
        self.sink.notify(event).await;
    }

    // =========================================================================
    // Workflow lifecycle
    // =========================================================================

    /// Create a workflow, optionally starting the pipeline immediately.
    pub async fn create_workflow(
        &self,
        video_ref: impl Into<String>,
        project_id: Option<ProjectId>,
        auto_start: bool,
    ) -> EngineResult<Workflow> {
        let mut workflow = Workflow::new(video_ref);
        if let Some(project_id) = project_id {
            workflow = workflow.with_project(project_id);
        }
        self.repo.create_workflow(&workflow).await?;

        if auto_start {
            return self.dispatch(&workflow.id, StepKind::Transcribe).await;
        }
        Ok(workflow)
    }

    /// Get a workflow by ID.
    pub async fn get_workflow(&self, id: &WorkflowId) -> EngineResult<Workflow> {
        Ok(self.repo.get_workflow(id).await?)
    }

    /// List workflows, optionally filtered by status.
    pub async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> EngineResult<Vec<Workflow>> {
        Ok(self.repo.list_workflows(status).await?)
    }

    /// Delete a workflow. Project membership references are weak and are
    /// not cascaded.
    pub async fn delete_workflow(&self, id: &WorkflowId) -> EngineResult<()> {
        Ok(self.repo.delete_workflow(id).await?)
    }

    /// Get a project by ID.
    pub async fn get_project(&self, id: &ProjectId) -> EngineResult<Project> {
        Ok(self.repo.get_project(id).await?)
    }

    // =========================================================================
    // Step dispatch and execution
    // =========================================================================

    /// Hand a step to the queue, or run it inline when no queue is
    /// configured.
    ///
    /// A duplicate-suppressed enqueue is success: the step is already on
    /// its way.
    pub async fn dispatch(&self, id: &WorkflowId, step: StepKind) -> EngineResult<Workflow> {
        match &self.queue {
            Some(queue) => {
                let task = StepTask::new(id.clone(), step);
                match queue.enqueue(&task).await {
                    Ok(_) => {}
                    Err(QueueError::Duplicate(key)) => {
                        debug!(%key, "Step already enqueued, skipping");
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(self.repo.get_workflow(id).await?)
            }
            None => self.run_step(id, step).await,
        }
    }

    /// Drop the dedup key for a step so a deliberate re-drive is not
    /// suppressed as a duplicate enqueue. No-op without a queue.
    pub(crate) async fn clear_step_dedup(
        &self,
        id: &WorkflowId,
        step: StepKind,
    ) -> EngineResult<()> {
        if let Some(queue) = &self.queue {
            queue.clear_dedup(&StepTask::new(id.clone(), step)).await?;
        }
        Ok(())
    }

    /// Execute one pipeline step against a workflow.
    ///
    /// Returns the workflow after the step settles: success status, the
    /// end of any chained steps, `error` on step failure, or untouched
    /// when the delivery was stale. `Err` is reserved for invalid
    /// requests and infrastructure failures.
    pub fn run_step<'a>(
        &'a self,
        id: &'a WorkflowId,
        step: StepKind,
    ) -> BoxFuture<'a, EngineResult<Workflow>> {
        // Boxed for the recursion through chaining.
        Box::pin(self.run_step_inner(id, step))
    }

    async fn run_step_inner(&self, id: &WorkflowId, step: StepKind) -> EngineResult<Workflow> {
        if step.is_analysis() {
            return Err(EngineError::NotChainable(step));
        }
        let executor = self
            .registry
            .get(step)
            .ok_or(EngineError::StepNotRegistered(step))?;

        let workflow = self.repo.get_workflow(id).await?;

        let Some(plan) = plan_for(step, workflow.status) else {
            // Not an entry point for this step. If the workflow already
            // moved at or past the step's landing phase this is a stale
            // delivery and a no-op; otherwise the caller jumped ahead.
            let landing = success_status(step)
                .map(|s| s.phase())
                .unwrap_or(u8::MAX);
            if workflow.status != WorkflowStatus::Error && workflow.status.phase() >= landing {
                debug!(
                    workflow_id = %id,
                    step = %step,
                    status = %workflow.status,
                    "Stale task delivery, workflow already advanced"
                );
                metrics::record_stale_delivery(step);
                return Ok(workflow);
            }
            return Err(EngineError::IllegalTransition(
                cutroom_models::IllegalTransition {
                    from: workflow.status,
                    to: running_status(step),
                },
            ));
        };

        // Mark the workflow as running, unless a previous delivery of
        // this step already did.
        let current = if workflow.status == plan.running {
            workflow
        } else {
            let observed = workflow.status;
            observed.verify_transition(plan.running)?;
            let outcome = self
                .repo
                .update_workflow(id, |w| {
                    if w.status != observed {
                        return Commit::Skip;
                    }
                    w.status = plan.running;
                    w.error = None;
                    Commit::Write
                })
                .await?;
            if !outcome.written {
                debug!(
                    workflow_id = %id,
                    step = %step,
                    "Lost the start race, treating delivery as stale"
                );
                metrics::record_stale_delivery(step);
                return Ok(outcome.document);
            }
            self.emit(WorkflowEvent::status_changed(id, observed, plan.running))
                .await;
            outcome.document
        };

        info!(workflow_id = %id, step = %step, status = %current.status, "Executing step");
        metrics::record_step_executed(step);

        match executor.execute(&current).await {
            Ok(output) => {
                let success = output.new_status.unwrap_or(plan.success);
                plan.running.verify_transition(success)?;

                let patch = output.payload_patch;
                // A completed workflow must carry its output artifact;
                // an executor that reports success without one is broken.
                if success == WorkflowStatus::Completed && !has_output_ref(&patch, &current) {
                    let failure =
                        StepFailure::fatal("step reported success without an output reference");
                    return self.fail_step(id, step, plan.running, failure).await;
                }
                let outcome = self
                    .repo
                    .update_workflow(id, |w| {
                        if w.status != plan.running {
                            return Commit::Skip;
                        }
                        w.status = success;
                        w.error = None;
                        for (key, value) in &patch {
                            w.payload.insert(key.clone(), value.clone());
                        }
                        Commit::Write
                    })
                    .await?;
                if !outcome.written {
                    debug!(workflow_id = %id, step = %step, "Workflow moved during execution, dropping result");
                    return Ok(outcome.document);
                }
                self.emit(WorkflowEvent::status_changed(id, plan.running, success))
                    .await;

                info!(workflow_id = %id, step = %step, status = %success, "Step completed");

                if success.is_review_gate() || success.is_terminal() {
                    debug!(workflow_id = %id, status = %success, "Pipeline halted for review/terminal");
                    return Ok(outcome.document);
                }
                if let Some(next) = output.next_step.or_else(|| successor(step)) {
                    return self.dispatch(id, next).await;
                }
                Ok(outcome.document)
            }
            Err(failure) => self.fail_step(id, step, plan.running, failure).await,
        }
    }

    /// Record a step failure on the workflow, guarded on the running
    /// status, and notify.
    async fn fail_step(
        &self,
        id: &WorkflowId,
        step: StepKind,
        running: WorkflowStatus,
        failure: StepFailure,
    ) -> EngineResult<Workflow> {
        warn!(
            workflow_id = %id,
            step = %step,
            retryable = failure.retryable,
            "Step failed: {}",
            failure.message
        );
        metrics::record_step_failure(step);

        let record = FailureRecord::new(step, failure.message.clone(), failure.retryable)
            .with_prior_status(running);
        let outcome = self
            .repo
            .update_workflow(id, |w| {
                if w.status != running {
                    return Commit::Skip;
                }
                w.record_failure(record.clone());
                Commit::Write
            })
            .await?;
        if outcome.written {
            self.emit(WorkflowEvent::step_failed(id, step, running, failure.message))
                .await;
        }
        Ok(outcome.document)
    }

    /// Run a Phase-5 analyzer against a workflow.
    ///
    /// Analyzers patch the payload and never touch status, so there is
    /// no running state to mark and no chaining. A failure surfaces as
    /// an error to the caller instead of moving the workflow to `error`:
    /// analyzers run against settled workflows whose status must not
    /// regress.
    pub async fn run_analysis_step(
        &self,
        id: &WorkflowId,
        step: StepKind,
    ) -> EngineResult<Workflow> {
        if !step.is_analysis() {
            return Err(EngineError::NotAnalysis(step));
        }
        let executor = self
            .registry
            .get(step)
            .ok_or(EngineError::StepNotRegistered(step))?;

        let workflow = self.repo.get_workflow(id).await?;
        info!(workflow_id = %id, step = %step, "Running analysis step");
        metrics::record_step_executed(step);

        match executor.execute(&workflow).await {
            Ok(output) => {
                let patch = output.payload_patch;
                if patch.is_empty() {
                    return Ok(workflow);
                }
                let outcome = self
                    .repo
                    .update_workflow(id, |w| {
                        for (key, value) in &patch {
                            w.payload.insert(key.clone(), value.clone());
                        }
                        Commit::Write
                    })
                    .await?;
                Ok(outcome.document)
            }
            Err(failure) => {
                metrics::record_step_failure(step);
                Err(EngineError::AnalysisFailed {
                    step,
                    message: failure.message,
                })
            }
        }
    }

    // =========================================================================
    // Human review gates
    // =========================================================================

    /// Approve the review-1 analysis markup.
    ///
    /// Stores the approved markup and moves to `xml_approved`; with
    /// `auto_continue` the process step starts immediately.
    pub async fn submit_review1(
        &self,
        id: &WorkflowId,
        approved_markup: serde_json::Value,
        auto_continue: bool,
    ) -> EngineResult<Workflow> {
        let workflow = self.repo.get_workflow(id).await?;
        workflow
            .status
            .verify_transition(WorkflowStatus::XmlApproved)?;

        let outcome = self
            .repo
            .update_workflow(id, |w| {
                if w.status != WorkflowStatus::PendingReview1 {
                    return Commit::Skip;
                }
                w.status = WorkflowStatus::XmlApproved;
                w.payload
                    .insert(payload::APPROVED_MARKUP.to_string(), approved_markup.clone());
                Commit::Write
            })
            .await?;
        if !outcome.written {
            // Raced with another approval; the markup already landed.
            return Ok(outcome.document);
        }
        info!(workflow_id = %id, "Review 1 approved");
        self.emit(WorkflowEvent::status_changed(
            id,
            WorkflowStatus::PendingReview1,
            WorkflowStatus::XmlApproved,
        ))
        .await;

        if auto_continue {
            return self.dispatch(id, StepKind::Process).await;
        }
        Ok(outcome.document)
    }

    /// Approve the review-2 preview and start the final render.
    ///
    /// Also re-renders completed workflows: the `completed -> rendering`
    /// edge is taken here, under approval, because `run_step` treats
    /// render deliveries against completed workflows as stale.
    pub async fn approve_render(
        &self,
        id: &WorkflowId,
        render_options: Option<serde_json::Value>,
    ) -> EngineResult<Workflow> {
        let workflow = self.repo.get_workflow(id).await?;
        workflow.status.verify_transition(WorkflowStatus::Rendering)?;

        if let Some(options) = render_options {
            let observed = workflow.status;
            self.repo
                .update_workflow(id, |w| {
                    if w.status != observed {
                        return Commit::Skip;
                    }
                    w.payload
                        .insert(payload::RENDER_OPTIONS.to_string(), options.clone());
                    Commit::Write
                })
                .await?;
        }

        if workflow.status == WorkflowStatus::Completed {
            let outcome = self
                .repo
                .update_workflow(id, |w| {
                    if w.status != WorkflowStatus::Completed {
                        return Commit::Skip;
                    }
                    w.status = WorkflowStatus::Rendering;
                    w.error = None;
                    Commit::Write
                })
                .await?;
            if !outcome.written {
                // Raced with another approval; that one owns the render.
                return Ok(outcome.document);
            }
            self.emit(WorkflowEvent::status_changed(
                id,
                WorkflowStatus::Completed,
                WorkflowStatus::Rendering,
            ))
            .await;
            // A live dedup key from the first render would swallow the
            // re-enqueue.
            self.clear_step_dedup(id, StepKind::Render).await?;
        }

        info!(workflow_id = %id, "Render approved");
        self.dispatch(id, StepKind::Render).await
    }

    /// Submit block modifications from review 2.
    ///
    /// Stores the changes, moves to `modifying_blocks`, and (unless
    /// `regenerate` is off) kicks the preview step to rebuild the
    /// preview and return to the review gate.
    pub async fn submit_block_modifications(
        &self,
        id: &WorkflowId,
        changes: serde_json::Value,
        regenerate: bool,
    ) -> EngineResult<Workflow> {
        let workflow = self.repo.get_workflow(id).await?;
        workflow
            .status
            .verify_transition(WorkflowStatus::ModifyingBlocks)?;

        let outcome = self
            .repo
            .update_workflow(id, |w| {
                if w.status != WorkflowStatus::PendingReview2 {
                    return Commit::Skip;
                }
                w.status = WorkflowStatus::ModifyingBlocks;
                w.payload
                    .insert(payload::BLOCK_CHANGES.to_string(), changes.clone());
                Commit::Write
            })
            .await?;
        if !outcome.written {
            return Ok(outcome.document);
        }
        info!(workflow_id = %id, "Block modifications submitted");
        self.emit(WorkflowEvent::status_changed(
            id,
            WorkflowStatus::PendingReview2,
            WorkflowStatus::ModifyingBlocks,
        ))
        .await;

        if regenerate {
            return self.dispatch(id, StepKind::Preview).await;
        }
        Ok(outcome.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, harness_with, harness_with_queue, FakeQueue, ScriptedExecutor};
    use cutroom_store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_chain_halts_at_review1() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("videos/talk.mp4", None, true)
            .await
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::PendingReview1);
        assert!(wf.has_transcript());
        assert!(wf.payload.contains_key("markup"));
        assert_eq!(h.calls(StepKind::Transcribe), 1);
        assert_eq!(h.calls(StepKind::Analyze), 1);
        // Nothing runs past the review gate without approval
        assert_eq!(h.calls(StepKind::Process), 0);
    }

    #[tokio::test]
    async fn test_chain_emits_status_events() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();

        let events = h.sink.events.lock().unwrap();
        let transitions: Vec<(WorkflowStatus, WorkflowStatus)> =
            events.iter().map(|e| (e.from, e.to)).collect();
        assert_eq!(
            transitions,
            vec![
                (WorkflowStatus::Created, WorkflowStatus::Transcribing),
                (WorkflowStatus::Transcribing, WorkflowStatus::Transcribed),
                (WorkflowStatus::Transcribed, WorkflowStatus::Analyzing),
                (WorkflowStatus::Analyzing, WorkflowStatus::PendingReview1),
            ]
        );
        drop(events);
        assert_eq!(wf.status, WorkflowStatus::PendingReview1);
    }

    #[tokio::test]
    async fn test_stale_delivery_is_noop() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        let events_before = h.event_count();

        // Redeliver a step the workflow already moved past.
        let after = h
            .orchestrator
            .run_step(&wf.id, StepKind::Transcribe)
            .await
            .unwrap();

        assert_eq!(after.status, WorkflowStatus::PendingReview1);
        assert_eq!(h.calls(StepKind::Transcribe), 1);
        assert_eq!(h.event_count(), events_before);
    }

    #[tokio::test]
    async fn test_premature_step_is_illegal() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, false)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .run_step(&wf.id, StepKind::Render)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition(_)));

        // Workflow untouched
        let wf = h.repo.get_workflow(&wf.id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Created);
    }

    #[tokio::test]
    async fn test_review1_approval_continues_to_review2() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();

        let wf = h
            .orchestrator
            .submit_review1(&wf.id, json!({"segments": []}), true)
            .await
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::PendingReview2);
        assert!(wf.payload.contains_key(payload::APPROVED_MARKUP));
        assert!(wf.payload.contains_key(payload::TIMELINE));
        assert!(wf.payload.contains_key(payload::PREVIEW_REF));
        assert_eq!(h.calls(StepKind::Process), 1);
        assert_eq!(h.calls(StepKind::Preview), 1);
        assert_eq!(h.calls(StepKind::Render), 0);
    }

    #[tokio::test]
    async fn test_review1_approval_without_continue_rests() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();

        let wf = h
            .orchestrator
            .submit_review1(&wf.id, json!({}), false)
            .await
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::XmlApproved);
        assert_eq!(h.calls(StepKind::Process), 0);
    }

    #[tokio::test]
    async fn test_review1_from_wrong_status_rejected() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, false)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .submit_review1(&wf.id, json!({}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn test_approve_render_completes() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        h.orchestrator
            .submit_review1(&wf.id, json!({}), true)
            .await
            .unwrap();

        let wf = h
            .orchestrator
            .approve_render(&wf.id, Some(json!({"resolution": "1080p"})))
            .await
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.payload.contains_key(payload::OUTPUT_REF));
        assert!(wf.payload.contains_key(payload::RENDER_OPTIONS));
        assert_eq!(h.calls(StepKind::Render), 1);
    }

    #[tokio::test]
    async fn test_rerender_from_completed() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        h.orchestrator
            .submit_review1(&wf.id, json!({}), true)
            .await
            .unwrap();
        h.orchestrator.approve_render(&wf.id, None).await.unwrap();

        let wf = h.orchestrator.approve_render(&wf.id, None).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(h.calls(StepKind::Render), 2);
    }

    #[tokio::test]
    async fn test_duplicate_render_delivery_after_completion_is_noop() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        h.orchestrator
            .submit_review1(&wf.id, json!({}), true)
            .await
            .unwrap();
        h.orchestrator.approve_render(&wf.id, None).await.unwrap();
        let events_before = h.event_count();

        // A worker that crashed between the success write and the ack
        // gets its task redelivered after completion.
        let after = h
            .orchestrator
            .run_step(&wf.id, StepKind::Render)
            .await
            .unwrap();

        assert_eq!(after.status, WorkflowStatus::Completed);
        assert_eq!(h.calls(StepKind::Render), 1);
        assert_eq!(h.event_count(), events_before);
    }

    #[tokio::test]
    async fn test_completed_requires_output_reference() {
        // Render executor that succeeds but never writes the output ref
        let h = harness_with(vec![(StepKind::Render, ScriptedExecutor::ok("render_log"))]);
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        h.orchestrator
            .submit_review1(&wf.id, json!({}), true)
            .await
            .unwrap();

        let wf = h.orchestrator.approve_render(&wf.id, None).await.unwrap();

        assert_eq!(wf.status, WorkflowStatus::Error);
        let record = wf.error.as_ref().unwrap();
        assert_eq!(record.stage, StepKind::Render);
        assert!(!record.retryable);
        assert!(record.message.contains("output reference"));
    }

    #[tokio::test]
    async fn test_block_modification_loop() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        h.orchestrator
            .submit_review1(&wf.id, json!({}), true)
            .await
            .unwrap();

        let wf = h
            .orchestrator
            .submit_block_modifications(&wf.id, json!([{"op": "drop", "block": 3}]), true)
            .await
            .unwrap();

        // Preview regenerated and back at the gate
        assert_eq!(wf.status, WorkflowStatus::PendingReview2);
        assert!(wf.payload.contains_key(payload::BLOCK_CHANGES));
        assert_eq!(h.calls(StepKind::Preview), 2);

        let events = h.sink.events.lock().unwrap();
        assert!(events.iter().any(|e| {
            e.from == WorkflowStatus::ModifyingBlocks
                && e.to == WorkflowStatus::RegeneratingPreview
        }));
    }

    #[tokio::test]
    async fn test_step_failure_records_error() {
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
        let record = wf.error.as_ref().unwrap();
        assert_eq!(record.stage, StepKind::Analyze);
        assert_eq!(record.prior_status, Some(WorkflowStatus::Analyzing));
        assert!(record.retryable);
        // The transcribe result survived the failure
        assert!(wf.has_transcript());
        assert_eq!(h.calls(StepKind::Process), 0);

        let events = h.sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event, crate::notify::EventKind::StepFailed);
        assert_eq!(last.step, Some(StepKind::Analyze));
    }

    #[tokio::test]
    async fn test_failed_step_rerun_after_heal() {
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
        let wf = h
            .orchestrator
            .run_step(&wf.id, StepKind::Analyze)
            .await
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::PendingReview1);
        assert!(wf.error.is_none());
        assert!(wf.has_transcript());
    }

    #[tokio::test]
    async fn test_unregistered_step_leaves_workflow_untouched() {
        let repo = WorkflowRepository::new(Arc::new(MemoryStore::new()));
        let orchestrator = TaskOrchestrator::new(repo.clone(), Arc::new(ExecutorRegistry::new()));
        let wf = orchestrator
            .create_workflow("ref", None, false)
            .await
            .unwrap();

        let err = orchestrator
            .run_step(&wf.id, StepKind::Transcribe)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StepNotRegistered(StepKind::Transcribe)));

        let wf = repo.get_workflow(&wf.id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Created);
    }

    #[tokio::test]
    async fn test_analysis_step_patches_without_status_change() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::PendingReview1);

        let wf = h
            .orchestrator
            .run_analysis_step(&wf.id, StepKind::RedundancyQuality)
            .await
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::PendingReview1);
        assert!(wf.payload.contains_key("redundancy"));
    }

    #[tokio::test]
    async fn test_analysis_step_rejected_in_pipeline() {
        let h = harness();
        let wf = h
            .orchestrator
            .create_workflow("ref", None, false)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .run_step(&wf.id, StepKind::GraphSync)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotChainable(StepKind::GraphSync)));

        let err = h
            .orchestrator
            .run_analysis_step(&wf.id, StepKind::Transcribe)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAnalysis(StepKind::Transcribe)));
    }

    #[tokio::test]
    async fn test_dispatch_with_queue_defers_execution() {
        let queue = Arc::new(FakeQueue::default());
        let h = harness_with_queue(queue.clone());

        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::Created);
        assert_eq!(h.calls(StepKind::Transcribe), 0);
        assert_eq!(queue.enqueued_steps(), vec![StepKind::Transcribe]);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_counts_as_dispatched() {
        let queue = Arc::new(FakeQueue::default());
        let h = harness_with_queue(queue.clone());
        let wf = h
            .orchestrator
            .create_workflow("ref", None, true)
            .await
            .unwrap();

        // Second dispatch lands on the live dedup key; still success.
        h.orchestrator
            .dispatch(&wf.id, StepKind::Transcribe)
            .await
            .unwrap();
        assert_eq!(queue.enqueued_steps(), vec![StepKind::Transcribe]);
    }

    #[tokio::test]
    async fn test_successor_table() {
        assert_eq!(successor(StepKind::Transcribe), Some(StepKind::Analyze));
        assert_eq!(successor(StepKind::Analyze), None);
        assert_eq!(successor(StepKind::Process), Some(StepKind::Preview));
        assert_eq!(successor(StepKind::Preview), None);
        assert_eq!(successor(StepKind::Render), None);
    }
}
