//! Typed repositories for workflows and projects.
//!
//! All mutation of shared state funnels through [`WorkflowRepository::update_workflow`]
//! and [`WorkflowRepository::update_project`]: read the current document and
//! version, apply a mutator, attempt a conditional put, and on conflict
//! re-read and retry the whole cycle. The retry budget here covers only
//! write races; step failures get the heavier orchestration-level treatment.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use cutroom_models::{Project, ProjectId, Workflow, WorkflowId, WorkflowStatus};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_conflict, record_exhausted};
use crate::store::DocumentStore;

/// Key prefix for workflow documents.
pub const WORKFLOW_PREFIX: &str = "workflows/";

/// Key prefix for project documents.
pub const PROJECT_PREFIX: &str = "projects/";

/// Mutator verdict for a read-modify-write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Write the mutated document back.
    Write,
    /// Leave the document untouched and return it as read.
    ///
    /// Used by the stale-delivery guard: after a conflict retry the
    /// re-read document may already have advanced past the state this
    /// mutation assumes, in which case the correct move is a no-op.
    Skip,
}

/// Result of an update cycle.
#[derive(Debug)]
pub struct UpdateOutcome<T> {
    /// The document as of the final read (mutated if written).
    pub document: T,
    /// Whether a write actually happened.
    pub written: bool,
}

/// Conflict-retry policy for read-modify-write cycles.
#[derive(Debug, Clone)]
pub struct WriteRetryConfig {
    /// Total attempts (initial try included).
    pub max_attempts: u32,
    /// Base delay, doubled per attempt: 100ms -> 200ms -> 400ms.
    pub base_delay: Duration,
}

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl WriteRetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.pow(attempt))
    }
}

/// Repository for workflow and project documents.
#[derive(Clone)]
pub struct WorkflowRepository {
    store: Arc<dyn DocumentStore>,
    retry: WriteRetryConfig,
}

impl WorkflowRepository {
    /// Create a new repository over a document store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            retry: WriteRetryConfig::default(),
        }
    }

    /// Override the conflict-retry policy (tests shrink the delays).
    pub fn with_retry(mut self, retry: WriteRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn workflow_key(id: &WorkflowId) -> String {
        format!("{WORKFLOW_PREFIX}{id}")
    }

    fn project_key(id: &ProjectId) -> String {
        format!("{PROJECT_PREFIX}{id}")
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    /// Create a new workflow document.
    pub async fn create_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        let bytes = serde_json::to_vec(workflow)?;
        self.store
            .create_raw(&Self::workflow_key(&workflow.id), bytes)
            .await?;
        info!(workflow_id = %workflow.id, "Created workflow document");
        Ok(())
    }

    /// Get a workflow by ID.
    pub async fn get_workflow(&self, id: &WorkflowId) -> StoreResult<Workflow> {
        let (bytes, _) = self.store.get_raw(&Self::workflow_key(id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Delete a workflow document.
    ///
    /// Does not cascade to any owning project; `workflow_ids` references
    /// are weak and readers tolerate dangling ids.
    pub async fn delete_workflow(&self, id: &WorkflowId) -> StoreResult<()> {
        self.store.delete_raw(&Self::workflow_key(id)).await?;
        info!(workflow_id = %id, "Deleted workflow document");
        Ok(())
    }

    /// List all workflows, optionally filtered by status.
    pub async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> StoreResult<Vec<Workflow>> {
        let keys = self.store.list_keys(WORKFLOW_PREFIX).await?;
        let mut workflows = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.get_raw(&key).await {
                Ok((bytes, _)) => {
                    let wf: Workflow = serde_json::from_slice(&bytes)?;
                    if status.is_none() || status == Some(wf.status) {
                        workflows.push(wf);
                    }
                }
                // Deleted between list and get; skip
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(workflows)
    }

    /// Read-modify-write a workflow with bounded conflict retry.
    ///
    /// The mutator sees the freshest document each attempt and answers
    /// [`Commit::Write`] or [`Commit::Skip`]. `updated_at` is refreshed on
    /// every write. After the retry budget is spent, surfaces
    /// [`StoreError::ConcurrencyExhausted`], which the orchestrator treats
    /// as a transient step failure.
    pub async fn update_workflow<F>(
        &self,
        id: &WorkflowId,
        mut mutate: F,
    ) -> StoreResult<UpdateOutcome<Workflow>>
    where
        F: FnMut(&mut Workflow) -> Commit + Send,
    {
        let key = Self::workflow_key(id);
        self.update_document(&key, "workflow", move |wf: &mut Workflow| {
            let verdict = mutate(wf);
            if verdict == Commit::Write {
                wf.touch();
            }
            verdict
        })
        .await
    }

    // =========================================================================
    // Projects
    // =========================================================================

    /// Create a new project document.
    pub async fn create_project(&self, project: &Project) -> StoreResult<()> {
        let bytes = serde_json::to_vec(project)?;
        self.store
            .create_raw(&Self::project_key(&project.id), bytes)
            .await?;
        info!(project_id = %project.id, "Created project document");
        Ok(())
    }

    /// Get a project by ID.
    pub async fn get_project(&self, id: &ProjectId) -> StoreResult<Project> {
        let (bytes, _) = self.store.get_raw(&Self::project_key(id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read-modify-write a project with the same retry discipline as
    /// workflows.
    pub async fn update_project<F>(
        &self,
        id: &ProjectId,
        mut mutate: F,
    ) -> StoreResult<UpdateOutcome<Project>>
    where
        F: FnMut(&mut Project) -> Commit + Send,
    {
        let key = Self::project_key(id);
        self.update_document(&key, "project", move |p: &mut Project| {
            let verdict = mutate(p);
            if verdict == Commit::Write {
                p.updated_at = chrono::Utc::now();
            }
            verdict
        })
        .await
    }

    // =========================================================================
    // Shared read-modify-write loop
    // =========================================================================

    async fn update_document<T, F>(
        &self,
        key: &str,
        kind: &'static str,
        mut mutate: F,
    ) -> StoreResult<UpdateOutcome<T>>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnMut(&mut T) -> Commit + Send,
    {
        for attempt in 0..self.retry.max_attempts {
            let (bytes, version) = self.store.get_raw(key).await?;
            let mut doc: T = serde_json::from_slice(&bytes)?;

            match mutate(&mut doc) {
                Commit::Skip => {
                    debug!(key, "Mutation skipped, document unchanged");
                    return Ok(UpdateOutcome {
                        document: doc,
                        written: false,
                    });
                }
                Commit::Write => {
                    let new_bytes = serde_json::to_vec(&doc)?;
                    match self.store.put_raw(key, new_bytes, &version).await {
                        Ok(_) => {
                            return Ok(UpdateOutcome {
                                document: doc,
                                written: true,
                            })
                        }
                        Err(e) if e.is_conflict() => {
                            record_conflict(kind);
                            let delay = self.retry.delay_for_attempt(attempt);
                            warn!(
                                key,
                                attempt = attempt + 1,
                                delay_ms = delay.as_millis() as u64,
                                "Version conflict, re-reading and retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        record_exhausted(kind);
        Err(StoreError::ConcurrencyExhausted {
            key: key.to_string(),
            attempts: self.retry.max_attempts,
        })
    }
}
