//! Shared test fixtures: scripted executors and an in-memory harness.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use cutroom_models::{payload, Payload, StepKind, Workflow, WorkflowId};
use cutroom_queue::{QueueError, StepTask};
use cutroom_store::{MemoryStore, WorkflowRepository, WriteRetryConfig};

use crate::executor::{StepExecutor, StepFailure, StepOutput};
use crate::notify::{NotificationSink, WorkflowEvent};
use crate::orchestrator::{StepQueue, TaskOrchestrator};
use crate::registry::ExecutorRegistry;

/// Executor that patches one payload key, or fails on demand.
pub struct ScriptedExecutor {
    key: &'static str,
    fail: Mutex<Option<StepFailure>>,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    pub fn ok(key: &'static str) -> Arc<Self> {
        Arc::new(Self {
            key,
            fail: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(key: &'static str, message: &str, retryable: bool) -> Arc<Self> {
        let failure = if retryable {
            StepFailure::retryable(message)
        } else {
            StepFailure::fatal(message)
        };
        Arc::new(Self {
            key,
            fail: Mutex::new(Some(failure)),
            calls: AtomicU32::new(0),
        })
    }

    /// Stop failing; subsequent executions succeed.
    pub fn heal(&self) {
        *self.fail.lock().unwrap() = None;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, _workflow: &Workflow) -> Result<StepOutput, StepFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.fail.lock().unwrap().clone() {
            return Err(failure);
        }
        let mut patch = Payload::new();
        patch.insert(self.key.to_string(), json!(true));
        Ok(StepOutput::patch(patch))
    }
}

/// In-memory queue double with the same dedup contract as the real one.
#[derive(Default)]
pub struct FakeQueue {
    dedup: Mutex<HashSet<String>>,
    pub enqueued: Mutex<Vec<StepTask>>,
}

impl FakeQueue {
    /// Plant a live dedup key, as left behind by an earlier enqueue.
    pub fn seed_dedup(&self, id: &WorkflowId, step: StepKind) {
        let task = StepTask::new(id.clone(), step);
        self.dedup.lock().unwrap().insert(task.idempotency_key());
    }

    pub fn enqueued_steps(&self) -> Vec<StepKind> {
        self.enqueued.lock().unwrap().iter().map(|t| t.step).collect()
    }
}

#[async_trait]
impl StepQueue for FakeQueue {
    async fn enqueue(&self, task: &StepTask) -> Result<String, QueueError> {
        let key = task.idempotency_key();
        if !self.dedup.lock().unwrap().insert(key.clone()) {
            return Err(QueueError::Duplicate(key));
        }
        let mut enqueued = self.enqueued.lock().unwrap();
        enqueued.push(task.clone());
        Ok(format!("fake-{}", enqueued.len()))
    }

    async fn clear_dedup(&self, task: &StepTask) -> Result<(), QueueError> {
        self.dedup.lock().unwrap().remove(&task.idempotency_key());
        Ok(())
    }
}

/// Sink that records every event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<WorkflowEvent>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: WorkflowEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub repo: WorkflowRepository,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub executors: HashMap<StepKind, Arc<ScriptedExecutor>>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn calls(&self, step: StepKind) -> u32 {
        self.executors[&step].calls()
    }

    pub fn event_count(&self) -> usize {
        self.sink.events.lock().unwrap().len()
    }
}

/// In-memory harness with well-behaved executors for every step.
pub fn harness() -> Harness {
    harness_with(Vec::new())
}

/// Harness dispatching through a queue double instead of inline.
pub fn harness_with_queue(queue: Arc<FakeQueue>) -> Harness {
    let mut h = harness_with(Vec::new());
    let orchestrator = TaskOrchestrator::new(h.repo.clone(), registry_of(&h.executors))
        .with_queue(queue)
        .with_sink(h.sink.clone() as Arc<dyn NotificationSink>);
    h.orchestrator = Arc::new(orchestrator);
    h
}

fn registry_of(executors: &HashMap<StepKind, Arc<ScriptedExecutor>>) -> Arc<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    for (step, executor) in executors {
        registry.register(*step, executor.clone() as Arc<dyn StepExecutor>);
    }
    Arc::new(registry)
}

/// Harness with specific executors overridden.
pub fn harness_with(overrides: Vec<(StepKind, Arc<ScriptedExecutor>)>) -> Harness {
    let repo =
        WorkflowRepository::new(Arc::new(MemoryStore::new())).with_retry(WriteRetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        });

    let mut executors = HashMap::new();
    executors.insert(StepKind::Transcribe, ScriptedExecutor::ok(payload::TRANSCRIPT));
    executors.insert(StepKind::Analyze, ScriptedExecutor::ok("markup"));
    executors.insert(StepKind::Process, ScriptedExecutor::ok(payload::TIMELINE));
    executors.insert(StepKind::Preview, ScriptedExecutor::ok(payload::PREVIEW_REF));
    executors.insert(StepKind::Render, ScriptedExecutor::ok(payload::OUTPUT_REF));
    executors.insert(StepKind::RedundancyQuality, ScriptedExecutor::ok("redundancy"));
    executors.insert(StepKind::NarrativeStructure, ScriptedExecutor::ok("narrative"));
    executors.insert(StepKind::VisualNeeds, ScriptedExecutor::ok("visual_needs"));
    executors.insert(StepKind::GraphSync, ScriptedExecutor::ok("graph"));
    for (step, executor) in overrides {
        executors.insert(step, executor);
    }

    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Arc::new(
        TaskOrchestrator::new(repo.clone(), registry_of(&executors))
            .with_sink(sink.clone() as Arc<dyn NotificationSink>),
    );

    Harness {
        repo,
        orchestrator,
        executors,
        sink,
    }
}
