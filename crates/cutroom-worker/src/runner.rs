//! Task consumption loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cutroom_engine::{EngineError, TaskOrchestrator};
use cutroom_queue::{StepTask, TaskQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Consumes step tasks from the queue and drives them through the
/// orchestrator.
pub struct StepRunner {
    config: WorkerConfig,
    queue: Arc<TaskQueue>,
    orchestrator: Arc<TaskOrchestrator>,
    task_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl StepRunner {
    /// Create a new runner.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<TaskQueue>,
        orchestrator: Arc<TaskOrchestrator>,
    ) -> Self {
        let task_semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            orchestrator,
            task_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the runner. Returns when a shutdown signal has been sent
    /// and in-flight tasks have drained (or the drain timeout expired).
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting step runner '{}' with {} max concurrent tasks",
            self.consumer_name, self.config.max_concurrent_tasks
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically claim tasks orphaned by crashed workers
        let queue = Arc::clone(&self.queue);
        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.task_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let claim_min_idle = self.config.claim_min_idle;
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let idle_ms = claim_min_idle.as_millis() as u64;
                        match queue.claim_pending(&consumer_name, idle_ms, 5).await {
                            Ok(tasks) if !tasks.is_empty() => {
                                info!("Claimed {} pending tasks", tasks.len());
                                for (message_id, task) in tasks {
                                    let orchestrator = Arc::clone(&orchestrator);
                                    let queue = Arc::clone(&queue);
                                    let permit = match semaphore.clone().acquire_owned().await {
                                        Ok(p) => p,
                                        Err(_) => break,
                                    };

                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_task(orchestrator, queue, message_id, task)
                                            .await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending tasks: {}", e);
                            }
                        }
                    }
                }
            }
        });

        // Main consumption loop
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping runner");
                        break;
                    }
                }
                result = self.consume_tasks() => {
                    if let Err(e) = result {
                        error!("Error consuming tasks: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight tasks to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_tasks()).await;

        info!("Step runner stopped");
        Ok(())
    }

    /// Consume and dispatch tasks from the queue.
    async fn consume_tasks(&self) -> WorkerResult<()> {
        let available = self.task_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let tasks = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.poll_block.as_millis() as u64,
                available.min(5),
            )
            .await?;

        if tasks.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} tasks from queue", tasks.len());

        for (message_id, task) in tasks {
            let orchestrator = Arc::clone(&self.orchestrator);
            let queue = Arc::clone(&self.queue);
            let permit = self
                .task_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::internal("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_task(orchestrator, queue, message_id, task).await;
            });
        }

        Ok(())
    }

    /// Execute a single task with retry and DLQ handling.
    async fn execute_task(
        orchestrator: Arc<TaskOrchestrator>,
        queue: Arc<TaskQueue>,
        message_id: String,
        task: StepTask,
    ) {
        info!(
            workflow_id = %task.workflow_id,
            step = %task.step,
            "Executing task {}",
            task.task_id
        );

        // Step failures are absorbed into the workflow record; an Err here
        // means the task itself could not be carried out.
        let result = orchestrator.run_step(&task.workflow_id, task.step).await;

        match result {
            Ok(workflow) => {
                debug!(
                    workflow_id = %task.workflow_id,
                    status = %workflow.status,
                    "Task {} done",
                    task.task_id
                );
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack task {}: {}", task.task_id, e);
                }
                // Clear dedup key so the same step can be re-dispatched later
                if let Err(e) = queue.clear_dedup(&task).await {
                    warn!("Failed to clear dedup key for task {}: {}", task.task_id, e);
                }
            }
            Err(e) if !is_retryable(&e) => {
                warn!(
                    "Task {} rejected ({}), moving to DLQ without retry",
                    task.task_id, e
                );
                if let Err(dlq_err) = queue.dlq(&message_id, &task, &e.to_string()).await {
                    error!("Failed to move task {} to DLQ: {}", task.task_id, dlq_err);
                }
                if let Err(e) = queue.clear_dedup(&task).await {
                    warn!("Failed to clear dedup key for task {}: {}", task.task_id, e);
                }
            }
            Err(e) => {
                error!("Task {} failed: {}", task.task_id, e);

                let retry_count = queue.increment_retry(&message_id).await.unwrap_or(999);
                let max_retries = queue.max_retries();

                if retry_count >= max_retries {
                    warn!(
                        "Task {} exceeded max retries ({}), moving to DLQ",
                        task.task_id, max_retries
                    );
                    if let Err(dlq_err) = queue.dlq(&message_id, &task, &e.to_string()).await {
                        error!("Failed to move task {} to DLQ: {}", task.task_id, dlq_err);
                    }
                    // Clear dedup key so the step can be retried manually later
                    if let Err(e) = queue.clear_dedup(&task).await {
                        warn!("Failed to clear dedup key for task {}: {}", task.task_id, e);
                    }
                } else {
                    info!(
                        "Task {} will be retried (attempt {}/{})",
                        task.task_id, retry_count, max_retries
                    );
                    // Task is redelivered after the pending-claim idle window
                }
            }
        }
    }

    /// Wait for all in-flight tasks to complete.
    async fn wait_for_tasks(&self) {
        loop {
            let available = self.task_semaphore.available_permits();
            if available == self.config.max_concurrent_tasks {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Whether redelivering the task could change the outcome. Transition
/// rejections and missing documents stay wrong no matter how often the
/// task is replayed.
fn is_retryable(error: &EngineError) -> bool {
    match error {
        EngineError::IllegalTransition(_) => false,
        EngineError::AlreadyCompleted(_) => false,
        EngineError::StepRequired(_) => false,
        EngineError::StepNotRegistered(_) => false,
        EngineError::NotChainable(_) => false,
        EngineError::NotAnalysis(_) => false,
        EngineError::Store(e) => !matches!(e, cutroom_store::StoreError::NotFound(_)),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutroom_models::{StepKind, WorkflowId, WorkflowStatus};
    use cutroom_store::StoreError;

    #[test]
    fn test_transition_rejections_are_not_retryable() {
        assert!(!is_retryable(&EngineError::AlreadyCompleted(
            WorkflowId::from_string("wf-1")
        )));
        assert!(!is_retryable(&EngineError::StepRequired(
            WorkflowStatus::Error
        )));
        assert!(!is_retryable(&EngineError::NotChainable(StepKind::Render)));
        assert!(!is_retryable(&EngineError::Store(StoreError::NotFound(
            "workflows/wf-1".to_string()
        ))));
    }

    #[test]
    fn test_infrastructure_errors_are_retryable() {
        assert!(is_retryable(&EngineError::Store(
            StoreError::ConcurrencyExhausted {
                key: "workflows/wf-1".to_string(),
                attempts: 3,
            }
        )));
        assert!(is_retryable(&EngineError::Store(StoreError::backend(
            "connection reset"
        ))));
    }
}
