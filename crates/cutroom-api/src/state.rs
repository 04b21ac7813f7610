//! Application state.

use std::sync::Arc;

use tracing::{info, warn};

use cutroom_engine::{
    http_registry, ExecutorRegistry, NoopSink, NotificationSink, ProjectCoordinator,
    ProviderConfig, RecoveryManager, TaskOrchestrator, WebhookSink,
};
use cutroom_queue::TaskQueue;
use cutroom_store::{DocumentStore, MemoryStore, S3DocumentStore, WorkflowRepository};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub repo: WorkflowRepository,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub recovery: Arc<RecoveryManager>,
    pub coordinator: Arc<ProjectCoordinator>,
    pub queue: Option<Arc<TaskQueue>>,
}

impl AppState {
    /// Wire the state from explicit parts (tests use an in-memory store
    /// and scripted registries).
    pub fn assemble(
        config: ApiConfig,
        store: Arc<dyn DocumentStore>,
        registry: Arc<ExecutorRegistry>,
        queue: Option<Arc<TaskQueue>>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let repo = WorkflowRepository::new(store);
        let mut orchestrator = TaskOrchestrator::new(repo.clone(), registry).with_sink(sink);
        if let Some(queue) = &queue {
            orchestrator = orchestrator.with_queue(Arc::clone(queue) as Arc<_>);
        }
        let orchestrator = Arc::new(orchestrator);
        let recovery = Arc::new(RecoveryManager::new(repo.clone(), Arc::clone(&orchestrator)));
        let coordinator = Arc::new(ProjectCoordinator::new(
            repo.clone(),
            Arc::clone(&orchestrator),
        ));

        Self {
            config,
            repo,
            orchestrator,
            recovery,
            coordinator,
            queue,
        }
    }

    /// Create application state from environment variables.
    pub async fn from_env(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Arc<dyn DocumentStore> = if std::env::var("OBJECT_STORE_BUCKET").is_ok() {
            info!("Using S3-compatible document store");
            Arc::new(S3DocumentStore::from_env().await?)
        } else {
            warn!("OBJECT_STORE_BUCKET not set, using in-memory store (documents are volatile)");
            Arc::new(MemoryStore::new())
        };

        let queue = if std::env::var("REDIS_URL").is_ok() {
            let queue = TaskQueue::from_env()?;
            queue.init().await?;
            info!("Task queue connected, steps run on workers");
            Some(Arc::new(queue))
        } else {
            warn!("REDIS_URL not set, steps run inline in the API process");
            None
        };

        let registry = Arc::new(http_registry(&ProviderConfig::from_env()));

        let sink: Arc<dyn NotificationSink> = match WebhookSink::from_env() {
            Some(sink) => {
                info!("Webhook notifications enabled");
                Arc::new(sink)
            }
            None => Arc::new(NoopSink),
        };

        Ok(Self::assemble(config, store, registry, queue, sink))
    }
}
