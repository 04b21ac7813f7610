//! Pipeline step worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cutroom_engine::{
    http_registry, NoopSink, NotificationSink, ProviderConfig, TaskOrchestrator, WebhookSink,
};
use cutroom_queue::TaskQueue;
use cutroom_store::{S3DocumentStore, WorkflowRepository};
use cutroom_worker::{StepRunner, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting cutroom-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    // The worker shares workflow documents with the API, so it needs the
    // durable store; an in-memory fallback would process against a void.
    let store = match S3DocumentStore::from_env().await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create document store: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match TaskQueue::from_env() {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create task queue: {}", e);
            std::process::exit(1);
        }
    };

    let repo = WorkflowRepository::new(store);
    let registry = Arc::new(http_registry(&ProviderConfig::from_env()));
    let sink: Arc<dyn NotificationSink> = match WebhookSink::from_env() {
        Some(sink) => Arc::new(sink),
        None => Arc::new(NoopSink),
    };

    // Chained steps go back through the queue rather than running inline
    let orchestrator = Arc::new(
        TaskOrchestrator::new(repo, registry)
            .with_queue(Arc::clone(&queue) as Arc<_>)
            .with_sink(sink),
    );

    let runner = Arc::new(StepRunner::new(config, queue, orchestrator));

    // Signal handler flips the runner's shutdown watch
    let runner_signal = Arc::clone(&runner);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        runner_signal.shutdown();
    });

    if let Err(e) = runner.run().await {
        error!("Runner error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cutroom=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
