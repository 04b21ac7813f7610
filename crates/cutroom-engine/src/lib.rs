//! Orchestration core for the Cutroom pipeline.
//!
//! This crate provides:
//! - The [`StepExecutor`] contract and an HTTP-backed implementation
//! - The [`TaskOrchestrator`]: step execution, chaining, review gates
//! - The [`RecoveryManager`]: stuck detection, retry and manual fail
//! - The [`ProjectCoordinator`]: batch starting, stats, project analysis
//! - Webhook notifications for workflow lifecycle events

pub mod batch;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod providers;
pub mod recovery;
pub mod registry;

#[cfg(test)]
pub(crate) mod testutil;

pub use batch::{AnalysisReport, ProjectCoordinator, StartOptions, StartReport};
pub use error::{EngineError, EngineResult};
pub use executor::{StepExecutor, StepFailure, StepOutput};
pub use notify::{NoopSink, NotificationSink, WebhookSink, WorkflowEvent};
pub use orchestrator::{StepQueue, TaskOrchestrator};
pub use providers::{http_registry, HttpStepExecutor, ProviderConfig};
pub use recovery::{
    check_stuck, default_stuck_threshold, RecoveryManager, RecoveryReport, RetryStuckOptions,
    StuckCheck,
};
pub use registry::ExecutorRegistry;
