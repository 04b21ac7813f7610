//! Workflow event notifications.
//!
//! The orchestrator hands events to a [`NotificationSink`] and moves on;
//! delivery is best-effort and must never block or fail a state
//! transition. The webhook sink does its retrying on a detached task.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use cutroom_models::{StepKind, WorkflowId, WorkflowStatus};

/// Kind of workflow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusChanged,
    StepFailed,
}

/// A single workflow lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
    pub workflow_id: WorkflowId,
    pub event: EventKind,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<StepKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl WorkflowEvent {
    /// A successful status transition.
    pub fn status_changed(id: &WorkflowId, from: WorkflowStatus, to: WorkflowStatus) -> Self {
        Self {
            workflow_id: id.clone(),
            event: EventKind::StatusChanged,
            from,
            to,
            step: None,
            message: None,
            at: Utc::now(),
        }
    }

    /// A step failure that moved the workflow to `error`.
    pub fn step_failed(
        id: &WorkflowId,
        step: StepKind,
        from: WorkflowStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: id.clone(),
            event: EventKind::StepFailed,
            from,
            to: WorkflowStatus::Error,
            step: Some(step),
            message: Some(message.into()),
            at: Utc::now(),
        }
    }
}

/// Receiver for workflow events.
///
/// `notify` must return promptly; slow delivery belongs on a background
/// task inside the sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: WorkflowEvent);
}

/// Sink that drops every event. Default when no webhook is configured.
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, _event: WorkflowEvent) {}
}

/// Fire-and-forget webhook delivery with bounded retry.
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
    max_attempts: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl WebhookSink {
    /// Create a sink posting to the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        }
    }

    /// Create from the `WEBHOOK_URL` environment variable, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var("WEBHOOK_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, event: WorkflowEvent) {
        let http = self.http.clone();
        let url = self.url.clone();
        let max_attempts = self.max_attempts;
        let base_delay = self.base_delay;
        let timeout = self.timeout;

        tokio::spawn(async move {
            for attempt in 0..max_attempts {
                match http
                    .post(&url)
                    .timeout(timeout)
                    .json(&event)
                    .send()
                    .await
                {
                    Ok(response) if response.status().is_success() => {
                        debug!(
                            workflow_id = %event.workflow_id,
                            to = %event.to,
                            "Delivered webhook event"
                        );
                        return;
                    }
                    Ok(response) => {
                        warn!(
                            status = %response.status(),
                            attempt = attempt + 1,
                            "Webhook endpoint rejected event"
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, attempt = attempt + 1, "Webhook delivery failed");
                    }
                }
                if attempt + 1 < max_attempts {
                    tokio::time::sleep(base_delay * 2u32.pow(attempt)).await;
                }
            }
            warn!(
                workflow_id = %event.workflow_id,
                "Giving up on webhook delivery after {} attempts",
                max_attempts
            );
        });
    }
}
