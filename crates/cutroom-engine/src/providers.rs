//! HTTP-backed step executors.
//!
//! Each step posts the workflow context to a provider service endpoint
//! and expects a JSON object back, which becomes the payload patch.
//! Timeouts and 5xx responses are retryable; 4xx means the input itself
//! is bad and will fail again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use cutroom_models::{Payload, StepKind, Workflow};

use crate::executor::{StepExecutor, StepFailure, StepOutput};
use crate::registry::ExecutorRegistry;

/// Provider service configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider service.
    pub base_url: String,
    /// Per-request timeout. Steps are long-running (transcription,
    /// rendering); keep this under the queue visibility timeout.
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8600".to_string(),
            timeout: Duration::from_secs(540),
        }
    }
}

impl ProviderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8600".to_string()),
            timeout: Duration::from_secs(
                std::env::var("PROVIDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(540),
            ),
        }
    }
}

/// Executor that delegates a step to a provider HTTP endpoint.
pub struct HttpStepExecutor {
    step: StepKind,
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpStepExecutor {
    pub fn new(step: StepKind, config: &ProviderConfig) -> Self {
        Self {
            step,
            url: format!("{}/steps/{}", config.base_url.trim_end_matches('/'), step),
            timeout: config.timeout,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StepExecutor for HttpStepExecutor {
    async fn execute(&self, workflow: &Workflow) -> Result<StepOutput, StepFailure> {
        let body = serde_json::json!({
            "workflow_id": workflow.id,
            "video_ref": workflow.video_ref,
            "payload": workflow.payload,
        });

        debug!(workflow_id = %workflow.id, step = %self.step, url = %self.url, "Calling provider");

        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StepFailure::retryable(format!("provider timed out on {}: {e}", self.step))
                } else {
                    StepFailure::retryable(format!("provider unreachable for {}: {e}", self.step))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let patch: Payload = response.json().await.map_err(|e| {
                StepFailure::fatal(format!("malformed provider response for {}: {e}", self.step))
            })?;
            return Ok(StepOutput::patch(patch));
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(StepFailure::fatal(format!(
                "provider rejected {}: {status} {text}",
                self.step
            )))
        } else {
            Err(StepFailure::retryable(format!(
                "provider error on {}: {status} {text}",
                self.step
            )))
        }
    }
}

/// Registry with an HTTP executor for every step, pipeline and analysis.
pub fn http_registry(config: &ProviderConfig) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    for &step in StepKind::pipeline() {
        registry.register(step, Arc::new(HttpStepExecutor::new(step, config)));
    }
    for step in [
        StepKind::RedundancyQuality,
        StepKind::NarrativeStructure,
        StepKind::VisualNeeds,
        StepKind::GraphSync,
    ] {
        registry.register(step, Arc::new(HttpStepExecutor::new(step, config)));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ProviderConfig {
        ProviderConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_success_becomes_payload_patch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/steps/transcribe"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"transcript": "hello world"})),
            )
            .mount(&server)
            .await;

        let executor = HttpStepExecutor::new(StepKind::Transcribe, &config(&server));
        let output = executor.execute(&Workflow::new("ref")).await.unwrap();

        assert_eq!(
            output.payload_patch.get("transcript"),
            Some(&json!("hello world"))
        );
        assert!(output.new_status.is_none());
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unsupported codec"))
            .mount(&server)
            .await;

        let executor = HttpStepExecutor::new(StepKind::Process, &config(&server));
        let failure = executor.execute(&Workflow::new("ref")).await.unwrap_err();

        assert!(!failure.retryable);
        assert!(failure.message.contains("unsupported codec"));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let executor = HttpStepExecutor::new(StepKind::Render, &config(&server));
        let failure = executor.execute(&Workflow::new("ref")).await.unwrap_err();
        assert!(failure.retryable);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let executor = HttpStepExecutor::new(
            StepKind::Analyze,
            &ProviderConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                timeout: Duration::from_secs(1),
            },
        );
        let failure = executor.execute(&Workflow::new("ref")).await.unwrap_err();
        assert!(failure.retryable);
    }

    #[test]
    fn test_registry_covers_all_steps() {
        let registry = http_registry(&ProviderConfig::default());
        for &step in StepKind::pipeline() {
            assert!(registry.contains(step));
        }
        assert!(registry.contains(StepKind::GraphSync));
    }
}
