//! Speech-to-text HTTP client.
//!
//! Talks to the transcription service over HTTP and implements
//! [`TranscriptionAdapter`]. Server-side decoding is the slow part of the
//! pipeline, so the timeout is generous and connection-level failures are
//! retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vchap_models::TranscriptSegment;

use crate::adapters::{ProgressFn, Transcription, TranscriptionAdapter};
use crate::error::{WorkerError, WorkerResult};
use crate::registry::ModelRegistry;

/// Configuration for the transcription client.
#[derive(Debug, Clone)]
pub struct AsrClientConfig {
    /// Base URL of the transcription service
    pub base_url: String,
    /// Model name to request
    pub model: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries on connection-level failures
    pub max_retries: u32,
}

impl Default for AsrClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            model: "whisper-base".to_string(),
            timeout: Duration::from_secs(1800),
            max_retries: 2,
        }
    }
}

impl AsrClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ASR_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            model: std::env::var("ASR_MODEL").unwrap_or_else(|_| "whisper-base".to_string()),
            timeout: Duration::from_secs(
                std::env::var("ASR_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            max_retries: std::env::var("ASR_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    media_path: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_prompt: Option<&'a str>,
    word_timestamps: bool,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    segments: Vec<TranscriptSegment>,
    duration: f64,
    #[serde(default)]
    language: Option<String>,
}

/// HTTP client for the transcription service.
pub struct AsrClient {
    http: Client,
    config: AsrClientConfig,
}

impl AsrClient {
    pub fn new(config: AsrClientConfig) -> WorkerResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(AsrClientConfig::from_env())
    }

    /// Check service health. Never errors; unhealthy is just `false`.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Transcription service health check error: {}", e);
                false
            }
        }
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> WorkerResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = WorkerResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Transcription request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| WorkerError::transient("transcription retries exhausted")))
    }
}

#[async_trait]
impl TranscriptionAdapter for AsrClient {
    async fn transcribe<'a>(
        &self,
        media_path: &str,
        language: Option<&'a str>,
        initial_prompt: Option<&'a str>,
        on_progress: ProgressFn,
    ) -> WorkerResult<Transcription> {
        let url = format!("{}/transcribe", self.config.base_url);
        debug!("Sending transcription request to {}", url);
        on_progress(0.0);

        let request = TranscribeRequest {
            media_path,
            model: &self.config.model,
            language,
            initial_prompt,
            word_timestamps: true,
        };

        let response = self
            .with_retry(|| async {
                self.http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(WorkerError::from)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("transcription service returned {}: {}", status, body);
            return if status.is_server_error() {
                Err(WorkerError::transient(message))
            } else {
                Err(WorkerError::fatal(message))
            };
        }

        let body: TranscribeResponse = response.json().await?;
        if body.segments.is_empty() {
            return Err(WorkerError::fatal("transcription produced no segments"));
        }

        on_progress(100.0);
        Ok(Transcription {
            segments: body.segments,
            duration: body.duration,
            language: body.language,
        })
    }
}

/// Transcription adapter that builds its client lazily.
///
/// The underlying client pins a server-side model instance, so it is
/// created on first use and cached in a [`ModelRegistry`]; `unload`
/// releases it between bursts of work.
pub struct LazyAsr {
    registry: ModelRegistry<AsrClient>,
    config: AsrClientConfig,
}

impl LazyAsr {
    pub fn new(config: AsrClientConfig) -> Self {
        Self {
            registry: ModelRegistry::new(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(AsrClientConfig::from_env())
    }

    pub async fn unload(&self) {
        self.registry.unload_all().await;
    }

    async fn client(&self) -> WorkerResult<std::sync::Arc<AsrClient>> {
        let config = self.config.clone();
        self.registry
            .get_or_load(&self.config.model, || async move {
                AsrClient::new(config)
            })
            .await
    }
}

#[async_trait]
impl TranscriptionAdapter for LazyAsr {
    async fn transcribe<'a>(
        &self,
        media_path: &str,
        language: Option<&'a str>,
        initial_prompt: Option<&'a str>,
        on_progress: ProgressFn,
    ) -> WorkerResult<Transcription> {
        self.client()
            .await?
            .transcribe(media_path, language, initial_prompt, on_progress)
            .await
    }
}
