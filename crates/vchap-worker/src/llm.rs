//! Language-model HTTP client.
//!
//! OpenAI-compatible chat completions client implementing
//! [`GenerationAdapter`]. Sampling parameters are fixed: chapter output
//! must stay close to the transcript, so the temperature is low.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::GenerationAdapter;
use crate::error::{WorkerError, WorkerResult};
use crate::registry::ModelRegistry;

const TEMPERATURE: f64 = 0.3;
const TOP_P: f64 = 0.9;
const MAX_TOKENS: u32 = 1024;

/// Configuration for the generation client.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Base URL of the model service
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8003/v1".to_string(),
            model: "llama-3.1-8b-instruct".to_string(),
            api_key: None,
            timeout: Duration::from_secs(300),
        }
    }
}

impl LlmClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("LLM_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8003/v1".to_string()),
            model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| "llama-3.1-8b-instruct".to_string()),
            api_key: std::env::var("LLM_API_KEY").ok(),
            timeout: Duration::from_secs(
                std::env::var("LLM_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// HTTP client for the chapter generation model.
pub struct LlmClient {
    http: Client,
    config: LlmClientConfig,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig) -> WorkerResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(LlmClientConfig::from_env())
    }
}

#[async_trait]
impl GenerationAdapter for LlmClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> WorkerResult<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!("Sending generation request to {}", url);

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: TEMPERATURE,
            top_p: TOP_P,
            max_tokens: MAX_TOKENS,
        };

        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("model service returned {}: {}", status, body);
            warn!("{}", message);
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(WorkerError::transient(message))
            } else {
                Err(WorkerError::fatal(message))
            };
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| WorkerError::fatal("model response contained no choices"))?;

        Ok(content)
    }
}

/// Generation adapter that builds its client lazily.
///
/// Cached per model name in a [`ModelRegistry`]; `unload` releases it.
pub struct LazyLlm {
    registry: ModelRegistry<LlmClient>,
    config: LlmClientConfig,
}

impl LazyLlm {
    pub fn new(config: LlmClientConfig) -> Self {
        Self {
            registry: ModelRegistry::new(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(LlmClientConfig::from_env())
    }

    pub async fn unload(&self) {
        self.registry.unload_all().await;
    }
}

#[async_trait]
impl GenerationAdapter for LazyLlm {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> WorkerResult<String> {
        let config = self.config.clone();
        let client = self
            .registry
            .get_or_load(&self.config.model, || async move {
                LlmClient::new(config)
            })
            .await?;
        client.generate(system_prompt, user_prompt).await
    }
}
