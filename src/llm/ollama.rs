//! Ollama provider: single-shot completion via `/api/generate`.
//!
//! ```json
//! {"model":"llama3","response":"Hi there","done":true}
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error};

use crate::llm::llm_config::LlmConfig;
use crate::llm::provider::{LlmError, LlmProvider};
use crate::utils::http::{request_with_retry, RetryPolicy};

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    options: GenerateOptions,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LlmError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            options: GenerateOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: self.options.clone(),
        };

        let started = Instant::now();
        let response = request_with_retry(|| self.client.post(&url).json(&body).send(), self.retry)
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "Error communicating with Ollama");
                LlmError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Ollama API error");
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        debug!(
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation finished"
        );

        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(parsed.response)
    }

    fn id(&self) -> &str {
        "ollama"
    }
}
