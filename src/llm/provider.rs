//! LLM Provider trait: common interface for text-generation backends.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The host could not be reached (after retries).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Common interface for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Single-shot completion of `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Provider identifier (e.g. "ollama").
    fn id(&self) -> &str;
}
