pub mod llm_config;
pub mod ollama;
pub mod provider;

pub use llm_config::LlmConfig;
pub use ollama::OllamaProvider;
pub use provider::{LlmError, LlmProvider};
