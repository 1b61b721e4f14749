//! LLM configuration: persisted to `llm_config.json`.

use crate::config;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "llm_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama server root, without the `/api` suffix.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Sent as Ollama's `num_predict`.
    pub max_tokens: u32,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            temperature: 0.7,
            max_tokens: 100,
            max_retries: 3,
            request_timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("base_url must not be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> LlmConfig {
    config::load_json_config(path, "LLM")
}

pub fn save_config(path: &Path, config: &LlmConfig) -> Result<(), String> {
    config::save_json_config(path, config, "LLM")
}
