//! Chat configuration: persisted to `chat_config.json`.

use crate::config;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "chat_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Name the bot answers as; also the final `name:` line of the prompt.
    pub bot_name: String,
    /// Author name used for console input.
    pub user_name: String,
    /// How many recent messages go into the prompt.
    pub context_messages_count: usize,
    /// Messages kept in memory.
    pub history_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bot_name: "LLMChat".to_string(),
            user_name: "user".to_string(),
            context_messages_count: 20,
            history_capacity: 200,
        }
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.bot_name.trim().is_empty() {
            return Err("bot_name must not be empty".to_string());
        }
        if self.user_name.trim().is_empty() {
            return Err("user_name must not be empty".to_string());
        }
        if self.context_messages_count == 0 {
            return Err("context_messages_count must be greater than zero".to_string());
        }
        if self.history_capacity < self.context_messages_count {
            return Err(format!(
                "history_capacity ({}) must be at least context_messages_count ({})",
                self.history_capacity, self.context_messages_count
            ));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> ChatConfig {
    config::load_json_config(path, "Chat")
}

pub fn save_config(path: &Path, config: &ChatConfig) -> Result<(), String> {
    config::save_json_config(path, config, "Chat")
}
