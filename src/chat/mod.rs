pub mod bridge;
pub mod config;
pub mod console;
pub mod history;

pub use bridge::{AvatarHooks, ChatBridge};
pub use config::ChatConfig;
pub use history::{ChatHistory, ChatMessage, InMemoryHistory};
