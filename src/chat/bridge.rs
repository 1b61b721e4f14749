//! Chat bridge: one inbound message in, one reply out, with the avatar
//! reacting along the way.

use super::config::ChatConfig;
use super::history::{ChatHistory, ChatMessage};
use crate::llm::LlmProvider;
use crate::vtube::{AvatarLinkClient, AvatarLinkError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reply sent when the language model cannot be reached.
pub const LLM_FAILURE_REPLY: &str = "Error communicating with the AI.";

const EMOTION_TAG: &str = "[EMOTION:";

/// The avatar operations the bridge drives.
#[async_trait]
pub trait AvatarHooks: Send + Sync {
    fn set_current_emotion(&self, label: &str);
    async fn play_thinking(&self) -> Result<(), AvatarLinkError>;
    async fn play_speaking(&self) -> Result<(), AvatarLinkError>;
    async fn play_emotion(&self, label: &str) -> Result<(), AvatarLinkError>;
}

#[async_trait]
impl AvatarHooks for AvatarLinkClient {
    fn set_current_emotion(&self, label: &str) {
        AvatarLinkClient::set_current_emotion(self, label)
    }

    async fn play_thinking(&self) -> Result<(), AvatarLinkError> {
        AvatarLinkClient::play_thinking(self).await
    }

    async fn play_speaking(&self) -> Result<(), AvatarLinkError> {
        AvatarLinkClient::play_speaking(self).await
    }

    async fn play_emotion(&self, label: &str) -> Result<(), AvatarLinkError> {
        AvatarLinkClient::play_emotion(self, label).await
    }
}

/// Split a trailing `[EMOTION:label]` tag off a model reply.
///
/// Returns the reply with every emotion tag removed, plus the label of the
/// last tag if it is non-empty.
pub fn extract_emotion(text: &str) -> (String, Option<String>) {
    let trimmed = text.trim_end();
    let label = trimmed.rfind(EMOTION_TAG).and_then(|start| {
        let tag = &trimmed[start + EMOTION_TAG.len()..];
        tag.find(']')
            .map(|end| tag[..end].trim().to_string())
            .filter(|label| !label.is_empty())
    });
    (strip_emotion_tags(trimmed), label)
}

fn strip_emotion_tags(text: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(EMOTION_TAG) {
        match result[start..].find(']') {
            Some(end) => {
                let tag_end = start + end + 1;
                result = format!("{} {}", result[..start].trim_end(), result[tag_end..].trim_start());
            }
            None => break,
        }
    }
    result.trim().to_string()
}

pub struct ChatBridge {
    config: ChatConfig,
    history: Arc<dyn ChatHistory>,
    llm: Arc<dyn LlmProvider>,
    avatar: Option<Arc<dyn AvatarHooks>>,
}

impl ChatBridge {
    pub fn new(
        config: ChatConfig,
        history: Arc<dyn ChatHistory>,
        llm: Arc<dyn LlmProvider>,
        avatar: Option<Arc<dyn AvatarHooks>>,
    ) -> Self {
        Self {
            config,
            history,
            llm,
            avatar,
        }
    }

    pub fn bot_name(&self) -> &str {
        &self.config.bot_name
    }

    /// `author: text` lines for the recent history, ending with `bot_name:`.
    pub fn transcript(&self) -> String {
        let mut prompt = String::new();
        for message in self.history.recent_messages(self.config.context_messages_count) {
            prompt.push_str(&message.author);
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push_str(&self.config.bot_name);
        prompt.push(':');
        prompt
    }

    /// Handle one inbound message and return the reply to post.
    pub async fn handle_message(&self, author: &str, content: &str) -> String {
        self.history.push(ChatMessage::user(author, content));
        if let Some(avatar) = &self.avatar {
            log_avatar("thinking", avatar.play_thinking().await);
        }

        let raw = match self.llm.generate(&self.transcript()).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(provider = self.llm.id(), error = %e, "Failed to generate reply");
                return LLM_FAILURE_REPLY.to_string();
            }
        };

        let (reply, emotion) = extract_emotion(&raw);
        if let Some(avatar) = &self.avatar {
            if let Some(label) = &emotion {
                avatar.set_current_emotion(label);
                log_avatar("emotion", avatar.play_emotion(label).await);
            }
            log_avatar("speaking", avatar.play_speaking().await);
        }

        info!(author, emotion = emotion.as_deref().unwrap_or("-"), "Replied");
        self.history.push(ChatMessage::bot(&self.config.bot_name, &reply));
        reply
    }
}

fn log_avatar(hook: &str, result: Result<(), AvatarLinkError>) {
    match result {
        Ok(()) => {}
        Err(e @ (AvatarLinkError::NotConnected | AvatarLinkError::NotAuthenticated)) => {
            debug!(hook, error = %e, "Avatar not ready");
        }
        Err(e) => warn!(hook, error = %e, "Avatar hook failed"),
    }
}
