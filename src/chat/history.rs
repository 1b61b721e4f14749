//! Conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub from_bot: bool,
}

impl ChatMessage {
    pub fn user(author: &str, content: &str) -> Self {
        Self {
            author: author.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            from_bot: false,
        }
    }

    pub fn bot(author: &str, content: &str) -> Self {
        Self {
            from_bot: true,
            ..Self::user(author, content)
        }
    }
}

pub trait ChatHistory: Send + Sync {
    /// The last `n` messages, oldest first.
    fn recent_messages(&self, n: usize) -> Vec<ChatMessage>;

    fn push(&self, message: ChatMessage);
}

/// Bounded in-memory history. The oldest message is evicted first.
pub struct InMemoryHistory {
    capacity: usize,
    messages: Mutex<VecDeque<ChatMessage>>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChatHistory for InMemoryHistory {
    fn recent_messages(&self, n: usize) -> Vec<ChatMessage> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let skip = messages.len().saturating_sub(n);
        messages.iter().skip(skip).cloned().collect()
    }

    fn push(&self, message: ChatMessage) {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        if messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
    }
}
