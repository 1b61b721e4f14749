//! Trigger dispatcher: turns "play thinking / speaking / emotion" requests
//! into `HotkeyTriggerRequest`s on the authenticated session.
//!
//! Animation is best-effort. Transport failures are logged and swallowed;
//! only `NotConnected` / `NotAuthenticated` reach the caller.

use super::config::VTubeStudioConfig;
use super::error::AvatarLinkError;
use super::protocol;
use super::session::{ConnectionState, Link};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Emotion label -> hotkey ID, keyed by lowercased label.
#[derive(Debug, Clone, Default)]
pub struct EmotionMapping {
    map: HashMap<String, String>,
}

impl EmotionMapping {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            map: entries
                .into_iter()
                .map(|(k, v)| (k.as_ref().trim().to_lowercase(), v.into()))
                .collect(),
        }
    }

    pub fn resolve(&self, label: &str) -> Option<&str> {
        self.map.get(&label.trim().to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The most recently requested reactive emotion, consumed by the next idle
/// tick.
#[derive(Debug, Clone, Default)]
pub struct PendingEmotion {
    slot: Arc<Mutex<Option<String>>>,
}

impl PendingEmotion {
    pub fn set(&self, label: &str) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(label.to_string());
    }

    pub fn take(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn peek(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Fixed hotkeys for the non-emotion slots.
#[derive(Debug, Clone, Default)]
pub struct TriggerSlots {
    pub idle: Option<String>,
    pub thinking: Option<String>,
    pub speaking: Option<String>,
}

pub struct TriggerDispatcher {
    link: Arc<Link>,
    emotions: EmotionMapping,
    slots: TriggerSlots,
    pending: PendingEmotion,
}

impl TriggerDispatcher {
    pub fn new(link: Arc<Link>, emotions: EmotionMapping, slots: TriggerSlots) -> Self {
        Self {
            link,
            emotions,
            slots,
            pending: PendingEmotion::default(),
        }
    }

    pub fn from_config(link: Arc<Link>, config: &VTubeStudioConfig) -> Self {
        let non_empty = |slot: &Option<String>| slot.clone().filter(|s| !s.trim().is_empty());
        Self::new(
            link,
            EmotionMapping::new(config.emotion_map.iter()),
            TriggerSlots {
                idle: non_empty(&config.idle_hotkey),
                thinking: non_empty(&config.thinking_hotkey),
                speaking: non_empty(&config.speaking_hotkey),
            },
        )
    }

    pub fn emotions(&self) -> &EmotionMapping {
        &self.emotions
    }

    pub fn pending(&self) -> &PendingEmotion {
        &self.pending
    }

    /// Remember `label` for the next idle tick.
    pub fn set_current_emotion(&self, label: &str) {
        info!(emotion = label, "Emotion set");
        self.pending.set(label);
    }

    pub async fn play_idle(&self) -> Result<(), AvatarLinkError> {
        self.play_slot("idle", self.slots.idle.as_deref()).await
    }

    pub async fn play_thinking(&self) -> Result<(), AvatarLinkError> {
        self.play_slot("thinking", self.slots.thinking.as_deref()).await
    }

    pub async fn play_speaking(&self) -> Result<(), AvatarLinkError> {
        self.play_slot("speaking", self.slots.speaking.as_deref()).await
    }

    pub async fn play_emotion(&self, label: &str) -> Result<(), AvatarLinkError> {
        self.ensure_ready()?;
        match self.emotions.resolve(label) {
            Some(hotkey) => self.send_trigger(hotkey).await,
            None => {
                warn!(emotion = label, "Emotion not mapped to a hotkey, ignoring");
                Ok(())
            }
        }
    }

    async fn play_slot(&self, slot: &str, hotkey: Option<&str>) -> Result<(), AvatarLinkError> {
        self.ensure_ready()?;
        match hotkey {
            Some(hotkey) => self.send_trigger(hotkey).await,
            None => {
                debug!(slot, "No hotkey configured for slot");
                Ok(())
            }
        }
    }

    fn ensure_ready(&self) -> Result<(), AvatarLinkError> {
        if self.link.state() != ConnectionState::Open {
            debug!("Trigger skipped: VTube Studio not connected");
            return Err(AvatarLinkError::NotConnected);
        }
        if !self.link.is_authenticated() {
            debug!("Trigger skipped: VTube Studio not authenticated");
            return Err(AvatarLinkError::NotAuthenticated);
        }
        Ok(())
    }

    /// Send one hotkey trigger. Transport failures are logged, not returned.
    pub async fn send_trigger(&self, hotkey_id: &str) -> Result<(), AvatarLinkError> {
        self.ensure_ready()?;
        match self.link.send(protocol::hotkey_trigger(hotkey_id)).await {
            Ok(()) => {
                info!(hotkey = hotkey_id, "Triggered hotkey");
            }
            Err(e) => {
                warn!(hotkey = hotkey_id, error = %e, "Failed to trigger hotkey");
            }
        }
        Ok(())
    }
}
