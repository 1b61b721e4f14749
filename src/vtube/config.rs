//! VTube Studio link configuration and credential persistence.
//!
//! The whole config is stored in `vtube_config.json`. The authentication
//! token issued by VTube Studio lives in the same file so that a restart can
//! skip the approval popup; it is written through a [`CredentialStore`].

use super::error::AvatarLinkError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

pub const CONFIG_FILE: &str = "vtube_config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VTubeStudioConfig {
    /// Whether the avatar link is started at all.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shown to the user in VTube Studio's approval popup.
    #[serde(default = "default_plugin_name")]
    pub plugin_name: String,
    #[serde(default = "default_plugin_developer")]
    pub plugin_developer: String,

    /// Run the background idle-emote cycle once authenticated.
    #[serde(default = "default_true")]
    pub idle_enabled: bool,
    /// Hotkey IDs picked at random by the idle cycle.
    #[serde(default)]
    pub idle_emotes: Vec<String>,
    /// Seconds between idle ticks.
    #[serde(default = "default_idle_delay")]
    pub idle_emote_delay_secs: u64,
    /// When set and larger than `idle_emote_delay_secs`, each idle sleep is
    /// drawn uniformly from `[idle_emote_delay_secs, idle_emote_delay_max_secs]`.
    #[serde(default)]
    pub idle_emote_delay_max_secs: Option<u64>,

    #[serde(default)]
    pub idle_hotkey: Option<String>,
    #[serde(default)]
    pub thinking_hotkey: Option<String>,
    #[serde(default)]
    pub speaking_hotkey: Option<String>,

    /// Emotion label -> hotkey ID. Labels are matched case-insensitively.
    #[serde(default)]
    pub emotion_map: HashMap<String, String>,

    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    /// Wait between approval checks while the user decides in VTube Studio.
    #[serde(default = "default_auth_poll_interval")]
    pub auth_poll_interval_secs: u64,

    /// Token issued by VTube Studio. Managed by the client, not the user.
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_plugin_name() -> String {
    "LLMChat".to_string()
}

fn default_plugin_developer() -> String {
    "llmchat".to_string()
}

fn default_idle_delay() -> u64 {
    10
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_auth_poll_interval() -> u64 {
    10
}

impl Default for VTubeStudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            plugin_name: default_plugin_name(),
            plugin_developer: default_plugin_developer(),
            idle_enabled: true,
            idle_emotes: Vec::new(),
            idle_emote_delay_secs: default_idle_delay(),
            idle_emote_delay_max_secs: None,
            idle_hotkey: None,
            thinking_hotkey: None,
            speaking_hotkey: None,
            emotion_map: HashMap::new(),
            reconnect_interval_secs: default_reconnect_interval(),
            auth_poll_interval_secs: default_auth_poll_interval(),
            auth_token: None,
        }
    }
}

impl VTubeStudioConfig {
    pub fn endpoint_uri(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn auth_poll_interval(&self) -> Duration {
        Duration::from_secs(self.auth_poll_interval_secs)
    }

    /// Check the config before any loop is entered. A disabled link is
    /// always valid.
    pub fn validate(&self) -> Result<(), AvatarLinkError> {
        if !self.enabled {
            return Ok(());
        }

        if self.host.trim().is_empty() {
            return Err(AvatarLinkError::Configuration(
                "VTube Studio host is empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(AvatarLinkError::Configuration(
                "VTube Studio port cannot be 0".to_string(),
            ));
        }
        let uri = self.endpoint_uri();
        let parsed = uri.parse::<Uri>().map_err(|e| {
            AvatarLinkError::Configuration(format!("Invalid endpoint {}: {}", uri, e))
        })?;
        if parsed.host().is_none() {
            return Err(AvatarLinkError::Configuration(format!(
                "Invalid endpoint {}: missing host",
                uri
            )));
        }

        if self.plugin_name.len() < 3 || self.plugin_name.len() > 32 {
            return Err(AvatarLinkError::Configuration(
                "Plugin name must be 3-32 characters".to_string(),
            ));
        }
        if self.plugin_developer.len() < 3 || self.plugin_developer.len() > 32 {
            return Err(AvatarLinkError::Configuration(
                "Plugin developer must be 3-32 characters".to_string(),
            ));
        }

        if self.reconnect_interval_secs == 0 {
            return Err(AvatarLinkError::Configuration(
                "Reconnect interval must be at least 1 second".to_string(),
            ));
        }

        if self.idle_enabled {
            if self.idle_emotes.iter().all(|e| e.trim().is_empty()) {
                return Err(AvatarLinkError::Configuration(
                    "Idle emotes are enabled but no idle emotes are configured".to_string(),
                ));
            }
            if self.idle_emote_delay_secs == 0 {
                return Err(AvatarLinkError::Configuration(
                    "Idle emote delay must be at least 1 second".to_string(),
                ));
            }
            if let Some(max) = self.idle_emote_delay_max_secs {
                if max < self.idle_emote_delay_secs {
                    return Err(AvatarLinkError::Configuration(format!(
                        "Idle emote delay max ({}s) is below the minimum ({}s)",
                        max, self.idle_emote_delay_secs
                    )));
                }
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> VTubeStudioConfig {
    crate::config::load_json_config(path, "VTS")
}

pub fn save_config(path: &Path, config: &VTubeStudioConfig) -> Result<(), String> {
    crate::config::save_json_config(path, config, "VTS")
}

// ── Credential Store ────────────────────────────────────

/// Persistence for the VTube Studio authentication token.
///
/// Calls are synchronous and short; implementations must not be held
/// across an await point.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, token: &str) -> Result<(), AvatarLinkError>;
    fn clear(&self) -> Result<(), AvatarLinkError>;
}

/// Stores the token in the `auth_token` field of `vtube_config.json`,
/// leaving every other field untouched.
pub struct JsonCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn update(&self, token: Option<String>) -> Result<(), AvatarLinkError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AvatarLinkError::Credential("credential lock poisoned".to_string()))?;
        let mut config = self.read_strict()?;
        config.auth_token = token;
        save_config(&self.path, &config).map_err(AvatarLinkError::Credential)
    }
}

impl JsonCredentialStore {
    /// Read the config for a rewrite. A missing file yields defaults; an
    /// unreadable or unparseable one is an error so the user's file is kept.
    fn read_strict(&self) -> Result<VTubeStudioConfig, AvatarLinkError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VTubeStudioConfig::default())
            }
            Err(e) => {
                return Err(AvatarLinkError::Credential(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            AvatarLinkError::Credential(format!(
                "refusing to overwrite unparseable {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl CredentialStore for JsonCredentialStore {
    fn load(&self) -> Option<String> {
        load_config(&self.path)
            .auth_token
            .filter(|token| !token.is_empty())
    }

    fn store(&self, token: &str) -> Result<(), AvatarLinkError> {
        self.update(Some(token.to_string()))
    }

    fn clear(&self) -> Result<(), AvatarLinkError> {
        self.update(None)
    }
}

/// In-process store. Used when persistence is not wanted and in tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn store(&self, token: &str) -> Result<(), AvatarLinkError> {
        let mut slot = self
            .token
            .lock()
            .map_err(|_| AvatarLinkError::Credential("credential lock poisoned".to_string()))?;
        *slot = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), AvatarLinkError> {
        let mut slot = self
            .token
            .lock()
            .map_err(|_| AvatarLinkError::Credential("credential lock poisoned".to_string()))?;
        *slot = None;
        Ok(())
    }
}
