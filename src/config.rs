//! Shared config utilities for loading/saving JSON config files
//! and locating the application data directory.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "LLMCHAT_DATA_DIR";

/// Resolve the directory holding all `*_config.json` files.
///
/// `LLMCHAT_DATA_DIR` wins when set and non-empty, otherwise the platform
/// data directory (`~/.local/share/llmchat` on Linux) is used.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llmchat")
}

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                info!(config = label, path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                warn!(
                    config = label,
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                T::default()
            }
        },
        Err(_) => {
            info!(config = label, path = %path.display(), "no config file, using defaults");
            T::default()
        }
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {}", e))?;
    info!(config = label, path = %path.display(), "saved config");
    Ok(())
}
