//! Webhook configuration
//!
//! The destination URL and the auto-send flag are the only durable state in
//! the service. They are kept as a small JSON file under the platform config
//! directory and rewritten whenever a client changes either field.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Webhook destination and auto-send preference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    /// Destination URL; empty means not configured
    pub url: String,
    /// Deliver accumulated text automatically after a quiet period
    pub auto_send: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auto_send: false,
        }
    }
}

/// Configuration shared between the server and the auto-send coordinator
pub type SharedConfig = Arc<Mutex<WebhookConfig>>;

/// Default config file location under the platform config directory
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = directories::BaseDirs::new()
        .ok_or_else(|| anyhow!("Could not find config directory"))?
        .config_dir()
        .join("voicehook");
    Ok(config_dir.join("config.json"))
}

impl WebhookConfig {
    /// Load the config from disk; a missing or unreadable file yields defaults
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config file");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Write the config to disk, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Whether a destination URL has been set
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}
