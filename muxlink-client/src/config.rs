//! Persisted local preferences
//!
//! Read once at startup, written back on change; beyond the server URL and
//! scrollback mode they feed into the core, preferences are opaque here and
//! belong to the rendering layer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use muxlink_utils::{config_file, ensure_dir, MuxlinkError, Result};

use crate::reconciler::ScrollbackMode;

/// Display theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// Server connection preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerPrefs {
    /// Full WebSocket endpoint, e.g. `ws://host:8080/ws`
    pub url: Option<String>,
    /// Auth token passed in the connect handshake
    pub token: Option<String>,
}

/// Display preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayPrefs {
    pub theme: Theme,
    /// Line cap for rendered output; absent means full scrollback
    pub scrollback_lines: Option<u32>,
}

/// Persisted preferences (`~/.config/muxlink/config.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub server: ServerPrefs,
    pub display: DisplayPrefs,
}

impl Preferences {
    /// Load from the default config file
    ///
    /// A missing or unparseable file falls back to defaults; preferences are
    /// never a startup failure.
    pub fn load() -> Self {
        Self::load_from(&config_file())
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("config file not found, using default preferences");
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(prefs) => prefs,
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Persist to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MuxlinkError::config(format!("Failed to serialize preferences: {e}")))?;
        std::fs::write(path, content).map_err(|e| MuxlinkError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The scrollback mode these preferences describe
    pub fn scrollback(&self) -> ScrollbackMode {
        ScrollbackMode::from_lines(self.display.scrollback_lines)
    }
}
