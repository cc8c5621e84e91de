//! Client configuration
//!
//! Read from `$BLUFI_HOME/config.json` (default `~/.blufi/config.json`) or an
//! explicit path. Every field is optional in the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use blufi_proto::SessionOptions;
use blufi_proto::security::IvMode;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Cipher keystream selection, see [`IvMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Keystream {
    #[default]
    Session,
    PerFrame,
}

impl From<Keystream> for IvMode {
    fn from(keystream: Keystream) -> Self {
        match keystream {
            Keystream::Session => IvMode::Session,
            Keystream::PerFrame => IvMode::PerFrame,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub negotiation_timeout_ms: u64,
    /// Pause between the frames of a multi-step command
    pub step_delay_ms: u64,
    pub response_timeout_ms: u64,
    pub scan_secs: u64,
    /// Advertising name prefix of provisionable devices
    pub name_prefix: String,
    pub keystream: Keystream,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: 5000,
            step_delay_ms: 100,
            response_timeout_ms: 10_000,
            scan_secs: 5,
            name_prefix: "BLUFI".to_string(),
            keystream: Keystream::Session,
        }
    }
}

/// `BLUFI_HOME`, falling back to `~/.blufi`
pub fn blufi_home() -> Option<PathBuf> {
    std::env::var("BLUFI_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| dirs::home_dir().map(|home| home.join(".blufi")))
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Load `path` if given, else the default config file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match blufi_home().map(|home| home.join("config.json")) {
            Some(path) if path.exists() => {
                log::debug!("loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            iv_mode: self.keystream.into(),
            negotiation_timeout: self.negotiation_timeout(),
        }
    }
}
