// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Launcher configuration file
// Supervisor connection, account API and storage locations

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::supervisor_client::SupervisorClientConfig;

const APP_DIR: &str = "tunnel-launcher";
const CONFIG_FILE: &str = "launcher.toml";

/// Get the launcher config directory (~/.config/tunnel-launcher)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(config_dir.join(APP_DIR))
}

/// Account API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    /// Base URL of the account API serving provisioned sessions
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Account token; provisioned sessions cannot start without it
    #[serde(default)]
    pub token: String,
}

fn default_api_base_url() -> String {
    "https://cf-v2.uapis.cn".to_string()
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: String::new(),
        }
    }
}

impl AccountConfig {
    /// Account token, if one is configured
    pub fn token(&self) -> Option<&str> {
        let token = self.token.trim();
        (!token.is_empty()).then_some(token)
    }
}

/// Local storage locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Directory holding custom sessions and preferences
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl PathsConfig {
    pub fn custom_sessions_file(&self) -> PathBuf {
        self.data_dir.join("custom_sessions.json")
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

/// Complete launcher configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub supervisor: SupervisorClientConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl LauncherConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, falling back to defaults if absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .context(format!("Failed to read {}", path.display()))?;

        let config: Self =
            toml::from_str(&contents).context(format!("Failed to parse {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(CONFIG_FILE))
    }

    /// Reject configurations that would send the IPC token in clear text
    /// over the network
    pub fn validate(&self) -> Result<()> {
        crate::supervisor_client::validate_client_config(&self.supervisor)?;
        if !self.account.api_base_url.starts_with("https://") {
            anyhow::bail!(
                "Account API URL must use https: {}",
                self.account.api_base_url
            );
        }
        Ok(())
    }
}
