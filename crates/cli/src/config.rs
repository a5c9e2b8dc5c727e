// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Tunnel Launcher - CLI context
// Loads the launcher configuration and builds the services commands use

use std::sync::Arc;

use anyhow::{Context, Result};
use tunnel_launcher_common::{
    ApiSessionSource, CustomSessionStore, FilePreferenceStore, HttpSupervisor, LauncherConfig,
    Preferences,
};
use tunnel_launcher_core::{LauncherCore, Notifier};

/// Everything a command needs, built from `launcher.toml`
pub struct CliContext {
    pub config: LauncherConfig,
    pub preferences: Preferences,
    pub custom: Arc<CustomSessionStore>,
    pub supervisor: Arc<HttpSupervisor>,
}

impl CliContext {
    pub fn load() -> Result<Self> {
        let config = LauncherConfig::load()?;
        Self::from_config(config)
    }

    pub fn from_config(config: LauncherConfig) -> Result<Self> {
        config.validate()?;

        let preferences = Preferences::new(Arc::new(FilePreferenceStore::open(
            config.paths.preferences_file(),
        )));
        let custom = Arc::new(CustomSessionStore::new(config.paths.custom_sessions_file()));
        let supervisor = Arc::new(
            HttpSupervisor::new(config.supervisor.clone())
                .context("Failed to create supervisor client")?,
        );

        Ok(Self {
            config,
            preferences,
            custom,
            supervisor,
        })
    }

    pub fn auth_token(&self) -> Option<String> {
        self.config.account.token().map(str::to_string)
    }

    /// Build the launcher core on top of this context
    pub fn core(&self, notifier: Arc<dyn Notifier>) -> Result<Arc<LauncherCore>> {
        let provisioned = ApiSessionSource::new(&self.config.account.api_base_url, self.auth_token())?;

        Ok(LauncherCore::new(
            self.supervisor.clone(),
            Arc::new(provisioned),
            self.custom.clone(),
            self.preferences.clone(),
            notifier,
            self.auth_token(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tunnel_launcher_common::SessionKey;

    fn config_in(dir: &TempDir) -> LauncherConfig {
        let mut config = LauncherConfig::default();
        config.paths.data_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_context_uses_data_dir() {
        let dir = TempDir::new().unwrap();
        let context = CliContext::from_config(config_in(&dir)).unwrap();

        context
            .preferences
            .set_auto_start(SessionKey::custom(1), true)
            .unwrap();
        assert!(dir.path().join("preferences.json").exists());
        assert_eq!(context.auth_token(), None);
    }

    #[test]
    fn test_plain_http_to_remote_supervisor_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.supervisor.host = "192.0.2.10".to_string();
        assert!(CliContext::from_config(config).is_err());
    }

    #[tokio::test]
    async fn test_core_builds_without_token() {
        let dir = TempDir::new().unwrap();
        let context = CliContext::from_config(config_in(&dir)).unwrap();
        let core = context
            .core(Arc::new(crate::notify::ConsoleNotifier))
            .unwrap();

        // Provisioned source fails without a token, custom store is empty
        assert!(core.refresh().await.is_empty());
    }
}
