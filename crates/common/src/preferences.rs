// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Persisted user preferences
//!
//! A small synchronous key-value store. Values are strings, usually JSON.
//! Readers never fail: missing or malformed values fall back to defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::launch::{LaunchPreferences, ProxyGateway};
use crate::types::{SessionKey, SessionKind};

pub const KEY_AUTO_START: &str = "auto_start_sessions";
pub const KEY_SOUND_ENABLED: &str = "sound_enabled";
pub const KEY_PROXY_GATEWAY: &str = "proxy_gateway";
pub const KEY_FORCE_TLS: &str = "force_tls";
pub const KEY_KCP_OPTIMIZATION: &str = "kcp_optimization";
pub const KEY_PROCESS_GUARD: &str = "process_guard_enabled";

/// Raw key-value persistence
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store, used in tests and when no data dir is available
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
        Ok(())
    }
}

/// JSON file store; the whole map is rewritten on every change
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferenceStore {
    /// Open the store, treating an unreadable file as empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Ignoring malformed preferences file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => {
                debug!("No preferences file at {}", path.display());
                BTreeMap::new()
            }
        };

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(values)?)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| crate::Error::Config(format!("preferences lock poisoned: {}", e)))?;
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| crate::Error::Config(format!("preferences lock poisoned: {}", e)))?;
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

/// Entry of the persisted auto-start list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoStartEntry {
    pub kind: SessionKind,
    pub id: u64,
}

impl AutoStartEntry {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.kind, self.id)
    }
}

impl From<SessionKey> for AutoStartEntry {
    fn from(key: SessionKey) -> Self {
        Self {
            kind: key.kind,
            id: key.id,
        }
    }
}

/// Typed view over a [`PreferenceStore`]
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Preferences held in memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferenceStore::new()))
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring malformed preference '{}': {}", key, e);
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.store.set(key, serde_json::to_string(value)?)
    }

    fn read_flag(&self, key: &str, default: bool) -> bool {
        self.read_json(key).unwrap_or(default)
    }

    /// Ordered list of sessions flagged for auto-start
    pub fn auto_start_list(&self) -> Vec<AutoStartEntry> {
        self.read_json(KEY_AUTO_START).unwrap_or_default()
    }

    pub fn set_auto_start_list(&self, entries: &[AutoStartEntry]) -> Result<()> {
        self.write_json(KEY_AUTO_START, &entries)
    }

    /// Add or remove one session from the auto-start list
    ///
    /// New entries go to the end; an entry already listed keeps its place.
    pub fn set_auto_start(&self, key: SessionKey, enabled: bool) -> Result<()> {
        let mut entries = self.auto_start_list();
        let listed = entries.iter().any(|e| e.key() == key);
        match (enabled, listed) {
            (true, false) => entries.push(key.into()),
            (false, true) => entries.retain(|e| e.key() != key),
            _ => return Ok(()),
        }
        self.set_auto_start_list(&entries)
    }

    pub fn sound_enabled(&self) -> bool {
        self.read_flag(KEY_SOUND_ENABLED, true)
    }

    pub fn set_sound_enabled(&self, enabled: bool) -> Result<()> {
        self.write_json(KEY_SOUND_ENABLED, &enabled)
    }

    pub fn process_guard_enabled(&self) -> bool {
        self.read_flag(KEY_PROCESS_GUARD, false)
    }

    pub fn set_process_guard_enabled(&self, enabled: bool) -> Result<()> {
        self.write_json(KEY_PROCESS_GUARD, &enabled)
    }

    pub fn proxy_gateway(&self) -> ProxyGateway {
        self.read_json(KEY_PROXY_GATEWAY).unwrap_or_default()
    }

    pub fn set_proxy_gateway(&self, gateway: &ProxyGateway) -> Result<()> {
        self.write_json(KEY_PROXY_GATEWAY, gateway)
    }

    /// Everything a launch request needs from preferences
    pub fn launch_preferences(&self) -> LaunchPreferences {
        LaunchPreferences {
            proxy_gateway: self.proxy_gateway(),
            force_tls: self.read_flag(KEY_FORCE_TLS, false),
            kcp_optimization: self.read_flag(KEY_KCP_OPTIMIZATION, false),
        }
    }

    pub fn set_force_tls(&self, enabled: bool) -> Result<()> {
        self.write_json(KEY_FORCE_TLS, &enabled)
    }

    pub fn set_kcp_optimization(&self, enabled: bool) -> Result<()> {
        self.write_json(KEY_KCP_OPTIMIZATION, &enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let prefs = Preferences::in_memory();
        assert!(prefs.sound_enabled());
        assert!(!prefs.process_guard_enabled());
        assert!(prefs.auto_start_list().is_empty());
        assert_eq!(prefs.launch_preferences(), LaunchPreferences::default());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store
            .set(KEY_PROXY_GATEWAY, "{not json".to_string())
            .unwrap();
        store.set(KEY_SOUND_ENABLED, "\"loud\"".to_string()).unwrap();
        store.set(KEY_AUTO_START, "42".to_string()).unwrap();

        let prefs = Preferences::new(store);
        assert_eq!(prefs.proxy_gateway(), ProxyGateway::default());
        assert!(prefs.sound_enabled());
        assert!(prefs.auto_start_list().is_empty());
    }

    #[test]
    fn test_partial_proxy_gateway() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store
            .set(
                KEY_PROXY_GATEWAY,
                r#"{"enabled": true, "host": "10.0.0.2", "port": 3128}"#.to_string(),
            )
            .unwrap();

        let gateway = Preferences::new(store).proxy_gateway();
        assert_eq!(gateway.scheme, "http");
        assert_eq!(gateway.url().as_deref(), Some("http://10.0.0.2:3128"));
    }

    #[test]
    fn test_auto_start_order_preserved() {
        let prefs = Preferences::in_memory();
        prefs.set_auto_start(SessionKey::custom(2), true).unwrap();
        prefs.set_auto_start(SessionKey::provisioned(7), true).unwrap();
        prefs.set_auto_start(SessionKey::custom(2), true).unwrap();

        // Re-enabling a listed entry keeps its place
        let keys: Vec<_> = prefs.auto_start_list().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![SessionKey::custom(2), SessionKey::provisioned(7)]);

        prefs.set_auto_start(SessionKey::provisioned(7), false).unwrap();
        assert_eq!(prefs.auto_start_list().len(), 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("preferences.json");

        let store = FilePreferenceStore::open(&path);
        store.set(KEY_SOUND_ENABLED, "false".to_string()).unwrap();
        assert!(path.exists());

        let reopened = Preferences::new(Arc::new(FilePreferenceStore::open(&path)));
        assert!(!reopened.sound_enabled());
    }

    #[test]
    fn test_file_store_ignores_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.json");
        fs::write(&path, "garbage").unwrap();

        let store = FilePreferenceStore::open(&path);
        assert!(store.get(KEY_SOUND_ENABLED).is_none());
    }
}
