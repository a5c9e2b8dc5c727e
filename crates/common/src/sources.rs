// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Session catalog sources
//!
//! Provisioned sessions come from the account API, custom sessions from a
//! local JSON store. Each source is fetched independently.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{CustomSession, Protocol, ProvisionedSession};

/// A source of sessions of one kind
#[async_trait]
pub trait SessionSource: Send + Sync {
    type Item: Send;

    async fn fetch(&self) -> Result<Vec<Self::Item>>;
}

/// Envelope used by every account API response
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: u16,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

/// Provisioned sessions from the account API
pub struct ApiSessionSource {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiSessionSource {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = validate_api_url(base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("tunnel-launcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build account API client")?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }
}

/// Account API URLs must be https and must not embed credentials
fn validate_api_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).context(format!("Invalid account API URL: {}", raw))?;
    if url.scheme() != "https" {
        anyhow::bail!("Account API URL must use https: {}", raw);
    }
    if !url.username().is_empty() || url.password().is_some() {
        anyhow::bail!("Account API URL must not contain credentials");
    }
    if url.host_str().is_none() {
        anyhow::bail!("Account API URL has no host: {}", raw);
    }
    Ok(url)
}

#[async_trait]
impl SessionSource for ApiSessionSource {
    type Item = ProvisionedSession;

    async fn fetch(&self) -> Result<Vec<ProvisionedSession>> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Not logged in: no account token configured"))?;

        let url = self
            .base_url
            .join("tunnels")
            .context("Failed to build sessions URL")?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to request provisioned sessions")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Account API returned {}", status);
        }

        let envelope: ApiEnvelope<Vec<ProvisionedSession>> = response
            .json()
            .await
            .context("Failed to parse provisioned sessions")?;

        if envelope.code != 200 {
            anyhow::bail!("Account API error {}: {}", envelope.code, envelope.msg);
        }

        let sessions = envelope.data.unwrap_or_default();
        debug!("Fetched {} provisioned sessions", sessions.len());
        Ok(sessions)
    }
}

/// Custom sessions persisted as a JSON array on disk
pub struct CustomSessionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl CustomSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Vec<CustomSession>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .context(format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&contents).context(format!("Failed to parse {}", self.path.display()))
    }

    fn write_all(&self, sessions: &[CustomSession]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let contents =
            serde_json::to_string_pretty(sessions).context("Failed to serialize custom sessions")?;
        fs::write(&self.path, contents)
            .context(format!("Failed to write {}", self.path.display()))
    }

    /// Store one custom session per proxy section of a client configuration
    ///
    /// Each session is named after its section and keeps the `[common]`
    /// block in front of its own section. Nothing is stored unless every
    /// section is accepted.
    pub async fn add(&self, config: &str) -> Result<Vec<CustomSession>> {
        let split = SplitConfig::parse(config);
        if split.proxies.is_empty() {
            anyhow::bail!("Configuration does not define any proxy section");
        }

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.read_all()?;
        let mut next_id = sessions.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let mut added = Vec::with_capacity(split.proxies.len());

        for (name, block) in &split.proxies {
            validate_session_name(name)?;
            if sessions.iter().chain(&added).any(|s: &CustomSession| &s.name == name) {
                anyhow::bail!("Custom session '{}' already exists", name);
            }

            added.push(custom_session(next_id, name, split.single(block)));
            next_id += 1;
        }

        sessions.extend(added.iter().cloned());
        self.write_all(&sessions)?;
        Ok(added)
    }

    /// Replace the configuration of an existing custom session
    ///
    /// The new configuration must describe exactly one proxy; the session
    /// keeps its id and name.
    pub async fn update(&self, id: u64, config: &str) -> Result<CustomSession> {
        let split = SplitConfig::parse(config);
        let [(_, block)] = split.proxies.as_slice() else {
            anyhow::bail!(
                "Configuration must define exactly one proxy section, found {}",
                split.proxies.len()
            );
        };

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.read_all()?;
        let Some(session) = sessions.iter_mut().find(|s| s.id == id) else {
            anyhow::bail!("No custom session with id {}", id);
        };

        let name = session.name.clone();
        *session = custom_session(id, &name, split.single(block));
        let updated = session.clone();
        self.write_all(&sessions)?;
        Ok(updated)
    }

    /// Remove a custom session; returns whether it existed
    pub async fn remove(&self, id: u64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.read_all()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.write_all(&sessions)?;
        Ok(true)
    }
}

#[async_trait]
impl SessionSource for CustomSessionStore {
    type Item = CustomSession;

    async fn fetch(&self) -> Result<Vec<CustomSession>> {
        self.read_all()
    }
}

fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("Session name cannot be empty");
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        anyhow::bail!(
            "Section name '{}' may only contain letters, digits, '_' and '-'",
            name
        );
    }
    Ok(())
}

fn custom_session(id: u64, name: &str, config: String) -> CustomSession {
    let summary = ConfigSummary::parse(&config);
    CustomSession {
        id,
        name: name.to_string(),
        config,
        server_addr: summary.server_addr,
        protocol: summary.protocol,
        local_port: summary.local_port,
        remote_port: summary.remote_port,
        domain: summary.domain,
    }
}

/// A client configuration cut into its `[common]` block and proxy sections
#[derive(Debug, Default)]
struct SplitConfig {
    common: String,
    proxies: Vec<(String, String)>,
}

impl SplitConfig {
    fn parse(content: &str) -> Self {
        let mut common: Vec<&str> = Vec::new();
        let mut proxies: Vec<(String, Vec<&str>)> = Vec::new();
        let mut in_common = false;

        for raw in content.lines() {
            let line = raw.trim();
            if let Some(name) = section_name(line) {
                in_common = name == "common";
                if in_common {
                    common.push(line);
                } else {
                    proxies.push((name.to_string(), vec![line]));
                }
                continue;
            }

            if in_common {
                common.push(raw);
            } else if let Some((_, lines)) = proxies.last_mut() {
                lines.push(raw);
            }
        }

        Self {
            common: common.join("\n").trim().to_string(),
            proxies: proxies
                .into_iter()
                .map(|(name, lines)| (name, lines.join("\n").trim().to_string()))
                .collect(),
        }
    }

    /// Standalone configuration for one proxy block
    fn single(&self, block: &str) -> String {
        if self.common.is_empty() {
            format!("{}\n", block)
        } else {
            format!("{}\n\n{}\n", self.common, block)
        }
    }
}

fn section_name(line: &str) -> Option<&str> {
    let name = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    (!name.is_empty()).then_some(name)
}

/// Display fields pulled out of an INI-style client configuration
#[derive(Debug, Default, PartialEq)]
struct ConfigSummary {
    server_addr: Option<String>,
    protocol: Option<Protocol>,
    local_port: Option<u16>,
    remote_port: Option<u16>,
    domain: Option<String>,
    proxy_sections: usize,
}

impl ConfigSummary {
    /// Summarize `[common]` and the first proxy section
    fn parse(content: &str) -> Self {
        let mut summary = Self::default();
        let mut section = String::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                if !section.is_empty() && section != "common" {
                    summary.proxy_sections += 1;
                }
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if section == "common" {
                if key == "server_addr" {
                    summary.server_addr = Some(value.to_string());
                }
            } else if summary.proxy_sections == 1 {
                match key {
                    "type" => {
                        summary.protocol =
                            serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
                                .ok()
                    }
                    "local_port" => summary.local_port = value.parse().ok(),
                    "remote_port" => summary.remote_port = value.parse().ok(),
                    "custom_domains" => summary.domain = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        summary
    }
}
