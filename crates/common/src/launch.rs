// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Launch requests sent to the supervisor
//!
//! A launch request is the session definition merged with the persisted
//! proxy gateway and protocol-hardening preferences.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Protocol, ProvisionedSession, Session, SessionKey};

/// Outbound proxy the proxy client dials the relay through
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyGateway {
    pub enabled: bool,
    /// Proxy scheme, e.g. `http` or `socks5`
    #[serde(rename = "type")]
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for ProxyGateway {
    fn default() -> Self {
        Self {
            enabled: false,
            scheme: "http".to_string(),
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl ProxyGateway {
    /// Proxy URL, or `None` when disabled or incomplete
    pub fn url(&self) -> Option<String> {
        let host = self.host.trim();
        if !self.enabled || host.is_empty() || self.port == 0 {
            return None;
        }

        let scheme = match self.scheme.trim() {
            "" => "http",
            other => other,
        };

        let credentials = match (self.username.is_empty(), self.password.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("{}@", self.username),
            (false, false) => format!("{}:{}@", self.username, self.password),
        };

        Some(format!(
            "{}://{}{}",
            scheme,
            credentials,
            crate::format_host_port(host, self.port)
        ))
    }
}

/// Preferences merged into every launch request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchPreferences {
    pub proxy_gateway: ProxyGateway,
    /// Force TLS between the proxy client and the relay
    pub force_tls: bool,
    /// Use the KCP transport for tcp/udp mappings
    pub kcp_optimization: bool,
}

/// Mapping definition for a provisioned session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingSpec {
    pub server_addr: String,
    pub server_port: u16,
    pub node_token: String,
    #[serde(rename = "type")]
    pub protocol: Protocol,
    pub local_ip: String,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_domains: Option<String>,
}

/// What the supervisor should run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum LaunchSpec {
    /// Generated from a provisioned session
    Mapping(MappingSpec),
    /// Raw client configuration of a custom session
    Raw { config: String },
}

/// Complete start request for one session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchRequest {
    pub session: SessionKey,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,
    pub spec: LaunchSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    pub force_tls: bool,
    pub kcp: bool,
}

impl LaunchRequest {
    /// Merge a session with launch preferences
    ///
    /// Fails with [`Error::Start`] when the session cannot be expressed as a
    /// valid client configuration.
    pub fn build(
        session: &Session,
        auth_token: Option<&str>,
        prefs: &LaunchPreferences,
    ) -> Result<Self> {
        let http_proxy = prefs.proxy_gateway.url();

        match session {
            Session::Provisioned(s) => {
                let token = auth_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| Error::Start(format!("{} requires an account token", s.name)))?;
                let spec = mapping_spec(s)?;
                let kcp = prefs.kcp_optimization && !spec.protocol.is_web();

                Ok(Self {
                    session: session.key(),
                    name: s.name.clone(),
                    user_token: Some(token.to_string()),
                    spec: LaunchSpec::Mapping(spec),
                    http_proxy,
                    force_tls: prefs.force_tls,
                    kcp,
                })
            }
            Session::Custom(s) => {
                if s.config.trim().is_empty() {
                    return Err(Error::Start(format!("{} has an empty configuration", s.name)));
                }
                let kcp = prefs.kcp_optimization && !s.protocol.is_some_and(|p| p.is_web());

                Ok(Self {
                    session: session.key(),
                    name: s.name.clone(),
                    user_token: None,
                    spec: LaunchSpec::Raw {
                        config: s.config.clone(),
                    },
                    http_proxy,
                    force_tls: prefs.force_tls,
                    kcp,
                })
            }
        }
    }
}

fn mapping_spec(session: &ProvisionedSession) -> Result<MappingSpec> {
    let (remote_port, custom_domains) = match session.protocol {
        Protocol::Tcp | Protocol::Udp => {
            let port = session.remote_port.ok_or_else(|| {
                Error::Start(format!("{} tcp/udp mapping has no remote port", session.name))
            })?;
            (Some(port), None)
        }
        Protocol::Http | Protocol::Https => {
            let domain = session
                .domain
                .as_ref()
                .filter(|d| !d.trim().is_empty())
                .ok_or_else(|| {
                    Error::Start(format!("{} http/https mapping has no domain", session.name))
                })?;
            (None, Some(domain.clone()))
        }
    };

    if session.node_addr.trim().is_empty() {
        return Err(Error::Start(format!("{} has no relay node", session.name)));
    }

    Ok(MappingSpec {
        server_addr: session.node_addr.clone(),
        server_port: session.node_port,
        node_token: session.node_token.clone(),
        protocol: session.protocol,
        local_ip: session.local_ip.clone(),
        local_port: session.local_port,
        remote_port,
        custom_domains,
    })
}
