// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Common types for Tunnel Launcher

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Which catalog a session comes from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Provisioned by the account API (needs an account token to start)
    Provisioned,
    /// User-defined, stored locally
    Custom,
}

impl Default for SessionKind {
    fn default() -> Self {
        SessionKind::Provisioned
    }
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Provisioned => "provisioned",
            SessionKind::Custom => "custom",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collision-free session identifier, rendered as `{kind}_{id}`
///
/// Numeric ids are only unique within a kind, so every set or map keyed by
/// session uses this type rather than the bare id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub kind: SessionKind,
    pub id: u64,
}

impl SessionKey {
    pub fn new(kind: SessionKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn provisioned(id: u64) -> Self {
        Self::new(SessionKind::Provisioned, id)
    }

    pub fn custom(id: u64) -> Self {
        Self::new(SessionKind::Custom, id)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.id)
    }
}

impl FromStr for SessionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .rsplit_once('_')
            .ok_or_else(|| Error::InvalidSessionKey(s.to_string()))?;
        let kind = match kind {
            "provisioned" => SessionKind::Provisioned,
            "custom" => SessionKind::Custom,
            _ => return Err(Error::InvalidSessionKey(s.to_string())),
        };
        let id = id
            .parse::<u64>()
            .map_err(|_| Error::InvalidSessionKey(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

impl Serialize for SessionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Transport protocol of a tunnel mapping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
    Https,
}

impl Protocol {
    /// HTTP-style protocols are addressed through a bound domain
    pub fn is_web(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session provisioned by the account API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionedSession {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub protocol: Protocol,
    pub local_ip: String,
    pub local_port: u16,
    /// Remote port for tcp/udp mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    /// Bound domain for http/https mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Relay node hostname
    pub node_addr: String,
    #[serde(default = "default_node_port")]
    pub node_port: u16,
    #[serde(default)]
    pub node_token: String,
}

fn default_node_port() -> u16 {
    7000
}

impl ProvisionedSession {
    /// Public address users reach the mapping through
    pub fn access_link(&self) -> Option<String> {
        match self.protocol {
            Protocol::Http | Protocol::Https => self
                .domain
                .as_ref()
                .map(|domain| format!("{}://{}", self.protocol, domain)),
            Protocol::Tcp | Protocol::Udp => self
                .remote_port
                .map(|port| crate::format_host_port(&self.node_addr, port)),
        }
    }
}

/// User-defined session backed by a raw proxy client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomSession {
    pub id: u64,
    pub name: String,
    /// Proxy client configuration, passed to the supervisor verbatim
    pub config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// A session from either catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Session {
    Provisioned(ProvisionedSession),
    Custom(CustomSession),
}

impl Session {
    pub fn kind(&self) -> SessionKind {
        match self {
            Session::Provisioned(_) => SessionKind::Provisioned,
            Session::Custom(_) => SessionKind::Custom,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Session::Provisioned(s) => s.id,
            Session::Custom(s) => s.id,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.kind(), self.id())
    }

    pub fn name(&self) -> &str {
        match self {
            Session::Provisioned(s) => &s.name,
            Session::Custom(s) => &s.name,
        }
    }

    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            Session::Provisioned(s) => Some(s.protocol),
            Session::Custom(s) => s.protocol,
        }
    }
}

/// One line of proxy client output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub session_id: u64,
    #[serde(default)]
    pub kind: SessionKind,
    pub message: String,
    pub timestamp: String,
}

impl LogLine {
    /// Build a line stamped with the current local time
    pub fn now(key: SessionKey, message: impl Into<String>) -> Self {
        Self {
            session_id: key.id,
            kind: key.kind,
            message: message.into(),
            timestamp: local_timestamp(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.kind, self.session_id)
    }
}

/// Timestamp format used for log lines
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%Y/%m/%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_display_and_parse() {
        let key = SessionKey::provisioned(7);
        assert_eq!(key.to_string(), "provisioned_7");
        assert_eq!("provisioned_7".parse::<SessionKey>().unwrap(), key);
        assert_eq!(
            "custom_7".parse::<SessionKey>().unwrap(),
            SessionKey::custom(7)
        );

        assert!("7".parse::<SessionKey>().is_err());
        assert!("remote_7".parse::<SessionKey>().is_err());
        assert!("custom_x".parse::<SessionKey>().is_err());
    }

    #[test]
    fn test_session_keys_do_not_collide() {
        let mut set = std::collections::HashSet::new();
        set.insert(SessionKey::provisioned(7));
        set.insert(SessionKey::custom(7));
        assert_eq!(set.len(), 2);
        assert_ne!(
            SessionKey::provisioned(7).to_string(),
            SessionKey::custom(7).to_string()
        );
    }

    #[test]
    fn test_session_tagged_serialization() {
        let session = Session::Custom(CustomSession {
            id: 3,
            name: "nas".to_string(),
            config: "[common]".to_string(),
            server_addr: None,
            protocol: Some(Protocol::Tcp),
            local_port: Some(5000),
            remote_port: Some(25000),
            domain: None,
        });
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["kind"], "custom");
        assert_eq!(json["data"]["id"], 3);
        assert_eq!(session.key().to_string(), "custom_3");
    }

    #[test]
    fn test_log_line_kind_defaults_to_provisioned() {
        let line: LogLine = serde_json::from_str(
            r#"{"session_id": 9, "message": "hello", "timestamp": "2025/01/01 00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(line.key(), SessionKey::provisioned(9));
    }

    #[test]
    fn test_access_link() {
        let mut session = ProvisionedSession {
            id: 1,
            name: "web".to_string(),
            protocol: Protocol::Http,
            local_ip: "127.0.0.1".to_string(),
            local_port: 8080,
            remote_port: None,
            domain: Some("a.example.com".to_string()),
            node_addr: "node1.example.net".to_string(),
            node_port: 7000,
            node_token: String::new(),
        };
        assert_eq!(session.access_link().as_deref(), Some("http://a.example.com"));

        session.protocol = Protocol::Tcp;
        session.remote_port = Some(25565);
        assert_eq!(
            session.access_link().as_deref(),
            Some("node1.example.net:25565")
        );
    }
}
