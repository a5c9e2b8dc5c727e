// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Tunnel Launcher - Supervisor Client Module
// HTTP transport for the process supervisor IPC boundary

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::launch::LaunchRequest;
use crate::supervisor::ProcessSupervisor;
use crate::types::SessionKey;

/// Header carrying the supervisor IPC token
pub const TOKEN_HEADER: &str = "X-Supervisor-Token";

/// Connection mode for launcher to supervisor communication
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// HTTP (localhost only, no TLS)
    Http,
    /// HTTPS with TLS
    Https,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        ConnectionMode::Http
    }
}

/// Client configuration for connecting to the supervisor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorClientConfig {
    #[serde(default)]
    pub connection_mode: ConnectionMode,

    #[serde(default = "default_supervisor_host")]
    pub host: String,

    #[serde(default = "default_supervisor_port")]
    pub port: u16,

    /// IPC token, if the supervisor requires one
    #[serde(default)]
    pub auth_token: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_supervisor_host() -> String {
    "127.0.0.1".to_string()
}

fn default_supervisor_port() -> u16 {
    7400
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SupervisorClientConfig {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::default(),
            host: default_supervisor_host(),
            port: default_supervisor_port(),
            auth_token: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SupervisorClientConfig {
    /// Base URL with protocol derived from the connection mode
    pub fn base_url(&self) -> String {
        let host_port = crate::format_host_port(&self.host, self.port);
        match self.connection_mode {
            ConnectionMode::Http => format!("http://{}", host_port),
            ConnectionMode::Https => format!("https://{}", host_port),
        }
    }
}

/// Validate supervisor client configuration
pub fn validate_client_config(config: &SupervisorClientConfig) -> anyhow::Result<()> {
    if config.host.trim().is_empty() {
        anyhow::bail!("Supervisor host is required but is empty");
    }

    if config.connection_mode == ConnectionMode::Http && !crate::is_loopback_address(&config.host)
    {
        anyhow::bail!(
            "Supervisor at {} is not on this machine; plain HTTP is only allowed for loopback addresses. \
             Set connection_mode = \"https\"",
            config.host
        );
    }

    Ok(())
}

/// Create an HTTP client configured to talk to the supervisor
pub fn create_supervisor_client(config: &SupervisorClientConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        // The supervisor is local or explicitly addressed; never route through a system proxy
        .no_proxy()
        .build()
        .map_err(Error::from)
}

/// Longest silence tolerated on the event stream before reconnecting
pub const EVENT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Create a client for the long-lived event stream
///
/// Only connecting and individual reads are bounded; a whole-request timeout
/// would cut the stream while it is still delivering events.
pub fn create_event_stream_client(config: &SupervisorClientConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.request_timeout_secs))
        .read_timeout(EVENT_STREAM_IDLE_TIMEOUT)
        .no_proxy()
        .build()
        .map_err(Error::from)
}

/// Add the IPC token header to a request if configured
pub fn add_auth_header(request: RequestBuilder, config: &SupervisorClientConfig) -> RequestBuilder {
    if config.auth_token.is_empty() {
        request
    } else {
        request.header(TOKEN_HEADER, &config.auth_token)
    }
}

/// Success response carrying a human-readable message
#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: String,
}

/// Error response from the supervisor API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct RunningResponse {
    running: bool,
}

#[derive(Debug, Deserialize)]
struct RunningListResponse {
    sessions: Vec<SessionKey>,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    ip: Option<String>,
}

#[derive(Debug, Serialize)]
struct GuardRequest {
    enabled: bool,
}

/// [`ProcessSupervisor`] reached over the supervisor's REST API
#[derive(Clone)]
pub struct HttpSupervisor {
    client: Client,
    config: SupervisorClientConfig,
}

impl HttpSupervisor {
    pub fn new(config: SupervisorClientConfig) -> Result<Self> {
        let client = create_supervisor_client(&config)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SupervisorClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        add_auth_header(self.client.get(self.url(path)), &self.config)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        add_auth_header(self.client.post(self.url(path)), &self.config)
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| Error::Supervisor(format!("request failed: {}", e)))
    }

    /// Extract the supervisor's error message from a failed response
    async fn error_message(response: Response) -> String {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => format!("supervisor returned {}", status),
        }
    }

    async fn message_or(response: Response, reject: fn(String) -> Error) -> Result<String> {
        if response.status().is_success() {
            let body: MessageResponse = response.json().await?;
            Ok(body.message)
        } else {
            Err(reject(Self::error_message(response).await))
        }
    }

    async fn json_or_supervisor_error<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Error::Supervisor(Self::error_message(response).await))
        }
    }
}

#[async_trait]
impl ProcessSupervisor for HttpSupervisor {
    async fn start(&self, request: &LaunchRequest) -> Result<String> {
        debug!("Requesting start of {}", request.session);
        let response = Self::send(self.post("/api/sessions/start").json(request)).await?;
        Self::message_or(response, Error::Start).await
    }

    async fn stop(&self, session: SessionKey) -> Result<String> {
        debug!("Requesting stop of {}", session);
        let response = Self::send(self.post(&format!("/api/sessions/{}/stop", session))).await?;
        Self::message_or(response, Error::Stop).await
    }

    async fn is_running(&self, session: SessionKey) -> Result<bool> {
        let response = Self::send(self.get(&format!("/api/sessions/{}/running", session))).await?;
        let body: RunningResponse = Self::json_or_supervisor_error(response).await?;
        Ok(body.running)
    }

    async fn list_running(&self) -> Result<Vec<SessionKey>> {
        let response = Self::send(self.get("/api/sessions/running")).await?;
        let body: RunningListResponse = Self::json_or_supervisor_error(response).await?;
        Ok(body.sessions)
    }

    async fn resolve_domain(&self, name: &str) -> Result<Option<String>> {
        let response = Self::send(self.get("/api/resolve").query(&[("name", name)])).await?;
        let body: ResolveResponse = Self::json_or_supervisor_error(response).await?;
        Ok(body.ip)
    }

    async fn fix_tls(&self) -> Result<String> {
        let response = Self::send(self.post("/api/config/fix-tls")).await?;
        Self::message_or(response, Error::Supervisor).await
    }

    async fn set_guard_enabled(&self, enabled: bool) -> Result<()> {
        let request = add_auth_header(self.client.put(self.url("/api/guard")), &self.config)
            .json(&GuardRequest { enabled });
        let response = Self::send(request).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Supervisor(Self::error_message(response).await))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorClientConfig::default();
        assert_eq!(config.connection_mode, ConnectionMode::Http);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7400);
    }

    #[test]
    fn test_base_url() {
        let mut config = SupervisorClientConfig::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:7400");

        config.connection_mode = ConnectionMode::Https;
        config.host = "::1".to_string();
        config.port = 7443;
        assert_eq!(config.base_url(), "https://[::1]:7443");
    }

    #[test]
    fn test_validate_client_config() {
        let mut config = SupervisorClientConfig::default();
        assert!(validate_client_config(&config).is_ok());

        config.host = "10.1.1.1".to_string();
        assert!(validate_client_config(&config).is_err());

        config.connection_mode = ConnectionMode::Https;
        assert!(validate_client_config(&config).is_ok());

        config.host = "   ".to_string();
        assert!(validate_client_config(&config).is_err());
    }

    #[test]
    fn test_add_auth_header() {
        let client = Client::new();

        let config = SupervisorClientConfig::default();
        let request = add_auth_header(client.get("http://test"), &config)
            .build()
            .unwrap();
        assert!(request.headers().get(TOKEN_HEADER).is_none());

        let config = SupervisorClientConfig {
            auth_token: "secret-123".to_string(),
            ..Default::default()
        };
        let request = add_auth_header(client.get("http://test"), &config)
            .build()
            .unwrap();
        assert_eq!(request.headers().get(TOKEN_HEADER).unwrap(), "secret-123");
    }
}
