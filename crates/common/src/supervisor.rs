// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! IPC boundary to the native process supervisor
//!
//! The supervisor spawns, monitors and kills the proxy client processes.
//! Every call crosses a process boundary and may fail or stall; callers
//! decide how failures degrade.

use async_trait::async_trait;

use crate::error::Result;
use crate::launch::LaunchRequest;
use crate::types::SessionKey;

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start the proxy client for a session
    async fn start(&self, request: &LaunchRequest) -> Result<String>;

    /// Stop the proxy client of a session
    async fn stop(&self, session: SessionKey) -> Result<String>;

    /// Whether the session's process is alive
    async fn is_running(&self, session: SessionKey) -> Result<bool>;

    /// All sessions with a live process
    async fn list_running(&self) -> Result<Vec<SessionKey>>;

    /// Resolve a hostname on the supervisor host
    async fn resolve_domain(&self, name: &str) -> Result<Option<String>>;

    /// Rewrite a legacy client config so that TLS is enabled
    async fn fix_tls(&self) -> Result<String>;

    /// Enable or disable automatic restart of crashed processes
    async fn set_guard_enabled(&self, enabled: bool) -> Result<()>;
}
