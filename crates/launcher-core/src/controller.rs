// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Process controller
//!
//! Wraps the supervisor IPC boundary with the launcher's failure policy:
//! status queries degrade to safe defaults, start/stop rejections are
//! reported as [`Error::Start`] / [`Error::Stop`].

use std::sync::Arc;

use tracing::{debug, info, warn};
use tunnel_launcher_common::{
    Error, LaunchRequest, Preferences, ProcessSupervisor, Result, Session, SessionKey,
};

#[derive(Clone)]
pub struct ProcessController {
    supervisor: Arc<dyn ProcessSupervisor>,
    preferences: Preferences,
}

impl ProcessController {
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>, preferences: Preferences) -> Self {
        Self {
            supervisor,
            preferences,
        }
    }

    /// Build the launch request for a session and ask the supervisor to run it
    pub async fn start(&self, session: &Session, auth_token: Option<&str>) -> Result<String> {
        let request =
            LaunchRequest::build(session, auth_token, &self.preferences.launch_preferences())?;
        info!("Starting session {} ({})", request.session, request.name);

        self.supervisor.start(&request).await.map_err(|e| match e {
            Error::Start(msg) => Error::Start(msg),
            other => Error::Start(other.to_string()),
        })
    }

    pub async fn stop(&self, session: SessionKey) -> Result<String> {
        info!("Stopping session {}", session);
        self.supervisor.stop(session).await.map_err(|e| match e {
            Error::Stop(msg) => Error::Stop(msg),
            other => Error::Stop(other.to_string()),
        })
    }

    /// Whether the session's process is alive; any failure reads as `false`
    pub async fn is_running(&self, session: SessionKey) -> bool {
        match self.supervisor.is_running(session).await {
            Ok(running) => running,
            Err(e) => {
                debug!("Status query for {} failed: {}", session, e);
                false
            }
        }
    }

    /// Sessions with a live process; any failure reads as none
    pub async fn list_running(&self) -> Vec<SessionKey> {
        self.supervisor.list_running().await.unwrap_or_else(|e| {
            debug!("Listing running sessions failed: {}", e);
            Vec::new()
        })
    }

    /// Resolve a hostname; any failure reads as unresolved
    pub async fn resolve_domain(&self, name: &str) -> Option<String> {
        self.supervisor
            .resolve_domain(name)
            .await
            .unwrap_or_else(|e| {
                debug!("Resolving {} failed: {}", name, e);
                None
            })
    }

    /// Ask the supervisor to enable TLS in a legacy client config
    pub async fn fix_tls(&self) -> Result<String> {
        self.supervisor.fix_tls().await
    }

    /// Push the persisted process-guard flag to the supervisor
    pub async fn sync_guard(&self) {
        let enabled = self.preferences.process_guard_enabled();
        if let Err(e) = self.supervisor.set_guard_enabled(enabled).await {
            warn!("Could not apply process guard setting: {}", e);
        }
    }
}
