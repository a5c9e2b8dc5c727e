// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Log-driven notifications
//!
//! Watches new log lines, classifies them with an ordered substring rule
//! table and raises at most one success and one failure notification per
//! session and launch epoch. A successful mapping also gets a synthesized
//! "tunnel ready" line carrying the address users connect to.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunnel_launcher_common::{
    format_host_port, LogLine, Preferences, Session, SessionKey, SessionKind,
};

use crate::catalog::Catalog;
use crate::controller::ProcessController;
use crate::log_buffer::{LogBuffer, LogSnapshot, LogSubscription};
use crate::notifier::{Cue, Notifier, Toast};
use crate::session_cache::SessionCache;

/// Printed by the supervisor right after spawning a client
pub const LAUNCH_MARKER: &str = "frpc 进程已启动";
/// Printed by the client once the relay accepted the mapping
pub const SUCCESS_MARKER: &str = "映射启动成功";
/// Printed when the client gives up
pub const FAILURE_MARKER: &str = "启动失败";
/// Tag of synthesized lines; never overlaps the markers above
pub const READY_MARKER: &str = "Tunnel ready:";

/// State transition derived from a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// A new client process was spawned; opens a new epoch
    Launched,
    MappingStarted,
    StartFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRule {
    pub pattern: String,
    pub event: LogEvent,
}

impl LogRule {
    pub fn new(pattern: impl Into<String>, event: LogEvent) -> Self {
        Self {
            pattern: pattern.into(),
            event,
        }
    }
}

/// Rules in priority order
pub fn default_rules() -> Vec<LogRule> {
    vec![
        LogRule::new(LAUNCH_MARKER, LogEvent::Launched),
        LogRule::new(SUCCESS_MARKER, LogEvent::MappingStarted),
        LogRule::new(FAILURE_MARKER, LogEvent::StartFailed),
    ]
}

/// First rule whose pattern occurs in `message`
pub fn classify(rules: &[LogRule], message: &str) -> Option<LogEvent> {
    rules
        .iter()
        .find(|rule| message.contains(rule.pattern.as_str()))
        .map(|rule| rule.event)
}

/// Dedup flags of one session within the current epoch
#[derive(Debug, Default)]
struct EpochState {
    success_notified: bool,
    failure_notified: bool,
    ready_synthesized: bool,
}

/// Display metadata for a session
struct Target {
    name: String,
    /// Web link or `host:port`
    address: Option<String>,
    /// Host to resolve for tcp/udp mappings
    host: Option<String>,
}

pub struct NotificationEngine {
    rules: Vec<LogRule>,
    buffer: Arc<LogBuffer>,
    cache: Arc<SessionCache>,
    catalog: watch::Receiver<Catalog>,
    controller: ProcessController,
    preferences: Preferences,
    notifier: Arc<dyn Notifier>,
    suppressed: Arc<AtomicBool>,
    cursor: u64,
    epochs: HashMap<SessionKey, EpochState>,
}

impl NotificationEngine {
    pub fn new(
        buffer: Arc<LogBuffer>,
        cache: Arc<SessionCache>,
        catalog: watch::Receiver<Catalog>,
        controller: ProcessController,
        preferences: Preferences,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rules: default_rules(),
            buffer,
            cache,
            catalog,
            controller,
            preferences,
            notifier,
            suppressed: Arc::new(AtomicBool::new(false)),
            cursor: 0,
            epochs: HashMap::new(),
        }
    }

    /// Replace the rule table
    pub fn with_rules(mut self, rules: Vec<LogRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Share a suppression flag owned by the frontend
    ///
    /// While set, cues and toasts are skipped; ready lines are still written.
    pub fn with_suppression(mut self, flag: Arc<AtomicBool>) -> Self {
        self.suppressed = flag;
        self
    }

    pub fn suppression(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.suppressed)
    }

    /// Sequence number of the last processed line
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Handle every entry of `snapshot` newer than the cursor
    pub async fn process(&mut self, snapshot: &LogSnapshot) {
        let start = snapshot.partition_point(|entry| entry.seq <= self.cursor);
        for entry in &snapshot[start..] {
            self.cursor = entry.seq;
            if let Some(event) = classify(&self.rules, &entry.line.message) {
                self.handle(entry.line.key(), event).await;
            }
        }
    }

    async fn handle(&mut self, key: SessionKey, event: LogEvent) {
        debug!("Log event {:?} for {}", event, key);
        match event {
            LogEvent::Launched => {
                self.epochs.remove(&key);
            }
            LogEvent::MappingStarted => {
                let epoch = self.epochs.entry(key).or_default();
                let (synthesized, notified) = (epoch.ready_synthesized, epoch.success_notified);
                let needs_ready = !synthesized && !self.ready_line_present(key);
                let needs_toast = !notified && !self.is_suppressed();
                if !needs_ready && !needs_toast {
                    return;
                }

                let target = self.target(key).await;
                if needs_ready {
                    let message = self.ready_message(&target).await;
                    self.epochs.entry(key).or_default().ready_synthesized = true;
                    self.buffer.append(LogLine::now(key, message));
                }

                if needs_toast {
                    self.epochs.entry(key).or_default().success_notified = true;
                    info!("Session {} is up", key);
                    self.cue(Cue::Success);
                    self.notifier.toast(Toast::success(
                        "Tunnel started",
                        format!("{} is up and accepting connections", target.name),
                    ));
                }
            }
            LogEvent::StartFailed => {
                if self.is_suppressed() {
                    return;
                }
                let already = self.epochs.entry(key).or_default().failure_notified;
                if !already {
                    let target = self.target(key).await;
                    self.epochs.entry(key).or_default().failure_notified = true;
                    info!("Session {} failed to start", key);
                    self.cue(Cue::Failure);
                    self.notifier.toast(Toast::error(
                        "Tunnel failed to start",
                        format!("{} could not start, check the logs for details", target.name),
                    ));
                }
            }
        }
    }

    fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    fn cue(&self, cue: Cue) {
        if self.preferences.sound_enabled() {
            self.notifier.play_cue(cue);
        }
    }

    fn ready_line_present(&self, key: SessionKey) -> bool {
        self.buffer
            .snapshot()
            .iter()
            .any(|entry| entry.line.key() == key && entry.line.message.contains(READY_MARKER))
    }

    async fn target(&self, key: SessionKey) -> Target {
        match key.kind {
            SessionKind::Provisioned => {
                if let Some(session) = self.cache.get(key.id).await {
                    let host = (!session.protocol.is_web()).then(|| session.node_addr.clone());
                    return Target {
                        address: session.access_link(),
                        name: session.name,
                        host,
                    };
                }
            }
            SessionKind::Custom => {
                let session = self.catalog.borrow().iter().find(|s| s.key() == key).cloned();
                if let Some(Session::Custom(session)) = session {
                    let web = session.protocol.filter(|p| p.is_web());
                    let (address, host) = match (web, &session.domain, &session.server_addr) {
                        (Some(protocol), Some(domain), _) => {
                            (Some(format!("{}://{}", protocol, domain)), None)
                        }
                        (None, _, Some(server)) => (
                            session.remote_port.map(|port| format_host_port(server, port)),
                            Some(server.clone()),
                        ),
                        _ => (None, None),
                    };
                    return Target {
                        name: session.name,
                        address,
                        host,
                    };
                }
            }
        }

        Target {
            name: key.to_string(),
            address: None,
            host: None,
        }
    }

    async fn ready_message(&self, target: &Target) -> String {
        let Some(address) = &target.address else {
            return format!("[I] {} {} is running", READY_MARKER, target.name);
        };

        let resolved = match &target.host {
            Some(host) if host.parse::<IpAddr>().is_err() => {
                self.controller.resolve_domain(host).await
            }
            _ => None,
        };

        match resolved {
            Some(ip) => format!(
                "[I] {} {} is reachable at {} ({})",
                READY_MARKER, target.name, address, ip
            ),
            None => format!(
                "[I] {} {} is reachable at {}",
                READY_MARKER, target.name, address
            ),
        }
    }

    /// Process snapshots until shutdown or until the buffer goes away
    pub async fn run(mut self, mut logs: LogSubscription, shutdown: CancellationToken) {
        loop {
            let snapshot = tokio::select! {
                _ = shutdown.cancelled() => break,
                snapshot = logs.recv() => match snapshot {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };
            self.process(&snapshot).await;
        }
        debug!("Notification engine stopped");
    }
}
