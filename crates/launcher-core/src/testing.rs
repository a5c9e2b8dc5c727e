// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! In-memory fakes for the IPC, source and notifier seams

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tunnel_launcher_common::{
    CustomSession, Error, LaunchRequest, ProcessSupervisor, Protocol, ProvisionedSession, Result,
    SessionKey, SessionSource,
};

use crate::notifier::{Cue, Notifier, Toast};

/// tcp mapping on node1.example.net, port 20000 + id
pub fn provisioned(id: u64, name: &str) -> ProvisionedSession {
    ProvisionedSession {
        id,
        name: name.to_string(),
        protocol: Protocol::Tcp,
        local_ip: "127.0.0.1".to_string(),
        local_port: 25565,
        remote_port: Some(20000 + id as u16),
        domain: None,
        node_addr: "node1.example.net".to_string(),
        node_port: 7000,
        node_token: "node-secret".to_string(),
    }
}

/// http mapping bound to `domain`
pub fn web(id: u64, name: &str, domain: &str) -> ProvisionedSession {
    ProvisionedSession {
        protocol: Protocol::Http,
        local_port: 8080,
        remote_port: None,
        domain: Some(domain.to_string()),
        ..provisioned(id, name)
    }
}

pub fn custom(id: u64, name: &str) -> CustomSession {
    CustomSession {
        id,
        name: name.to_string(),
        config: format!("[common]\nserver_addr = relay.example.org\n\n[{}]\ntype = tcp\n", name),
        server_addr: Some("relay.example.org".to_string()),
        protocol: Some(Protocol::Tcp),
        local_port: Some(22),
        remote_port: Some(30000 + id as u16),
        domain: None,
    }
}

/// Source returning a fixed list, optionally failing
pub struct StaticSource<T> {
    items: Mutex<Vec<T>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl<T> StaticSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, items: Vec<T>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> SessionSource for StaticSource<T> {
    type Item = T;

    async fn fetch(&self) -> anyhow::Result<Vec<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("source unavailable");
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct SupervisorState {
    running: HashSet<SessionKey>,
    hanging: HashSet<SessionKey>,
    started: Vec<LaunchRequest>,
    resolved: HashMap<String, String>,
    guard: Option<bool>,
}

/// Supervisor that tracks processes in memory
#[derive(Default)]
pub struct FakeSupervisor {
    state: Mutex<SupervisorState>,
    reject_start: AtomicBool,
    unreachable: AtomicBool,
    status_queries: AtomicUsize,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_start(&self, reject: bool) {
        self.reject_start.store(reject, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_running(&self, key: SessionKey, running: bool) {
        let mut state = self.state.lock().unwrap();
        if running {
            state.running.insert(key);
        } else {
            state.running.remove(&key);
        }
    }

    /// Status queries for `key` never complete
    pub fn hang(&self, key: SessionKey) {
        self.state.lock().unwrap().hanging.insert(key);
    }

    pub fn resolve_to(&self, name: &str, ip: &str) {
        self.state
            .lock()
            .unwrap()
            .resolved
            .insert(name.to_string(), ip.to_string());
    }

    pub fn started(&self) -> Vec<LaunchRequest> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn started_keys(&self) -> Vec<SessionKey> {
        self.started().iter().map(|r| r.session).collect()
    }

    pub fn guard(&self) -> Option<bool> {
        self.state.lock().unwrap().guard
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Supervisor("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(&self, request: &LaunchRequest) -> Result<String> {
        self.check_reachable()?;
        if self.reject_start.load(Ordering::SeqCst) {
            return Err(Error::Start("invalid configuration".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.started.push(request.clone());
        state.running.insert(request.session);
        Ok(format!("{} started", request.session))
    }

    async fn stop(&self, session: SessionKey) -> Result<String> {
        self.check_reachable()?;
        self.state.lock().unwrap().running.remove(&session);
        Ok(format!("{} stopped", session))
    }

    async fn is_running(&self, session: SessionKey) -> Result<bool> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let hanging = self.state.lock().unwrap().hanging.contains(&session);
        if hanging {
            std::future::pending::<()>().await;
        }
        self.check_reachable()?;
        Ok(self.state.lock().unwrap().running.contains(&session))
    }

    async fn list_running(&self) -> Result<Vec<SessionKey>> {
        self.check_reachable()?;
        let mut keys: Vec<SessionKey> = self.state.lock().unwrap().running.iter().copied().collect();
        keys.sort();
        Ok(keys)
    }

    async fn resolve_domain(&self, name: &str) -> Result<Option<String>> {
        self.check_reachable()?;
        Ok(self.state.lock().unwrap().resolved.get(name).cloned())
    }

    async fn fix_tls(&self) -> Result<String> {
        self.check_reachable()?;
        Ok("tls enabled".to_string())
    }

    async fn set_guard_enabled(&self, enabled: bool) -> Result<()> {
        self.check_reachable()?;
        self.state.lock().unwrap().guard = Some(enabled);
        Ok(())
    }
}

/// Notifier that records everything it is asked to show
#[derive(Default)]
pub struct RecordingNotifier {
    cues: Mutex<Vec<Cue>>,
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().unwrap().clone()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn play_cue(&self, cue: Cue) {
        self.cues.lock().unwrap().push(cue);
    }

    fn toast(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }
}
