// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Launcher service object
//!
//! Owns the log buffer, session cache and catalog, and wires the
//! reconciler, notification engine and auto-start orchestrator to the
//! supervisor event stream. Construct once with [`LauncherCore::new`], drive
//! with [`LauncherCore::run`] and stop by cancelling the shutdown token.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunnel_launcher_common::{
    sanitize_log, Error, Preferences, ProcessSupervisor, Result, Session, SessionKey,
    SupervisorEvent,
};

use crate::autostart::{AutoStartOrchestrator, SessionToggle};
use crate::catalog::{Catalog, CustomSource, SessionCatalog};
use crate::controller::ProcessController;
use crate::log_buffer::LogBuffer;
use crate::notifications::NotificationEngine;
use crate::notifier::{Notifier, Toast};
use crate::reconciler::StatusReconciler;
use crate::session_cache::{ProvisionedSource, SessionCache};

/// Pending auto-restart signals before new ones are dropped
const RESTART_QUEUE: usize = 32;

/// Delay before reloading an incomplete catalog, doubled per attempt
pub const CATALOG_RETRY: Duration = Duration::from_secs(5);
pub const CATALOG_RETRY_MAX: Duration = Duration::from_secs(300);

/// Loads after which auto-start accepts an incomplete catalog
pub const CATALOG_PATIENCE: u32 = 3;

pub struct LauncherCore {
    buffer: Arc<LogBuffer>,
    cache: Arc<SessionCache>,
    catalog: SessionCatalog,
    controller: ProcessController,
    reconciler: Arc<StatusReconciler>,
    autostart: AutoStartOrchestrator,
    preferences: Preferences,
    notifier: Arc<dyn Notifier>,
    auth_token: Option<String>,
    suppressed: Arc<AtomicBool>,
    restart_tx: mpsc::Sender<SessionKey>,
    restart_rx: Mutex<Option<mpsc::Receiver<SessionKey>>>,
    catalog_attempts: AtomicU32,
}

impl LauncherCore {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        provisioned: ProvisionedSource,
        custom: CustomSource,
        preferences: Preferences,
        notifier: Arc<dyn Notifier>,
        auth_token: Option<String>,
    ) -> Arc<Self> {
        let cache = Arc::new(SessionCache::new(provisioned));
        let controller = ProcessController::new(supervisor, preferences.clone());
        let (restart_tx, restart_rx) = mpsc::channel(RESTART_QUEUE);

        Arc::new(Self {
            buffer: LogBuffer::new(),
            catalog: SessionCatalog::new(Arc::clone(&cache), custom),
            cache,
            reconciler: Arc::new(StatusReconciler::new(controller.clone())),
            controller,
            autostart: AutoStartOrchestrator::new(preferences.clone()),
            preferences,
            notifier,
            auth_token: auth_token.filter(|t| !t.is_empty()),
            suppressed: Arc::new(AtomicBool::new(false)),
            restart_tx,
            restart_rx: Mutex::new(Some(restart_rx)),
            catalog_attempts: AtomicU32::new(0),
        })
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    pub fn catalog(&self) -> &SessionCatalog {
        &self.catalog
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    pub fn reconciler(&self) -> &Arc<StatusReconciler> {
        &self.reconciler
    }

    pub fn autostart(&self) -> &AutoStartOrchestrator {
        &self.autostart
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Flag the frontend sets while the log view has focus
    pub fn suppression(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.suppressed)
    }

    /// Reload the catalog from both sources
    pub async fn refresh(&self) -> Catalog {
        self.catalog.load().await
    }

    /// Feed one supervisor event into the core
    pub fn ingest(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Log(mut line) => {
                if let Some(token) = &self.auth_token {
                    line.message = sanitize_log(&line.message, &[token.as_str()]);
                }
                self.buffer.append(line);
            }
            SupervisorEvent::AutoRestarted { session, timestamp } => {
                info!("Supervisor restarted {} at {}", session, timestamp);
                if let Err(e) = self.restart_tx.try_send(session) {
                    debug!("Dropping restart signal for {}: {}", session, e);
                }
            }
            SupervisorEvent::Heartbeat => {}
        }
    }

    /// Start or stop a session and refresh the running set
    ///
    /// A rejected request is reported through one error toast and returned;
    /// it is never retried.
    pub async fn set_session_enabled(&self, key: SessionKey, enabled: bool) -> Result<String> {
        let Some(session) = self.catalog.find(key) else {
            let err = Error::SessionNotFound(key.to_string());
            self.notifier.toast(Toast::error("Unknown tunnel", err.to_string()));
            return Err(err);
        };
        self.toggle(&session, enabled).await
    }

    async fn toggle(&self, session: &Session, enabled: bool) -> Result<String> {
        let result = if enabled {
            self.controller
                .start(session, self.auth_token.as_deref())
                .await
        } else {
            self.controller.stop(session.key()).await
        };

        if let Err(e) = &result {
            warn!("{}", e);
            let title = if enabled {
                "Could not start tunnel"
            } else {
                "Could not stop tunnel"
            };
            self.notifier
                .toast(Toast::error(title, format!("{}: {}", session.name(), e)));
        }

        let catalog = self.catalog.current();
        self.reconciler.reconcile(&catalog).await;
        result
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::Receiver<SupervisorEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.ingest(event),
                    None => {
                        warn!("Supervisor event stream closed");
                        break;
                    }
                },
            }
        }
    }

    /// Load the catalog, retrying with backoff until both sources answer
    async fn load_catalog(&self, shutdown: &CancellationToken) {
        let mut delay = CATALOG_RETRY;
        loop {
            self.catalog_attempts.fetch_add(1, Ordering::SeqCst);
            self.catalog.load().await;
            if self.catalog.is_complete() {
                return;
            }

            warn!("Session catalog incomplete, retrying in {}s", delay.as_secs());
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(CATALOG_RETRY_MAX);
        }
    }

    /// A catalog auto-start may act on
    fn catalog_settled(&self) -> bool {
        !self.catalog.is_loading()
            && (self.catalog.is_complete()
                || self.catalog_attempts.load(Ordering::SeqCst) >= CATALOG_PATIENCE)
    }

    /// Perform the one-shot auto-start once a settled catalog has entries
    async fn auto_start_when_ready(&self) {
        let mut catalog = self.catalog.watch();
        let running = self.reconciler.watch();
        loop {
            let current = catalog.borrow_and_update().clone();
            if !current.is_empty() && self.catalog_settled() {
                self.autostart
                    .run(&current, &running, self.auth_token.is_some(), self)
                    .await;
                return;
            }
            if catalog.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run the launcher until `shutdown` is cancelled
    ///
    /// Pushes the process-guard setting, starts status polling and log
    /// notifications, loads the catalog (retrying until both sources answer)
    /// and performs the one-shot auto-start once the catalog has entries.
    pub async fn run(
        self: Arc<Self>,
        events: mpsc::Receiver<SupervisorEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let restarts = self
            .restart_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| Error::Config("launcher is already running".to_string()))?;

        let engine = NotificationEngine::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.cache),
            self.catalog.watch(),
            self.controller.clone(),
            self.preferences.clone(),
            Arc::clone(&self.notifier),
        )
        .with_suppression(self.suppression());
        let notifications = tokio::spawn(engine.run(self.buffer.subscribe(), shutdown.clone()));
        let pump = tokio::spawn(Arc::clone(&self).pump(events, shutdown.clone()));

        self.controller.sync_guard().await;

        let reconciler = tokio::spawn(Arc::clone(&self.reconciler).run(
            self.catalog.watch(),
            restarts,
            shutdown.clone(),
        ));

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = async { tokio::join!(self.load_catalog(&shutdown), self.auto_start_when_ready()) } => {}
        }

        shutdown.cancelled().await;
        for (name, task) in [
            ("notifications", notifications),
            ("event pump", pump),
            ("reconciler", reconciler),
        ] {
            if let Err(e) = task.await {
                warn!("Launcher task {} ended abnormally: {}", name, e);
            }
        }
        info!("Launcher stopped");
        Ok(())
    }
}

#[async_trait]
impl SessionToggle for LauncherCore {
    async fn set_enabled(&self, session: &Session, enabled: bool) -> Result<()> {
        self.toggle(session, enabled).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autostart::AutoStartState;
    use crate::notifier::ToastLevel;
    use crate::testing::{custom, web, FakeSupervisor, RecordingNotifier, StaticSource};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tunnel_launcher_common::{AutoStartEntry, LogLine};

    const TOKEN: &str = "tok-abcdef123456";

    struct Harness {
        core: Arc<LauncherCore>,
        supervisor: Arc<FakeSupervisor>,
        notifier: Arc<RecordingNotifier>,
        events: mpsc::Sender<SupervisorEvent>,
        shutdown: CancellationToken,
        task: JoinHandle<Result<()>>,
    }

    fn core(preferences: Preferences) -> (Arc<LauncherCore>, Arc<FakeSupervisor>, Arc<RecordingNotifier>) {
        let supervisor = Arc::new(FakeSupervisor::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let core = LauncherCore::new(
            supervisor.clone(),
            Arc::new(StaticSource::new(vec![web(7, "site", "a.example.com")])),
            Arc::new(StaticSource::new(vec![custom(1, "nas")])),
            preferences,
            notifier.clone(),
            Some(TOKEN.to_string()),
        );
        (core, supervisor, notifier)
    }

    async fn start(preferences: Preferences) -> Harness {
        let (core, supervisor, notifier) = core(preferences);
        let (events, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&core).run(rx, shutdown.clone()));
        settle().await;
        Harness {
            core,
            supervisor,
            notifier,
            events,
            shutdown,
            task,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    impl Harness {
        async fn log(&self, key: SessionKey, message: &str) {
            self.events
                .send(SupervisorEvent::Log(LogLine::now(key, message)))
                .await
                .unwrap();
        }

        async fn stop(self) {
            self.shutdown.cancel();
            self.task.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_web_session_scenario() {
        let h = start(Preferences::in_memory()).await;
        let key = SessionKey::provisioned(7);

        h.core.set_session_enabled(key, true).await.unwrap();
        h.log(key, "[I] [ChmlFrpLauncher] frpc 进程已启动 (PID: 4242), 开始连接服务器...").await;
        h.log(key, "[I] [site] 映射启动成功").await;
        settle().await;

        assert!(h.core.reconciler().is_running(key));
        assert!(!h.core.reconciler().is_running(SessionKey::custom(7)));

        let snapshot = h.core.logs().snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot[2].line.message.contains("a.example.com"));

        let toasts = h.notifier.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, ToastLevel::Success);

        let request = &h.supervisor.started()[0];
        assert_eq!(request.user_token.as_deref(), Some(TOKEN));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_lines_are_sanitized() {
        let h = start(Preferences::in_memory()).await;

        h.log(SessionKey::custom(1), &format!("login with token {}", TOKEN)).await;
        settle().await;

        let snapshot = h.core.logs().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].line.message.contains(TOKEN));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_restart_signal_refreshes_status() {
        let h = start(Preferences::in_memory()).await;
        let key = SessionKey::custom(1);
        assert!(!h.core.reconciler().is_running(key));

        h.supervisor.set_running(key, true);
        h.events
            .send(SupervisorEvent::AutoRestarted {
                session: key,
                timestamp: "2025/01/01 00:00:00".to_string(),
            })
            .await
            .unwrap();
        settle().await;

        assert!(h.core.reconciler().is_running(key));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_start_shows_one_error_toast() {
        let h = start(Preferences::in_memory()).await;
        h.supervisor.reject_start(true);

        let err = h
            .core
            .set_session_enabled(SessionKey::custom(1), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Start(_)));

        let toasts = h.notifier.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, ToastLevel::Error);
        assert!(toasts[0].body.contains("nas"));
        assert!(h.supervisor.started().is_empty());
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session() {
        let h = start(Preferences::in_memory()).await;
        let err = h
            .core
            .set_session_enabled(SessionKey::custom(99), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_refreshes_running_set() {
        let h = start(Preferences::in_memory()).await;
        let key = SessionKey::custom(1);

        h.core.set_session_enabled(key, true).await.unwrap();
        assert!(h.core.reconciler().is_running(key));
        h.core.set_session_enabled(key, false).await.unwrap();
        assert!(!h.core.reconciler().is_running(key));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_performs_auto_start_and_guard_sync() {
        let preferences = Preferences::in_memory();
        preferences
            .set_auto_start_list(&[
                AutoStartEntry::from(SessionKey::custom(1)),
                AutoStartEntry::from(SessionKey::provisioned(7)),
            ])
            .unwrap();
        preferences.set_process_guard_enabled(true).unwrap();

        let h = start(preferences).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.supervisor.guard(), Some(true));
        assert_eq!(
            h.supervisor.started_keys(),
            vec![SessionKey::provisioned(7), SessionKey::custom(1)]
        );
        assert_eq!(h.core.autostart().state(), AutoStartState::Done);
        assert!(h.core.reconciler().is_running(SessionKey::custom(1)));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_load_is_retried_before_auto_start() {
        let preferences = Preferences::in_memory();
        preferences
            .set_auto_start_list(&[AutoStartEntry::from(SessionKey::provisioned(7))])
            .unwrap();

        let provisioned = Arc::new(StaticSource::new(vec![web(7, "site", "a.example.com")]));
        provisioned.fail(true);
        let supervisor = Arc::new(FakeSupervisor::new());
        let core = LauncherCore::new(
            supervisor.clone(),
            provisioned.clone(),
            Arc::new(StaticSource::new(vec![])),
            preferences,
            Arc::new(RecordingNotifier::new()),
            Some(TOKEN.to_string()),
        );
        let (_events, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&core).run(rx, shutdown.clone()));

        settle().await;
        assert!(core.catalog().current().is_empty());
        assert_eq!(core.autostart().state(), AutoStartState::Idle);

        provisioned.fail(false);
        tokio::time::sleep(CATALOG_RETRY + Duration::from_secs(2)).await;

        assert!(core.catalog().is_complete());
        assert_eq!(core.catalog().current().len(), 1);
        assert_eq!(supervisor.started_keys(), vec![SessionKey::provisioned(7)]);
        assert_eq!(core.autostart().state(), AutoStartState::Done);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_catalog_is_accepted_after_patience() {
        let preferences = Preferences::in_memory();
        preferences
            .set_auto_start_list(&[AutoStartEntry::from(SessionKey::custom(1))])
            .unwrap();

        let provisioned = Arc::new(StaticSource::new(vec![web(7, "site", "a.example.com")]));
        provisioned.fail(true);
        let supervisor = Arc::new(FakeSupervisor::new());
        let core = LauncherCore::new(
            supervisor.clone(),
            provisioned.clone(),
            Arc::new(StaticSource::new(vec![custom(1, "nas")])),
            preferences,
            Arc::new(RecordingNotifier::new()),
            None,
        );
        let (_events, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&core).run(rx, shutdown.clone()));

        // Custom sessions are known, but the catalog is still being retried
        settle().await;
        assert_eq!(core.catalog().current().len(), 1);
        assert_eq!(core.autostart().state(), AutoStartState::Idle);

        // Third load at 5s + 10s, then the auto-start delay
        tokio::time::sleep(CATALOG_RETRY * 3 + Duration::from_secs(2)).await;
        assert_eq!(supervisor.started_keys(), vec![SessionKey::custom(1)]);
        assert_eq!(core.autostart().state(), AutoStartState::Done);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_twice_is_rejected() {
        let (core, _supervisor, _notifier) = core(Preferences::in_memory());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let (_tx, rx) = mpsc::channel(1);
        Arc::clone(&core).run(rx, shutdown.clone()).await.unwrap();

        let (_tx, rx) = mpsc::channel(1);
        let err = Arc::clone(&core).run(rx, shutdown).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
