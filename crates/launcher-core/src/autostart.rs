// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! One-shot auto-start of flagged sessions

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tunnel_launcher_common::{Preferences, Result, Session, SessionKey, SessionKind};

use crate::reconciler::RunningSet;

/// Wait before the first start so the initial status pass can settle
pub const INITIAL_DELAY: Duration = Duration::from_millis(1000);
/// Gap between consecutive starts
pub const START_GAP: Duration = Duration::from_millis(500);

/// The generic on/off action a user triggers for a session
#[async_trait]
pub trait SessionToggle: Send + Sync {
    async fn set_enabled(&self, session: &Session, enabled: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStartState {
    Idle,
    Running,
    Done,
}

pub struct AutoStartOrchestrator {
    preferences: Preferences,
    state: Mutex<AutoStartState>,
    initial_delay: Duration,
    start_gap: Duration,
}

impl AutoStartOrchestrator {
    pub fn new(preferences: Preferences) -> Self {
        Self::with_timing(preferences, INITIAL_DELAY, START_GAP)
    }

    pub fn with_timing(preferences: Preferences, initial_delay: Duration, start_gap: Duration) -> Self {
        Self {
            preferences,
            state: Mutex::new(AutoStartState::Idle),
            initial_delay,
            start_gap,
        }
    }

    pub fn state(&self) -> AutoStartState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: AutoStartState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Move from `Idle` to `Running`; false if auto-start already ran
    fn begin(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != AutoStartState::Idle {
            return false;
        }
        *state = AutoStartState::Running;
        true
    }

    /// Start every flagged session that is not running yet
    ///
    /// Does nothing while the catalog is empty. Otherwise runs at most once
    /// per orchestrator and returns the number of sessions it switched on.
    pub async fn run(
        &self,
        catalog: &[Session],
        running: &watch::Receiver<RunningSet>,
        has_token: bool,
        toggle: &dyn SessionToggle,
    ) -> usize {
        if catalog.is_empty() || !self.begin() {
            return 0;
        }

        let started = self.start_flagged(catalog, running, has_token, toggle).await;
        self.set_state(AutoStartState::Done);
        started
    }

    async fn start_flagged(
        &self,
        catalog: &[Session],
        running: &watch::Receiver<RunningSet>,
        has_token: bool,
        toggle: &dyn SessionToggle,
    ) -> usize {
        let entries = self.preferences.auto_start_list();
        if entries.is_empty() {
            debug!("No sessions flagged for auto-start");
            return 0;
        }

        if !has_token && entries.iter().any(|e| e.kind == SessionKind::Provisioned) {
            warn!("Skipping auto-start: provisioned sessions need an account token");
            return 0;
        }

        let flagged: HashSet<SessionKey> = entries.iter().map(|e| e.key()).collect();

        sleep(self.initial_delay).await;

        let mut started = 0;
        for session in catalog.iter().filter(|s| flagged.contains(&s.key())) {
            let key = session.key();
            if running.borrow().contains(&key) {
                debug!("Auto-start: {} already running", key);
                continue;
            }

            info!("Auto-starting {} ({})", key, session.name());
            match toggle.set_enabled(session, true).await {
                Ok(()) => started += 1,
                Err(e) => warn!("Auto-start of {} failed: {}", key, e),
            }
            sleep(self.start_gap).await;
        }

        info!("Auto-start finished, {} sessions started", started);
        started
    }
}
