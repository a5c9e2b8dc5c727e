// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Running-state reconciliation
//!
//! Recomputes the set of running sessions by asking the supervisor about
//! every catalog entry. Each query is bounded by a timeout that counts as
//! "not running"; the result replaces the previous set wholesale.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunnel_launcher_common::{Session, SessionKey};

use crate::catalog::Catalog;
use crate::controller::ProcessController;

pub const POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Sessions observed running by the latest pass
pub type RunningSet = Arc<HashSet<SessionKey>>;

pub struct StatusReconciler {
    controller: ProcessController,
    running: watch::Sender<RunningSet>,
    poll_interval: Duration,
    query_timeout: Duration,
}

impl StatusReconciler {
    pub fn new(controller: ProcessController) -> Self {
        Self::with_timing(controller, POLL_INTERVAL, QUERY_TIMEOUT)
    }

    pub fn with_timing(
        controller: ProcessController,
        poll_interval: Duration,
        query_timeout: Duration,
    ) -> Self {
        let (running, _) = watch::channel(Arc::new(HashSet::new()));
        Self {
            controller,
            running,
            poll_interval,
            query_timeout,
        }
    }

    /// Latest running set
    pub fn running(&self) -> RunningSet {
        self.running.borrow().clone()
    }

    pub fn is_running(&self, key: SessionKey) -> bool {
        self.running.borrow().contains(&key)
    }

    pub fn watch(&self) -> watch::Receiver<RunningSet> {
        self.running.subscribe()
    }

    /// Query every session concurrently and publish the result
    ///
    /// Queries that outlive the timeout count as not running, so a pass
    /// never takes much longer than one timeout.
    pub async fn reconcile(&self, sessions: &[Session]) -> RunningSet {
        let checks = sessions.iter().map(|session| {
            let key = session.key();
            async move {
                let running = timeout(self.query_timeout, self.controller.is_running(key))
                    .await
                    .unwrap_or_else(|_| {
                        debug!("Status query for {} timed out", key);
                        false
                    });
                (key, running)
            }
        });

        let running: HashSet<SessionKey> = join_all(checks)
            .await
            .into_iter()
            .filter_map(|(key, running)| running.then_some(key))
            .collect();

        let running = Arc::new(running);
        self.running.send_replace(Arc::clone(&running));
        running
    }

    /// Drive periodic and restart-triggered passes until shutdown
    ///
    /// The two drivers run independently; when their passes overlap the
    /// one that finishes last determines the published set.
    pub async fn run(
        self: Arc<Self>,
        catalog: watch::Receiver<Catalog>,
        restarts: mpsc::Receiver<SessionKey>,
        shutdown: CancellationToken,
    ) {
        tokio::join!(
            Arc::clone(&self).poll_loop(catalog.clone(), shutdown.clone()),
            self.restart_loop(catalog, restarts, shutdown),
        );
        debug!("Status reconciler stopped");
    }

    async fn poll_loop(self: Arc<Self>, mut catalog: watch::Receiver<Catalog>, shutdown: CancellationToken) {
        // Passes start on a fixed period; a slow pass delays the next tick
        let mut ticker = interval(self.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let sessions = catalog.borrow_and_update().clone();

            // Nothing to poll until the catalog has entries
            if sessions.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = catalog.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        ticker.reset_immediately();
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.reconcile(&sessions) => {}
            }
        }
    }

    async fn restart_loop(
        self: Arc<Self>,
        catalog: watch::Receiver<Catalog>,
        mut restarts: mpsc::Receiver<SessionKey>,
        shutdown: CancellationToken,
    ) {
        loop {
            let key = tokio::select! {
                _ = shutdown.cancelled() => return,
                key = restarts.recv() => match key {
                    Some(key) => key,
                    None => return,
                },
            };

            info!("Session {} was restarted by the supervisor, refreshing status", key);
            let sessions = catalog.borrow().clone();
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.reconcile(&sessions) => {}
            }
        }
    }
}
