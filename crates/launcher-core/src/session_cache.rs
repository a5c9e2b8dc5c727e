// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Short-lived cache of provisioned session metadata
//!
//! Used to look up names and access links when a log line arrives without
//! hitting the account API for every line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use tunnel_launcher_common::{ProvisionedSession, SessionSource};

/// How long a fetched list is considered fresh
pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// Minimum wait before retrying after a failed refresh
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

pub type ProvisionedSource = Arc<dyn SessionSource<Item = ProvisionedSession>>;

#[derive(Default)]
struct CacheState {
    valid_until: Option<Instant>,
    data: HashMap<u64, ProvisionedSession>,
}

pub struct SessionCache {
    ttl: Duration,
    source: ProvisionedSource,
    state: Mutex<CacheState>,
}

impl SessionCache {
    pub fn new(source: ProvisionedSource) -> Self {
        Self::with_ttl(source, CACHE_TTL)
    }

    pub fn with_ttl(source: ProvisionedSource, ttl: Duration) -> Self {
        Self {
            ttl,
            source,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Every update replaces whole fields
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The source the cache refreshes from
    pub fn source(&self) -> &ProvisionedSource {
        &self.source
    }

    /// Replace the cached list with a freshly fetched one
    pub fn store(&self, sessions: &[ProvisionedSession]) {
        let data = sessions.iter().map(|s| (s.id, s.clone())).collect();
        let mut state = self.lock();
        state.data = data;
        state.valid_until = Some(Instant::now() + self.ttl);
    }

    pub fn is_fresh(&self) -> bool {
        self.lock()
            .valid_until
            .is_some_and(|until| Instant::now() < until)
    }

    fn lookup(&self, id: u64) -> Option<ProvisionedSession> {
        self.lock().data.get(&id).cloned()
    }

    /// Look up a session, refreshing from the source when stale
    ///
    /// A failed refresh keeps serving the previous contents and is not
    /// retried for [`RETRY_DELAY`].
    pub async fn get(&self, id: u64) -> Option<ProvisionedSession> {
        if !self.is_fresh() {
            match self.source.fetch().await {
                Ok(sessions) => self.store(&sessions),
                Err(e) => {
                    debug!("Session cache refresh failed: {:#}", e);
                    self.lock().valid_until = Some(Instant::now() + RETRY_DELAY.min(self.ttl));
                }
            }
        }
        self.lookup(id)
    }
}
