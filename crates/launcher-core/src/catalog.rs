// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Unified session catalog
//!
//! Merges provisioned and custom sessions into one ordered list:
//! provisioned first, then custom, each in source order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tunnel_launcher_common::{CustomSession, Session, SessionKey, SessionSource};

use crate::session_cache::SessionCache;

/// Immutable view of the catalog
pub type Catalog = Arc<Vec<Session>>;

pub type CustomSource = Arc<dyn SessionSource<Item = CustomSession>>;

pub struct SessionCatalog {
    cache: Arc<SessionCache>,
    custom: CustomSource,
    current: watch::Sender<Catalog>,
    loading: AtomicBool,
    complete: AtomicBool,
}

impl SessionCatalog {
    pub fn new(cache: Arc<SessionCache>, custom: CustomSource) -> Self {
        let (current, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            cache,
            custom,
            current,
            loading: AtomicBool::new(false),
            complete: AtomicBool::new(false),
        }
    }

    /// Fetch both sources concurrently and publish the merged catalog
    ///
    /// A failing source contributes an empty list; the other source is
    /// unaffected.
    pub async fn load(&self) -> Catalog {
        self.loading.store(true, Ordering::SeqCst);

        let (provisioned, custom) =
            tokio::join!(self.cache.source().fetch(), self.custom.fetch());

        let complete = provisioned.is_ok() && custom.is_ok();
        let provisioned = match provisioned {
            Ok(sessions) => {
                self.cache.store(&sessions);
                sessions
            }
            Err(e) => {
                warn!("Provisioned sessions unavailable: {:#}", e);
                Vec::new()
            }
        };
        let custom = custom.unwrap_or_else(|e| {
            warn!("Custom sessions unavailable: {:#}", e);
            Vec::new()
        });

        let sessions: Vec<Session> = provisioned
            .into_iter()
            .map(Session::Provisioned)
            .chain(custom.into_iter().map(Session::Custom))
            .collect();
        info!("Catalog loaded with {} sessions", sessions.len());

        // Flags are final before watchers see the new catalog
        self.complete.store(complete, Ordering::SeqCst);
        self.loading.store(false, Ordering::SeqCst);
        let catalog = Arc::new(sessions);
        self.current.send_replace(Arc::clone(&catalog));
        catalog
    }

    /// Latest loaded catalog
    pub fn current(&self) -> Catalog {
        self.current.borrow().clone()
    }

    /// Receiver that always holds the latest catalog
    pub fn watch(&self) -> watch::Receiver<Catalog> {
        self.current.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Whether the latest load got answers from both sources
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn find(&self, key: SessionKey) -> Option<Session> {
        self.current.borrow().iter().find(|s| s.key() == key).cloned()
    }
}
