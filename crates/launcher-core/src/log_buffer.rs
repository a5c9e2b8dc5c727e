// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Bounded log store with snapshot fan-out
//!
//! Subscribers watch the latest immutable snapshot of the whole buffer.
//! A slow subscriber skips intermediate snapshots instead of queueing them;
//! entry sequence numbers let it tell which lines it has not seen yet.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tunnel_launcher_common::LogLine;

/// Maximum number of lines kept
pub const LOG_CAPACITY: usize = 5000;

/// A stored line with its position in the append sequence
///
/// Sequence numbers grow monotonically for the lifetime of the buffer and
/// survive eviction and `clear`, so they can be used as a read cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub line: LogLine,
}

/// Immutable copy of the buffer contents
pub type LogSnapshot = Arc<Vec<LogEntry>>;

struct Inner {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

impl Inner {
    fn snapshot(&self) -> LogSnapshot {
        Arc::new(self.entries.iter().cloned().collect())
    }
}

/// Process-wide log store, shared as `Arc<LogBuffer>`
pub struct LogBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    snapshots: watch::Sender<LogSnapshot>,
}

impl LogBuffer {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (snapshots, _) = watch::channel(LogSnapshot::default());
        Arc::new(Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                next_seq: 1,
            }),
            snapshots,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing inside the lock can leave the buffer half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Called with the lock held so published snapshots follow mutation order
    fn publish(&self, inner: &Inner) {
        if self.snapshots.receiver_count() > 0 {
            self.snapshots.send_replace(inner.snapshot());
        }
    }

    /// Append a line, evicting the oldest entries beyond capacity
    ///
    /// Returns the sequence number assigned to the line.
    pub fn append(&self, line: LogLine) -> u64 {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(LogEntry { seq, line });

        let excess = inner.entries.len().saturating_sub(self.capacity);
        inner.entries.drain(..excess);

        self.publish(&inner);
        seq
    }

    /// Register a subscriber
    ///
    /// The first `recv` always yields the state at subscription time.
    pub fn subscribe(&self) -> LogSubscription {
        let inner = self.lock();
        self.snapshots.send_replace(inner.snapshot());
        let mut rx = self.snapshots.subscribe();
        rx.mark_changed();
        LogSubscription { rx }
    }

    /// Drop every line and publish an empty snapshot
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        self.publish(&inner);
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshots.receiver_count()
    }
}

/// Receiving end of a [`LogBuffer`] subscription
///
/// Holds at most one unread snapshot, the newest. Dropping it detaches from
/// the buffer.
pub struct LogSubscription {
    rx: watch::Receiver<LogSnapshot>,
}

impl LogSubscription {
    /// Wait for the next snapshot; `None` once the buffer is gone
    pub async fn recv(&mut self) -> Option<LogSnapshot> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }

    /// Newest unread snapshot without waiting
    pub fn try_recv(&mut self) -> Option<LogSnapshot> {
        if self.rx.has_changed().unwrap_or(false) {
            Some(Arc::clone(&self.rx.borrow_and_update()))
        } else {
            None
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}
