// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Tunnel Launcher - Core
//!
//! Session lifecycle coordination: log buffering, catalog loading, running
//! state reconciliation, log-driven notifications and auto-start.

pub mod autostart;
pub mod catalog;
pub mod controller;
pub mod coordinator;
pub mod log_buffer;
pub mod notifications;
pub mod notifier;
pub mod reconciler;
pub mod session_cache;

#[cfg(test)]
pub(crate) mod testing;

pub use autostart::{AutoStartOrchestrator, AutoStartState, SessionToggle};
pub use catalog::{Catalog, CustomSource, SessionCatalog};
pub use controller::ProcessController;
pub use coordinator::LauncherCore;
pub use log_buffer::{LogBuffer, LogEntry, LogSnapshot, LogSubscription, LOG_CAPACITY};
pub use notifications::{classify, default_rules, LogEvent, LogRule, NotificationEngine};
pub use notifier::{Cue, Notifier, Toast, ToastLevel};
pub use reconciler::{RunningSet, StatusReconciler};
pub use session_cache::{ProvisionedSource, SessionCache};
