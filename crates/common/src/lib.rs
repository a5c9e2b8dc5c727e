// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Tunnel Launcher - Common Library
// Shared types, configuration, supervisor IPC and catalog sources

pub mod config;
pub mod error;
pub mod launch;
pub mod network;
pub mod preferences;
pub mod sanitize;
pub mod sources;
pub mod sse;
pub mod supervisor;
pub mod supervisor_client;
pub mod types;

pub use config::{AccountConfig, LauncherConfig, PathsConfig};
pub use error::{Error, Result};
pub use launch::{LaunchPreferences, LaunchRequest, LaunchSpec, MappingSpec, ProxyGateway};
pub use network::{format_host_port, is_loopback_address};
pub use preferences::{
    AutoStartEntry, FilePreferenceStore, MemoryPreferenceStore, PreferenceStore, Preferences,
};
pub use sanitize::sanitize_log;
pub use sources::{ApiSessionSource, CustomSessionStore, SessionSource};
pub use sse::{EventListener, SupervisorEvent};
pub use supervisor::ProcessSupervisor;
pub use supervisor_client::{ConnectionMode, HttpSupervisor, SupervisorClientConfig};
pub use types::{
    local_timestamp, CustomSession, LogLine, Protocol, ProvisionedSession, Session, SessionKey,
    SessionKind,
};
