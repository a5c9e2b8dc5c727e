// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Error types for Tunnel Launcher

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The supervisor rejected a start request
    #[error("Failed to start session: {0}")]
    Start(String),

    /// The supervisor rejected a stop request
    #[error("Failed to stop session: {0}")]
    Stop(String),

    /// Transport-level failure talking to the supervisor
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
