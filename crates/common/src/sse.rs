// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Server-Sent Events listener for supervisor events
//!
//! Delivers proxy client log lines and auto-restart notices as they happen.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::supervisor_client::{add_auth_header, create_event_stream_client, SupervisorClientConfig};
use crate::types::{LogLine, SessionKey};

/// Event from the supervisor SSE stream
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// One line of proxy client output
    Log(LogLine),
    /// The supervisor restarted a crashed process
    AutoRestarted {
        session: SessionKey,
        timestamp: String,
    },
    Heartbeat,
}

/// First reconnect delay, doubled after each attempt that received nothing
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(30);

/// Event listener for the supervisor SSE stream
pub struct EventListener {
    config: SupervisorClientConfig,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl EventListener {
    pub fn new(config: SupervisorClientConfig) -> Self {
        Self {
            config,
            initial_backoff: RECONNECT_DELAY,
            max_backoff: RECONNECT_DELAY_MAX,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Start listening to supervisor events
    ///
    /// Returns a channel receiver that yields events. Reconnects with
    /// exponential backoff if the stream drops; stops once the receiver is
    /// dropped.
    pub fn listen(&self) -> mpsc::Receiver<SupervisorEvent> {
        let (tx, rx) = mpsc::channel(256);

        let config = self.config.clone();
        let (initial_backoff, max_backoff) = (self.initial_backoff, self.max_backoff);
        tokio::spawn(async move {
            let mut backoff = initial_backoff;

            loop {
                let mut received = false;
                if let Err(e) = Self::stream_events(&config, &tx, &mut received).await {
                    tracing::warn!("Supervisor event stream error: {:#}", e);
                }

                if tx.is_closed() {
                    break;
                }

                // Any connection that delivered events resets the backoff
                if received {
                    backoff = initial_backoff;
                }
                sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        });

        rx
    }

    /// Forward events until the stream ends; `received` records whether any arrived
    async fn stream_events(
        config: &SupervisorClientConfig,
        tx: &mpsc::Sender<SupervisorEvent>,
        received: &mut bool,
    ) -> Result<()> {
        let url = format!("{}/api/events", config.base_url());
        let client = create_event_stream_client(config)?;

        let response = add_auth_header(client.get(&url), config)
            .send()
            .await
            .context("Failed to connect to event stream")?;

        if !response.status().is_success() {
            anyhow::bail!("Event stream request failed: {}", response.status());
        }

        tracing::info!("Connected to supervisor event stream");

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.context("Error reading event stream")?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find("\n\n") {
                let message: String = buffer.drain(..pos + 2).collect();

                if let Some(event) = parse_sse_message(&message) {
                    *received = true;
                    if tx.send(event).await.is_err() {
                        tracing::debug!("Receiver dropped, stopping event listener");
                        return Ok(());
                    }
                }
            }
        }

        tracing::info!("Supervisor event stream ended");
        Ok(())
    }
}

/// Parse one SSE message (`data: {json}` lines) into an event
pub fn parse_sse_message(message: &str) -> Option<SupervisorEvent> {
    for line in message.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }

        match serde_json::from_str::<SupervisorEvent>(data) {
            Ok(event) => return Some(event),
            Err(e) => {
                tracing::warn!("Failed to parse SSE event: {} (error: {})", data, e);
            }
        }
    }
    None
}
