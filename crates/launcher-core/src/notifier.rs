// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! User-facing feedback sink
//!
//! Frontends implement [`Notifier`] to turn launcher events into sounds and
//! toasts. Calls are fire-and-forget and must not block for long.

/// Audible cue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// Short visual notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub body: String,
}

impl Toast {
    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Success,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Error,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Framework-agnostic notification sink
pub trait Notifier: Send + Sync {
    /// Play a short sound; implementations may ignore it
    fn play_cue(&self, cue: Cue);

    /// Show a toast
    fn toast(&self, toast: Toast);
}
