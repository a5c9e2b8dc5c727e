// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Notification sinks for the CLI

use std::io::Write;
use std::sync::Mutex;

use colored::Colorize;
use notify_rust::{Notification, Timeout};
use tracing::warn;
use tunnel_launcher_core::{Cue, Notifier, Toast, ToastLevel};

fn icon(level: ToastLevel) -> &'static str {
    match level {
        ToastLevel::Info => "dialog-information",
        ToastLevel::Success => "network-transmit-receive",
        ToastLevel::Error => "dialog-error",
    }
}

fn timeout(level: ToastLevel) -> Timeout {
    match level {
        ToastLevel::Error => Timeout::Milliseconds(10000),
        _ => Timeout::Milliseconds(3000),
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn attach_sound(notification: &mut Notification, cue: Cue) {
    let sound = match cue {
        Cue::Success => "complete",
        Cue::Failure => "dialog-warning",
    };
    notification.hint(notify_rust::Hint::SoundName(sound.to_string()));
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn attach_sound(notification: &mut Notification, _cue: Cue) {
    notification.sound_name("default");
}

/// Desktop notifications through the session notification daemon
///
/// A cue is attached as the sound of the next toast.
#[derive(Default)]
pub struct DesktopNotifier {
    pending_cue: Mutex<Option<Cue>>,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_cue(&self) -> Option<Cue> {
        self.pending_cue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Notifier for DesktopNotifier {
    fn play_cue(&self, cue: Cue) {
        *self
            .pending_cue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(cue);
    }

    fn toast(&self, toast: Toast) {
        let mut notification = Notification::new();
        notification
            .summary(&toast.title)
            .body(&toast.body)
            .icon(icon(toast.level))
            .timeout(timeout(toast.level));

        if let Some(cue) = self.take_cue() {
            attach_sound(&mut notification, cue);
        }

        if let Err(e) = notification.show() {
            warn!("Failed to show notification: {}", e);
        }
    }
}

/// Colored terminal output; cues ring the terminal bell
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn play_cue(&self, _cue: Cue) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }

    fn toast(&self, toast: Toast) {
        let line = format!("{}: {}", toast.title, toast.body);
        match toast.level {
            ToastLevel::Info => eprintln!("{}", line.cyan()),
            ToastLevel::Success => eprintln!("{}", format!("✓ {}", line).green().bold()),
            ToastLevel::Error => eprintln!("{}", format!("✗ {}", line).red().bold()),
        }
    }
}
