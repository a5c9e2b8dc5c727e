// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

//! Secret redaction for proxy client output
//!
//! The proxy client echoes its login parameters in some log lines, which
//! would leak the account token into the log view.

const MASK: &str = "***";

/// Remove every configured secret from a log message
pub fn sanitize_log(message: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|secret| !secret.is_empty())
        .fold(message.to_string(), |acc, secret| redact_token(&acc, secret))
}

fn redact_token(message: &str, token: &str) -> String {
    let mut result = message
        .replace(&format!("{}.", token), "")
        .replace(&format!("{}-", token), "")
        .replace(token, "");

    // Tokens of the form `<user>.<secret>` are sometimes logged in halves
    if let Some((first, second)) = token.split_once('.') {
        if first.len() >= 6 {
            result = result.replace(first, MASK);
        }
        if second.len() >= 6 {
            result = result.replace(second, MASK);
        }
    }

    // Truncated echoes: mask the longest leaked prefix first
    if token.len() >= 10 {
        for len in (8..=token.len()).rev() {
            if let Some(prefix) = token.get(..len) {
                if result.contains(prefix) {
                    result = result.replace(prefix, MASK);
                }
            }
        }
    }

    result
}
