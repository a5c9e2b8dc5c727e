// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Launcher Contributors

// Terminal rendering for sessions and log lines

use colored::{ColoredString, Colorize};
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use tunnel_launcher_common::{format_host_port, Session, SessionKey};
use tunnel_launcher_core::notifications::READY_MARKER;
use tunnel_launcher_core::LogSnapshot;

/// Address users connect to, if it can be derived
pub fn session_address(session: &Session) -> Option<String> {
    match session {
        Session::Provisioned(s) => s.access_link(),
        Session::Custom(s) => match (&s.domain, s.protocol) {
            (Some(domain), Some(protocol)) if protocol.is_web() => {
                Some(format!("{}://{}", protocol, domain))
            }
            _ => match (&s.server_addr, s.remote_port) {
                (Some(server), Some(port)) => Some(format_host_port(server, port)),
                _ => None,
            },
        },
    }
}

/// One session with its state, as printed by `list --json`
#[derive(Debug, Serialize)]
pub struct SessionRow<'a> {
    pub key: String,
    pub running: bool,
    pub auto_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub session: &'a Session,
}

impl<'a> SessionRow<'a> {
    pub fn new(session: &'a Session, running: bool, auto_start: bool) -> Self {
        Self {
            key: session.key().to_string(),
            running,
            auto_start,
            address: session_address(session),
            session,
        }
    }
}

fn header(text: &str) -> Cell {
    Cell::new(text).add_attribute(Attribute::Bold).fg(Color::Cyan)
}

pub fn print_sessions_table(rows: &[SessionRow<'_>]) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        header("Key"),
        header("Name"),
        header("Type"),
        header("Address"),
        header("Status"),
        header("Auto-start"),
    ]);

    for row in rows {
        let protocol = row
            .session
            .protocol()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = if row.running {
            Cell::new("running").fg(Color::Green)
        } else {
            Cell::new("stopped").fg(Color::DarkGrey)
        };

        table.add_row(vec![
            Cell::new(&row.key),
            Cell::new(row.session.name()).fg(Color::Green),
            Cell::new(protocol),
            Cell::new(row.address.as_deref().unwrap_or("-")),
            status,
            Cell::new(if row.auto_start { "yes" } else { "-" }),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!("{} session(s) found", rows.len().to_string().cyan());
    println!();
}

/// Prints buffer entries once, optionally for one session only
pub struct LogPrinter {
    cursor: u64,
    filter: Option<SessionKey>,
}

impl LogPrinter {
    pub fn new(filter: Option<SessionKey>) -> Self {
        Self { cursor: 0, filter }
    }

    /// Lines of `snapshot` not printed yet
    pub fn pending(&mut self, snapshot: &LogSnapshot) -> Vec<String> {
        let start = snapshot.partition_point(|entry| entry.seq <= self.cursor);
        let mut lines = Vec::new();
        for entry in &snapshot[start..] {
            self.cursor = entry.seq;
            let key = entry.line.key();
            if self.filter.is_some_and(|filter| filter != key) {
                continue;
            }
            lines.push(format!(
                "{} [{}] {}",
                entry.line.timestamp, key, entry.line.message
            ));
        }
        lines
    }

    pub fn print(&mut self, snapshot: &LogSnapshot) {
        for line in self.pending(snapshot) {
            println!("{}", colorize(&line));
        }
    }
}

fn colorize(line: &str) -> ColoredString {
    if line.contains("[E]") || line.contains("[ERR]") {
        line.red()
    } else if line.contains("[W]") {
        line.yellow()
    } else if line.contains(READY_MARKER) {
        line.green().bold()
    } else {
        line.normal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_launcher_common::{CustomSession, LogLine, Protocol};
    use tunnel_launcher_core::LogBuffer;

    fn custom(domain: Option<&str>, protocol: Protocol) -> Session {
        Session::Custom(CustomSession {
            id: 1,
            name: "nas".to_string(),
            config: "[common]".to_string(),
            server_addr: Some("relay.example.org".to_string()),
            protocol: Some(protocol),
            local_port: Some(5000),
            remote_port: Some(25000),
            domain: domain.map(str::to_string),
        })
    }

    #[test]
    fn test_custom_session_address() {
        assert_eq!(
            session_address(&custom(None, Protocol::Tcp)).as_deref(),
            Some("relay.example.org:25000")
        );
        assert_eq!(
            session_address(&custom(Some("nas.example.com"), Protocol::Https)).as_deref(),
            Some("https://nas.example.com")
        );
    }

    #[test]
    fn test_log_printer_filters_and_advances() {
        let buffer = LogBuffer::new();
        buffer.append(LogLine::now(SessionKey::provisioned(7), "a"));
        buffer.append(LogLine::now(SessionKey::custom(7), "b"));

        let mut printer = LogPrinter::new(Some(SessionKey::custom(7)));
        let lines = printer.pending(&buffer.snapshot());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[custom_7] b"));
        assert!(printer.pending(&buffer.snapshot()).is_empty());

        buffer.append(LogLine::now(SessionKey::custom(7), "c"));
        assert_eq!(printer.pending(&buffer.snapshot()).len(), 1);
    }

    #[test]
    fn test_session_row_json() {
        let session = custom(None, Protocol::Udp);
        let row = SessionRow::new(&session, true, false);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["key"], "custom_1");
        assert_eq!(json["running"], true);
        assert_eq!(json["session"]["kind"], "custom");
    }
}
