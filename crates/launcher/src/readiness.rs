//! Port discovery: scan the engine's stdout for the line announcing its port.
//!
//! The engine binds an OS-assigned port and prints
//! `... Server port number at ..., <port>` once it is listening. That line is
//! the only readiness signal, so discovery reads output in order until it
//! shows up or the stream ends.

use crate::error::{LaunchError, Result};
use genie_protocol::PORT_SENTINEL;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub(crate) const ENGINE_LOG_TARGET: &str = "genie::engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// No announcement yet; the stream is still open.
    #[default]
    Waiting,
    Ready(u16),
    /// Stream ended without an announcement.
    Closed,
}

/// Line-fed readiness state machine. Once `Ready` or `Closed` it stays put.
#[derive(Debug, Default)]
pub struct PortScanner {
    state: Readiness,
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Readiness {
        self.state
    }

    pub fn observe(&mut self, line: &str) -> Result<Readiness> {
        if self.state == Readiness::Waiting {
            if let Some(port) = parse_port_announcement(line)? {
                self.state = Readiness::Ready(port);
            }
        }
        Ok(self.state)
    }

    pub fn close(&mut self) -> Readiness {
        if self.state == Readiness::Waiting {
            self.state = Readiness::Closed;
        }
        self.state
    }
}

/// `Ok(None)` for ordinary lines; the port is the last comma-separated token.
pub fn parse_port_announcement(line: &str) -> Result<Option<u16>> {
    if !line.contains(PORT_SENTINEL) {
        return Ok(None);
    }
    let token = line.rsplit(',').next().unwrap_or(line).trim();
    token
        .parse::<u16>()
        .map(Some)
        .map_err(|_| LaunchError::MalformedAnnouncement(line.to_string()))
}

/// Read `reader` line by line until the port announcement.
///
/// Returns `Ok(None)` when the stream ends first. With `timeout = None` the
/// wait is unbounded.
pub async fn discover_port<R>(reader: &mut R, timeout: Option<Duration>) -> Result<Option<u16>>
where
    R: AsyncBufRead + Unpin,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, scan(reader))
            .await
            .map_err(|_| LaunchError::ReadinessTimeout(limit))?,
        None => scan(reader).await,
    }
}

async fn scan<R>(reader: &mut R) -> Result<Option<u16>>
where
    R: AsyncBufRead + Unpin,
{
    let mut scanner = PortScanner::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            scanner.close();
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\r', '\n']);
        log::debug!(target: ENGINE_LOG_TARGET, "{line}");
        if let Readiness::Ready(port) = scanner.observe(line)? {
            return Ok(Some(port));
        }
    }
}
