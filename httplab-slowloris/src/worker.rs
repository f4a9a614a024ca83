//! One simulated slow connection.
//!
//! A worker dials, sends the request line, and then on every tick waits
//! `delay`, peeks at the socket, and sends one more header line if the peer
//! has not reacted. The header section is never terminated. When a
//! connection ends the worker redials, until the run's stop signal fires.

use httplab_common::{LabError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SlowConfig;
use crate::drip::HeaderDrip;
use crate::stats::SlowStats;

/// How one held connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The peer reset or closed the connection: a defensive timeout fired.
    PeerClosed,
    /// The peer sent bytes back before the header was complete.
    PeerResponded,
    /// Ended from this side: the line limit was reached or a write stalled.
    GaveUp,
    /// The run's stop signal fired.
    Cancelled,
}

/// What a peek at the socket revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerReaction {
    /// Nothing to read within the peek deadline.
    Silent,
    /// EOF or a hard error.
    Closed,
    /// At least one byte is waiting.
    Responded,
}

/// Peek one byte with a deadline of `within`, without consuming it.
pub async fn peek_peer(stream: &TcpStream, within: Duration) -> PeerReaction {
    let mut byte = [0u8; 1];
    match tokio::time::timeout(within, stream.peek(&mut byte)).await {
        Err(_) => PeerReaction::Silent,
        Ok(Ok(0)) => PeerReaction::Closed,
        Ok(Ok(_)) => PeerReaction::Responded,
        Ok(Err(e)) if LabError::from_io(&e).is_timeout() => PeerReaction::Silent,
        Ok(Err(_)) => PeerReaction::Closed,
    }
}

pub struct SlowConnectionWorker {
    id: usize,
    target: SocketAddr,
    config: Arc<SlowConfig>,
    stats: Arc<SlowStats>,
    token: CancellationToken,
}

impl SlowConnectionWorker {
    pub fn new(
        id: usize,
        target: SocketAddr,
        config: Arc<SlowConfig>,
        stats: Arc<SlowStats>,
        token: CancellationToken,
    ) -> Self {
        Self { id, target, config, stats, token }
    }

    /// Sleep for `d` unless the stop signal fires first. Returns false when
    /// stopped.
    async fn pause(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    /// Open one TCP connection to the target within the dial timeout.
    pub async fn dial(&self) -> Result<TcpStream> {
        self.stats.record_attempt();
        let connect = TcpStream::connect(self.target);
        match tokio::time::timeout(self.config.dial_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(LabError::DialFailure(e.to_string())),
            Err(_) => Err(LabError::DialFailure(format!(
                "no answer within {:?}",
                self.config.dial_timeout
            ))),
        }
    }

    /// Dial, hold, redial until stopped. Dial failures back off for `delay`.
    pub async fn run(self) {
        while !self.token.is_cancelled() {
            let dialed = tokio::select! {
                _ = self.token.cancelled() => return,
                dialed = self.dial() => dialed,
            };
            let stream = match dialed {
                Ok(stream) => stream,
                Err(e) => {
                    self.stats.record_dial_error();
                    debug!(worker = self.id, error = %e, "connection failed");
                    if !self.pause(self.config.delay).await {
                        return;
                    }
                    continue;
                }
            };

            if let Ok(local) = stream.local_addr() {
                debug!(worker = self.id, local = %local, "connected");
            }
            if self.hold(stream).await == ConnectionEnd::Cancelled {
                return;
            }
            if !self.pause(self.config.reconnect_delay).await {
                return;
            }
        }
    }

    /// Drip header lines into `stream` until it ends, counting it as active
    /// meanwhile and recording how it ended.
    pub async fn hold(&self, stream: TcpStream) -> ConnectionEnd {
        let _active = self.stats.connected();
        let end = self.drip(stream).await;
        match end {
            ConnectionEnd::PeerClosed => {
                self.stats.record_peer_closed();
                debug!(worker = self.id, "connection closed by peer");
            }
            ConnectionEnd::PeerResponded | ConnectionEnd::GaveUp => {
                self.stats.record_self_stopped()
            }
            ConnectionEnd::Cancelled => {}
        }
        end
    }

    async fn drip(&self, mut stream: TcpStream) -> ConnectionEnd {
        let mut lines = HeaderDrip::new(self.id, self.config.target.as_str());
        loop {
            if lines.emitted() > 0 {
                if !self.pause(self.config.delay).await {
                    return ConnectionEnd::Cancelled;
                }
                match peek_peer(&stream, self.config.peek_timeout).await {
                    PeerReaction::Silent => {}
                    PeerReaction::Closed => return ConnectionEnd::PeerClosed,
                    PeerReaction::Responded => {
                        debug!(
                            worker = self.id,
                            lines = lines.emitted(),
                            "peer responded unexpectedly"
                        );
                        return ConnectionEnd::PeerResponded;
                    }
                }
            }
            if self.token.is_cancelled() {
                return ConnectionEnd::Cancelled;
            }

            let line = lines.next_line();
            let write = stream.write_all(line.as_bytes());
            match tokio::time::timeout(self.config.write_timeout, write).await {
                Ok(Ok(())) => self.stats.record_fragment(),
                Ok(Err(e)) => {
                    debug!(worker = self.id, error = %LabError::from_io(&e), "write failed");
                    return ConnectionEnd::PeerClosed;
                }
                Err(_) => {
                    debug!(worker = self.id, timeout = ?self.config.write_timeout, "write stalled");
                    return ConnectionEnd::GaveUp;
                }
            }

            if !self.config.keep_open && lines.custom_emitted() >= self.config.max_headers {
                debug!(worker = self.id, lines = lines.emitted(), "header limit reached");
                return ConnectionEnd::GaveUp;
            }
        }
    }
}
