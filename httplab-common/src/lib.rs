use std::io;
use thiserror::Error;

pub mod conn;
pub mod lifecycle;
pub mod logging;
pub mod reporter;

pub use conn::{ConnId, ConnSnapshot, ConnState, ConnStateHook, ConnStateTracker};
pub use lifecycle::Lifecycle;

/// Error taxonomy shared by the load generator, the slow-connection simulator
/// and the demo server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabError {
    #[error("Dial failed: {0}")]
    DialFailure(String),

    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    #[error("Peer closed connection: {0}")]
    PeerClosedConnection(String),

    #[error("HTTP {0}")]
    ApplicationError(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to bind {0}")]
    Bind(String),
}

impl LabError {
    /// Classify an I/O error from an established connection.
    ///
    /// Deadline-style failures become `TransportTimeout`; resets, aborts,
    /// broken pipes and unexpected EOF become `PeerClosedConnection`.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                LabError::TransportTimeout(err.to_string())
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected => LabError::PeerClosedConnection(err.to_string()),
            _ => LabError::Transport(err.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LabError::TransportTimeout(_))
    }

    pub fn is_peer_closed(&self) -> bool {
        matches!(self, LabError::PeerClosedConnection(_))
    }
}

/// Result type for httplab operations
pub type Result<T> = std::result::Result<T, LabError>;
