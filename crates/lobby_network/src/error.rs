//! Network error types.

use std::time::Duration;

/// Errors that can occur in the lobby_network crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Connecting to or writing to a peer failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No registry entry for the addressed node.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// A message payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A frame declared a payload larger than the configured maximum.
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The configuration failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// No port in the configured range could be bound.
    #[error("No available port after {attempts} attempts")]
    NoAvailablePort { attempts: usize },

    /// An outbound exchange exceeded the connection timeout.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The operation needs a started node.
    #[error("Node not running")]
    NotRunning,

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
