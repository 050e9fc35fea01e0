//! Lobby Network: peer-to-peer matchmaking coordination.
//!
//! A set of independent nodes discover each other over TCP, agree on a single
//! coordinator (the smallest node ID), keep a shared count of pending match
//! requests through that coordinator, and group requests into timed game
//! sessions.
//!
//! # Architecture
//!
//! - **Codec**: 4-byte big-endian length prefix followed by a JSON payload.
//! - **Transport**: one long-lived accept loop per node; every outbound
//!   message is a one-shot connection.
//! - **Discovery / Heartbeat**: periodic presence messages keep the peer
//!   registry fresh and evict silent peers.
//! - **Election**: recomputed on every membership change; a new coordinator
//!   pushes its queue state to all peers.
//! - **Matchmaker**: pools requests and forms sessions from the oldest ones.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use lobby_network::{NetworkConfig, NetworkManager, match_found_handler};
//!
//! # async fn example() -> Result<(), lobby_network::NetworkError> {
//! let mut node = NetworkManager::new(NetworkConfig::default())?;
//! node.on_match_found(match_found_handler(|event| async move {
//!     println!("session {} with {:?}", event.session_id, event.players);
//! }))
//! .await;
//!
//! let port = node.start().await?;
//! let request_id = node.request_match("userA").await?;
//! println!("listening on {port}, queued {request_id}");
//! node.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
mod context;
pub mod discovery;
pub mod election;
pub mod error;
pub mod events;
mod heartbeat;
pub mod identity;
pub mod matchmaker;
pub mod message;
pub mod node;
pub mod peer;
pub mod queue;
pub mod rate_limit;
mod router;
pub mod session;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use config::{NetworkConfig, PortRange};
pub use error::NetworkError;
pub use events::{
    GameOutcome, GameResultHandler, MatchFound, MatchFoundHandler, game_result_handler,
    match_found_handler,
};
pub use identity::NodeId;
pub use message::{Envelope, MessageBody};
pub use node::{NetworkManager, NetworkStatus, NodeState};
pub use peer::{PeerRecord, PeerRegistry};
