//! Wire messages exchanged between nodes.
//!
//! Every message is a flat JSON object carrying `type` and `sender_id`, plus
//! the fields specific to its type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// A message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Node that produced the message.
    pub sender_id: NodeId,
    /// Type discriminator and type-specific fields.
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Presence announcement shared by discovery, discovery responses and
/// heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// Advertised host. Receivers fall back to the connection's source
    /// address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub port: u16,
    pub timestamp: DateTime<Utc>,
    pub protocol_version: String,
}

/// The typed part of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Discovery(Presence),
    DiscoveryResponse(Presence),
    Heartbeat(Presence),
    /// Peer-to-peer fallback request, inserted directly into pending pools.
    MatchRequest {
        request_id: String,
        user_id: String,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    /// Request forwarded to the coordinator for global accounting.
    GlobalMatchRequest {
        request_id: String,
        user_id: String,
        source_node: NodeId,
    },
    QueueSync {
        coordinator_id: NodeId,
        global_queue_state: BTreeMap<NodeId, u32>,
        total_pending: u32,
    },
    /// Announces a freshly formed session to every peer.
    MatchFound {
        session_id: String,
        players: Vec<String>,
        request_ids: Vec<String>,
        coordinator_id: NodeId,
    },
    GameResult {
        session_id: String,
        winner_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl MessageBody {
    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::DiscoveryResponse(_) => "discovery_response",
            Self::Heartbeat(_) => "heartbeat",
            Self::MatchRequest { .. } => "match_request",
            Self::GlobalMatchRequest { .. } => "global_match_request",
            Self::QueueSync { .. } => "queue_sync",
            Self::MatchFound { .. } => "match_found",
            Self::GameResult { .. } => "game_result",
        }
    }
}

impl Envelope {
    pub fn new(sender_id: NodeId, body: MessageBody) -> Self {
        Self { sender_id, body }
    }

    /// Serialize the envelope to JSON bytes for framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize an envelope from a frame payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn presence() -> Presence {
        Presence {
            host: Some("127.0.0.1".to_string()),
            port: 8001,
            timestamp: Utc::now(),
            protocol_version: "1.0".to_string(),
        }
    }

    #[test]
    fn test_discovery_is_flat_on_the_wire() {
        let env = Envelope::new(NodeId::from("a1"), MessageBody::Discovery(presence()));
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["type"], "discovery");
        assert_eq!(value["sender_id"], "a1");
        assert_eq!(value["host"], "127.0.0.1");
        assert_eq!(value["port"], 8001);
        assert_eq!(value["protocol_version"], "1.0");
    }

    #[test]
    fn test_queue_sync_roundtrip() {
        let mut state = BTreeMap::new();
        state.insert(NodeId::from("a1"), 2);
        state.insert(NodeId::from("b2"), 1);
        let env = Envelope::new(
            NodeId::from("a1"),
            MessageBody::QueueSync {
                coordinator_id: NodeId::from("a1"),
                global_queue_state: state,
                total_pending: 3,
            },
        );

        let bytes = env.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, env);

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["global_queue_state"]["b2"], 1);
    }

    #[test]
    fn test_presence_without_host_decodes() {
        let raw = serde_json::json!({
            "type": "heartbeat",
            "sender_id": "b2",
            "port": 8002,
            "timestamp": "2026-01-01T00:00:00Z",
            "protocol_version": "1.0",
        });
        let env: Envelope = serde_json::from_value(raw).unwrap();
        match env.body {
            MessageBody::Heartbeat(p) => {
                assert!(p.host.is_none());
                assert_eq!(p.port, 8002);
            }
            other => panic!("Expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let raw = br#"{"type":"teleport","sender_id":"x"}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn test_missing_sender_is_rejected() {
        let raw = br#"{"type":"game_result","session_id":"s","winner_id":"w","timestamp":"2026-01-01T00:00:00Z"}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn test_kind_names_match_wire_tags() {
        let env = Envelope::new(
            NodeId::from("a1"),
            MessageBody::GlobalMatchRequest {
                request_id: "r1".to_string(),
                user_id: "userA".to_string(),
                source_node: NodeId::from("b2"),
            },
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], env.body.kind());
    }
}
