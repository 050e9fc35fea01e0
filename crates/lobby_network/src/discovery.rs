//! Peer discovery: periodic presence announcements over the port sweep,
//! known peers and seed addresses.
//!
//! Each round sends a `discovery` message to:
//! 1. every port of the configured range on the sweep host except our own,
//! 2. every peer heard from within the connection timeout,
//! 3. the static seed addresses, but only while no fresh peer is known.
//!
//! Receivers upsert the sender, re-run the election and answer with a
//! `discovery_response` of the same shape.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::PortRange;
use crate::context::NodeContext;
use crate::identity::NodeId;
use crate::message::{MessageBody, Presence};
use crate::peer::{PeerRecord, Upsert};

/// Addresses contacted by one discovery round, deduplicated in order.
pub fn plan_targets(
    sweep_host: &str,
    range: &PortRange,
    own_port: u16,
    fresh_peers: &[(String, u16)],
    seeds: &[(String, u16)],
) -> Vec<(String, u16)> {
    let seeds: &[(String, u16)] = if fresh_peers.is_empty() { seeds } else { &[] };
    let sweep = range
        .ports()
        .filter(|port| *port != own_port)
        .map(|port| (sweep_host.to_string(), port));

    let mut seen = HashSet::new();
    sweep
        .chain(fresh_peers.iter().cloned())
        .chain(seeds.iter().cloned())
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

/// Run discovery rounds forever. The first round fires immediately.
pub(crate) async fn run(ctx: Arc<NodeContext>) {
    let mut ticker = tokio::time::interval(ctx.config.discovery_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        discover_once(&ctx).await;
    }
}

/// One discovery round.
pub(crate) async fn discover_once(ctx: &NodeContext) {
    let fresh: Vec<(String, u16)> = ctx
        .peers
        .read()
        .await
        .fresh(Utc::now(), ctx.config.connection_timeout)
        .into_iter()
        .map(|p| (p.host.clone(), p.port))
        .collect();
    let seeds = ctx.config.seed_addrs().unwrap_or_else(|e| {
        warn!("Ignoring seed nodes: {e}");
        Vec::new()
    });
    let targets = plan_targets(
        &ctx.config.sweep_host,
        &ctx.config.port_range,
        ctx.port(),
        &fresh,
        &seeds,
    );

    let envelope = ctx.envelope(MessageBody::Discovery(ctx.presence()));
    let envelope = &envelope;
    let sends = targets
        .iter()
        .map(|(host, port)| async move { ctx.send_to(host, *port, envelope).await.is_ok() });
    let reached = join_all(sends).await.into_iter().filter(|ok| *ok).count();
    trace!("Discovery round reached {reached}/{} addresses", targets.len());
}

/// Merge a `discovery` or `discovery_response` into the registry.
pub(crate) async fn handle_presence(
    ctx: &Arc<NodeContext>,
    from_addr: SocketAddr,
    sender: &NodeId,
    presence: Presence,
    reply: bool,
) {
    if sender == &ctx.node_id {
        return;
    }
    if presence.protocol_version != ctx.config.protocol_version {
        warn!(
            "Protocol version mismatch from {}: {} (ours {})",
            sender.short(),
            presence.protocol_version,
            ctx.config.protocol_version
        );
        return;
    }

    let host = presence
        .host
        .unwrap_or_else(|| from_addr.ip().to_string());
    let record = PeerRecord::new(sender.clone(), host.clone(), presence.port, Utc::now());
    let outcome = ctx.peers.write().await.upsert(record);
    match outcome {
        Upsert::Inserted => info!("Discovered peer {} at {host}:{}", sender.short(), presence.port),
        Upsert::Refreshed => trace!("Refreshed peer {}", sender.short()),
        Upsert::Rejected => {
            warn!(
                "Peer table full ({} peers), ignoring {}",
                ctx.config.max_peers,
                sender.short()
            );
            return;
        }
    }

    ctx.reelect().await;

    if reply {
        let response = ctx.envelope(MessageBody::DiscoveryResponse(ctx.presence()));
        let ctx = Arc::clone(ctx);
        let port = presence.port;
        tokio::spawn(async move {
            if let Err(e) = ctx.send_to(&host, port, &response).await {
                debug!("Discovery response to {host}:{port} failed: {e}");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(host: &str, port: u16) -> (String, u16) {
        (host.to_string(), port)
    }

    fn source() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 55555)
    }

    fn presence(host: Option<&str>, port: u16, version: &str) -> Presence {
        Presence {
            host: host.map(str::to_string),
            port,
            timestamp: Utc::now(),
            protocol_version: version.to_string(),
        }
    }

    fn context(id: &str, config: NetworkConfig) -> Arc<NodeContext> {
        // Election may push queue state to the fake addresses below.
        let config = NetworkConfig {
            connection_timeout: std::time::Duration::from_millis(200),
            ..config
        };
        Arc::new(NodeContext::new(NodeId::from(id), config))
    }

    #[test]
    fn test_sweep_skips_own_port() {
        let targets = plan_targets("127.0.0.1", &PortRange::new(8000, 8003), 8001, &[], &[]);
        assert_eq!(
            targets,
            vec![addr("127.0.0.1", 8000), addr("127.0.0.1", 8002)]
        );
    }

    #[test]
    fn test_seeds_only_when_no_fresh_peers() {
        let range = PortRange::new(8000, 8001);
        let seeds = vec![addr("10.0.0.9", 9000)];

        let lonely = plan_targets("127.0.0.1", &range, 8000, &[], &seeds);
        assert!(lonely.contains(&addr("10.0.0.9", 9000)));

        let fresh = vec![addr("10.0.0.5", 8500)];
        let connected = plan_targets("127.0.0.1", &range, 8000, &fresh, &seeds);
        assert!(connected.contains(&addr("10.0.0.5", 8500)));
        assert!(!connected.contains(&addr("10.0.0.9", 9000)));
    }

    #[test]
    fn test_targets_are_deduplicated() {
        let range = PortRange::new(8000, 8002);
        let fresh = vec![addr("127.0.0.1", 8001)];
        let targets = plan_targets("127.0.0.1", &range, 8000, &fresh, &[]);
        assert_eq!(targets, vec![addr("127.0.0.1", 8001)]);
    }

    #[tokio::test]
    async fn test_self_and_version_mismatch_ignored() {
        let ctx = context("a1", NetworkConfig::default());
        let me = NodeId::from("a1");
        handle_presence(&ctx, source(), &me, presence(None, 8001, "1.0"), false).await;

        let other = NodeId::from("b2");
        handle_presence(&ctx, source(), &other, presence(None, 8002, "2.0"), false).await;

        assert!(ctx.peers.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_payload_host_preferred_over_source() {
        let ctx = context("a1", NetworkConfig::default());
        let b2 = NodeId::from("b2");
        let c3 = NodeId::from("c3");
        handle_presence(&ctx, source(), &b2, presence(Some("192.168.1.4"), 8002, "1.0"), false)
            .await;
        handle_presence(&ctx, source(), &c3, presence(None, 8003, "1.0"), false).await;

        let peers = ctx.peers.read().await;
        assert_eq!(peers.get(&b2).unwrap().host, "192.168.1.4");
        assert_eq!(peers.get(&c3).unwrap().host, "10.0.0.7");
        assert_eq!(peers.get(&c3).unwrap().port, 8003);
    }

    #[tokio::test]
    async fn test_discovery_triggers_election() {
        let ctx = context("b2", NetworkConfig::default());
        let a1 = NodeId::from("a1");
        handle_presence(&ctx, source(), &a1, presence(Some("127.0.0.1"), 1, "1.0"), false).await;

        let lobby = ctx.lobby.read().await;
        assert_eq!(lobby.view.coordinator(), Some(&a1));
        assert!(!lobby.view.is_coordinator());
    }

    #[tokio::test]
    async fn test_full_registry_rejects_new_peer() {
        let config = NetworkConfig {
            max_peers: 1,
            ..NetworkConfig::default()
        };
        let ctx = context("a1", config);
        let b2 = NodeId::from("b2");
        let c3 = NodeId::from("c3");
        handle_presence(&ctx, source(), &b2, presence(Some("127.0.0.1"), 1, "1.0"), false).await;
        handle_presence(&ctx, source(), &c3, presence(Some("127.0.0.1"), 2, "1.0"), false).await;

        let peers = ctx.peers.read().await;
        assert_eq!(peers.len(), 1);
        assert!(peers.get(&c3).is_none());
    }
}
