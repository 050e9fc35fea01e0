//! Heartbeat: liveness pings, eviction of silent peers, expiry of orphaned
//! sessions and rate-limiter housekeeping.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::context::NodeContext;
use crate::identity::NodeId;
use crate::message::MessageBody;

/// Run heartbeat rounds forever, starting one interval after launch.
pub(crate) async fn run(ctx: Arc<NodeContext>) {
    let period = ctx.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        beat_once(&ctx).await;
    }
}

/// Evict expired peers, re-elect if membership shrank, then ping the rest.
pub(crate) async fn beat_once(ctx: &Arc<NodeContext>) {
    let evicted = ctx
        .peers
        .write()
        .await
        .evict_expired(Utc::now(), ctx.config.connection_timeout);
    for peer in &evicted {
        info!(
            "Evicted unresponsive peer {} ({}:{})",
            peer.node_id.short(),
            peer.host,
            peer.port
        );
    }
    if !evicted.is_empty() {
        ctx.reelect().await;
    }

    ctx.expire_sessions().await;

    let swept = ctx.limiter.lock().await.sweep(std::time::Instant::now());
    if swept > 0 {
        debug!("Dropped {swept} idle rate-limit windows");
    }

    let reached = ctx.broadcast(MessageBody::Heartbeat(ctx.presence())).await;
    trace!("Heartbeat reached {reached} peers");
}

/// Refresh a known peer. Unknown senders must come through discovery first.
pub(crate) async fn handle_heartbeat(ctx: &NodeContext, sender: &NodeId) {
    let known = ctx.peers.write().await.touch(sender, Utc::now());
    if !known {
        trace!("Heartbeat from unknown node {}, ignoring", sender.short());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::matchmaker::GameSession;
    use crate::node::NodeState;
    use crate::peer::PeerRecord;
    use std::time::Duration;

    fn context(id: &str) -> Arc<NodeContext> {
        let config = NetworkConfig {
            connection_timeout: Duration::from_secs(15),
            ..NetworkConfig::default()
        };
        Arc::new(NodeContext::new(NodeId::from(id), config))
    }

    #[tokio::test]
    async fn test_unknown_sender_not_added() {
        let ctx = context("a1");
        handle_heartbeat(&ctx, &NodeId::from("b2")).await;
        assert!(ctx.peers.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_known_peer() {
        let ctx = context("a1");
        let b2 = NodeId::from("b2");
        let stale = Utc::now() - chrono::Duration::seconds(10);
        ctx.peers
            .write()
            .await
            .upsert(PeerRecord::new(b2.clone(), "127.0.0.1", 1, stale));

        handle_heartbeat(&ctx, &b2).await;
        assert!(ctx.peers.read().await.get(&b2).unwrap().last_seen > stale);
    }

    #[tokio::test]
    async fn test_eviction_recomputes_coordinator() {
        let ctx = context("b2");
        ctx.lobby.write().await.phase = NodeState::Listening;
        let a1 = NodeId::from("a1");
        ctx.peers.write().await.upsert(PeerRecord::new(
            a1.clone(),
            "127.0.0.1",
            1,
            Utc::now() - chrono::Duration::seconds(30),
        ));
        ctx.reelect().await;
        assert!(!ctx.lobby.read().await.view.is_coordinator());

        beat_once(&ctx).await;

        assert!(ctx.peers.read().await.get(&a1).is_none());
        let lobby = ctx.lobby.read().await;
        assert!(lobby.view.is_coordinator());
        assert_eq!(lobby.phase, NodeState::Coordinator);
    }

    #[tokio::test]
    async fn test_sweep_drops_idle_senders() {
        let config = NetworkConfig {
            rate_limit_window: Duration::from_millis(10),
            ..NetworkConfig::default()
        };
        let ctx = Arc::new(NodeContext::new(NodeId::from("a1"), config));
        ctx.limiter.lock().await.admit("b2");
        tokio::time::sleep(Duration::from_millis(30)).await;

        beat_once(&ctx).await;
        assert_eq!(ctx.limiter.lock().await.tracked_senders(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_session_expires() {
        let config = NetworkConfig {
            game_duration: Duration::from_millis(20),
            connection_timeout: Duration::from_millis(20),
            ..NetworkConfig::default()
        };
        let ctx = Arc::new(NodeContext::new(NodeId::from("b2"), config));
        let started = Utc::now() - chrono::Duration::milliseconds(100);
        ctx.lobby.write().await.matchmaker.adopt_session(GameSession::playing(
            "gone",
            vec!["userA".to_string(), "userB".to_string()],
            NodeId::from("a1"),
            started,
        ));
        ctx.lobby.write().await.matchmaker.adopt_session(GameSession::playing(
            "live",
            vec!["userC".to_string(), "userD".to_string()],
            NodeId::from("a1"),
            Utc::now() + chrono::Duration::seconds(5),
        ));

        beat_once(&ctx).await;

        let lobby = ctx.lobby.read().await;
        assert!(lobby.matchmaker.session("gone").is_none());
        assert!(lobby.matchmaker.session("live").is_some());
        assert_eq!(lobby.matchmaker.active_sessions(), 1);
    }
}
