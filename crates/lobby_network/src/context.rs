//! Shared node state and the operations message handlers perform on it.
//!
//! Each concern sits behind its own lock. Match pooling, queue accounting and
//! coordinator status share one lock ([`Lobby`]) so that insertion, match
//! selection and count updates happen in a single critical section.
//!
//! Handlers mutate state inline and hand every outbound send and collaborator
//! callback to a spawned task, so the serial event loop never waits on a peer
//! or on user code. Sends always happen after the lock is released.

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::election::CoordinatorView;
use crate::error::NetworkError;
use crate::events::{Callbacks, MatchFound};
use crate::identity::NodeId;
use crate::matchmaker::{FormedMatch, MatchRequest, Matchmaker};
use crate::message::{Envelope, MessageBody, Presence};
use crate::node::NodeState;
use crate::peer::PeerRegistry;
use crate::queue::GlobalQueueState;
use crate::rate_limit::RateLimiter;
use crate::session;
use crate::transport;

/// Coordinator status, queue accounting and the match pool.
#[derive(Debug)]
pub(crate) struct Lobby {
    pub phase: NodeState,
    pub view: CoordinatorView,
    pub queue: GlobalQueueState,
    pub matchmaker: Matchmaker,
}

impl Lobby {
    fn new(match_size: usize) -> Self {
        Self {
            phase: NodeState::Starting,
            view: CoordinatorView::default(),
            queue: GlobalQueueState::new(),
            matchmaker: Matchmaker::new(match_size),
        }
    }

    /// Track the coordinator view once the node is listening.
    pub fn refresh_phase(&mut self) {
        if matches!(
            self.phase,
            NodeState::Listening | NodeState::Coordinator | NodeState::Follower
        ) {
            self.phase = if self.view.is_coordinator() {
                NodeState::Coordinator
            } else {
                NodeState::Follower
            };
        }
    }

    fn coordinator_or(&self, fallback: &NodeId) -> NodeId {
        self.view.coordinator().unwrap_or(fallback).clone()
    }
}

/// Everything a running node shares between its tasks.
pub(crate) struct NodeContext {
    pub node_id: NodeId,
    pub config: NetworkConfig,
    port: AtomicU16,
    advertise_host: OnceLock<String>,
    pub peers: RwLock<PeerRegistry>,
    pub lobby: RwLock<Lobby>,
    pub limiter: Mutex<RateLimiter>,
    pub callbacks: Callbacks,
    /// Fired once per `stop()`; every long-lived task subscribes.
    pub shutdown: broadcast::Sender<()>,
}

impl NodeContext {
    pub fn new(node_id: NodeId, config: NetworkConfig) -> Self {
        let (shutdown, _) = broadcast::channel(8);
        Self {
            port: AtomicU16::new(0),
            advertise_host: OnceLock::new(),
            peers: RwLock::new(PeerRegistry::with_capacity_limit(config.max_peers)),
            lobby: RwLock::new(Lobby::new(config.match_size)),
            limiter: Mutex::new(RateLimiter::new(
                config.rate_limit_messages,
                config.rate_limit_window,
            )),
            callbacks: Callbacks::default(),
            shutdown,
            node_id,
            config,
        }
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    /// Fix the advertised host. Later calls keep the first value.
    pub fn set_advertise_host(&self, host: String) {
        let _ = self.advertise_host.set(host);
    }

    /// Host peers should use to reach this node.
    pub fn advertise_host(&self) -> String {
        match self.advertise_host.get() {
            Some(host) => host.clone(),
            None => self.config.resolve_advertise_host(None),
        }
    }

    /// Presence payload for discovery, discovery responses and heartbeats.
    pub fn presence(&self) -> Presence {
        Presence {
            host: Some(self.advertise_host()),
            port: self.port(),
            timestamp: Utc::now(),
            protocol_version: self.config.protocol_version.clone(),
        }
    }

    pub fn envelope(&self, body: MessageBody) -> Envelope {
        Envelope::new(self.node_id.clone(), body)
    }

    pub async fn send_to(
        &self,
        host: &str,
        port: u16,
        envelope: &Envelope,
    ) -> Result<(), NetworkError> {
        transport::send_message(
            host,
            port,
            envelope,
            self.config.connection_timeout,
            self.config.max_message_size,
        )
        .await
    }

    pub async fn send_to_peer(
        &self,
        node_id: &NodeId,
        envelope: &Envelope,
    ) -> Result<(), NetworkError> {
        let (host, port) = {
            let peers = self.peers.read().await;
            let peer = peers
                .get(node_id)
                .ok_or_else(|| NetworkError::PeerNotFound(node_id.to_string()))?;
            (peer.host.clone(), peer.port)
        };
        self.send_to(&host, port, envelope).await
    }

    /// Send `body` to every known peer concurrently. Returns the number of
    /// peers reached.
    pub async fn broadcast(&self, body: MessageBody) -> usize {
        let targets: Vec<(String, u16)> = self
            .peers
            .read()
            .await
            .all()
            .into_iter()
            .map(|p| (p.host.clone(), p.port))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let envelope = self.envelope(body);
        let envelope = &envelope;
        let kind = envelope.body.kind();
        let sends = targets.iter().map(|(host, port)| async move {
            match self.send_to(host, *port, envelope).await {
                Ok(()) => true,
                Err(e) => {
                    debug!("Broadcast of {kind} to {host}:{port} failed: {e}");
                    false
                }
            }
        });
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    /// Broadcast `body` from a spawned task.
    pub fn broadcast_detached(self: &Arc<Self>, body: MessageBody) {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            ctx.broadcast(body).await;
        });
    }

    /// Recompute the coordinator from the current peer set. A node that just
    /// took over pushes its queue state to everyone.
    pub async fn reelect(self: &Arc<Self>) {
        let peer_ids = self.peers.read().await.ids();
        let takeover = {
            let mut lobby = self.lobby.write().await;
            let transition = lobby.view.recompute(&self.node_id, &peer_ids);
            lobby.refresh_phase();
            if transition.changed() {
                match &transition.previous {
                    Some(previous) => info!(
                        "Coordinator changed from {} to {}",
                        previous.short(),
                        transition.current.short()
                    ),
                    None => info!("Coordinator elected: {}", transition.current.short()),
                }
            }
            transition
                .became_coordinator
                .then(|| lobby.queue.sync_body(&self.node_id))
        };

        if let Some(sync) = takeover {
            info!("Node {} is now coordinator, pushing queue state", self.node_id.short());
            self.broadcast_detached(sync);
        }
    }

    /// Coordinator path: pool the request, count it against its origin node,
    /// form what matches are possible and publish the result.
    ///
    /// Hands the request back if this node is not the coordinator.
    pub async fn enqueue_coordinated(
        self: &Arc<Self>,
        request: MatchRequest,
    ) -> Result<(), MatchRequest> {
        let (sync, formed) = {
            let mut lobby = self.lobby.write().await;
            if !lobby.view.is_coordinator() {
                return Err(request);
            }
            let origin = request.origin_node_id.clone();
            let user = request.user_id.clone();
            if lobby.matchmaker.insert(request) {
                lobby.queue.increment(&origin);
                debug!("Queued {user} from {} ({} pending)", origin.short(), lobby.queue.total());
            }
            let formed = self.form_matches(&mut lobby);
            (Some(lobby.queue.sync_body(&self.node_id)), formed)
        };
        self.publish(sync, formed);
        Ok(())
    }

    /// Pool a request without counting it. Returns `false` for a duplicate.
    pub async fn enqueue_local(self: &Arc<Self>, request: MatchRequest) -> bool {
        let (sync, formed) = {
            let mut lobby = self.lobby.write().await;
            if !lobby.matchmaker.insert(request) {
                return false;
            }
            let formed = self.form_matches(&mut lobby);
            let sync = (lobby.view.is_coordinator() && !formed.is_empty())
                .then(|| lobby.queue.sync_body(&self.node_id));
            (sync, formed)
        };
        self.publish(sync, formed);
        true
    }

    /// Fallback path: tell every peer about the request, then pool it here.
    pub async fn enqueue_fallback(self: &Arc<Self>, request: MatchRequest) {
        let body = MessageBody::MatchRequest {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            node_id: request.origin_node_id.clone(),
            timestamp: request.timestamp,
        };
        let reached = self.broadcast(body).await;
        debug!("Broadcast fallback request for {} to {reached} peers", request.user_id);
        self.enqueue_local(request).await;
    }

    /// Drain the pool into as many sessions as it can fill. The coordinator
    /// also releases the consumed requests from the queue counts.
    pub fn form_matches(&self, lobby: &mut Lobby) -> Vec<FormedMatch> {
        let coordinator = lobby.coordinator_or(&self.node_id);
        let now = Utc::now();
        let mut formed = Vec::new();
        while let Some(found) = lobby.matchmaker.try_form(&coordinator, now) {
            if lobby.view.is_coordinator() {
                for request in &found.requests {
                    lobby.queue.decrement(&request.origin_node_id);
                }
            }
            info!(
                "Formed session {} with players {:?}",
                found.session.session_id, found.session.players
            );
            formed.push(found);
        }
        formed
    }

    /// Send the queue sync (if any), then announce each formed match, in
    /// that order, from a spawned task.
    pub fn publish(self: &Arc<Self>, sync: Option<MessageBody>, formed: Vec<FormedMatch>) {
        if sync.is_none() && formed.is_empty() {
            return;
        }
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(sync) = sync {
                ctx.broadcast(sync).await;
            }
            for found in formed {
                ctx.announce(found).await;
            }
        });
    }

    /// Drop sessions that outlived `game_duration` plus `connection_timeout`.
    /// Catches mirrors whose forming node vanished before its result arrived.
    pub async fn expire_sessions(&self) -> usize {
        let Ok(grace) =
            chrono::Duration::from_std(self.config.game_duration + self.config.connection_timeout)
        else {
            return 0;
        };
        let expired = self
            .lobby
            .write()
            .await
            .matchmaker
            .expire_sessions(Utc::now() - grace);
        for session in &expired {
            warn!(
                "Session {} from {} expired without a result",
                session.session_id,
                session.coordinator_node_id.short()
            );
        }
        expired.len()
    }

    /// Tell peers about a new session, start its timer and notify the local
    /// collaborator.
    async fn announce(self: &Arc<Self>, found: FormedMatch) {
        let request_ids = found.request_ids();
        let session = found.session;
        self.broadcast(MessageBody::MatchFound {
            session_id: session.session_id.clone(),
            players: session.players.clone(),
            request_ids,
            coordinator_id: session.coordinator_node_id.clone(),
        })
        .await;

        session::spawn_timer(Arc::clone(self), session.session_id.clone());

        self.callbacks
            .emit_match_found(MatchFound {
                session_id: session.session_id,
                players: session.players,
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
