//! NetworkManager: the public face of the lobby network.
//!
//! [`NetworkManager`] owns one node and manages:
//! - the TCP listener and the serial event loop that routes inbound messages
//! - discovery and heartbeat loops
//! - coordinator election, queue accounting and match formation
//! - callbacks for match-found and game-result events

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::context::NodeContext;
use crate::discovery;
use crate::error::NetworkError;
use crate::events::{GameResultHandler, MatchFoundHandler};
use crate::heartbeat;
use crate::identity::NodeId;
use crate::matchmaker::MatchRequest;
use crate::message::MessageBody;
use crate::peer::PeerRecord;
use crate::router;
use crate::transport::{self, TransportEvent};

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Starting,
    Listening,
    Coordinator,
    Follower,
    Stopped,
}

/// Point-in-time view of a node, for the collaborator and for logging.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub state: NodeState,
    pub is_coordinator: bool,
    pub coordinator_node_id: Option<NodeId>,
    pub global_queue_state: BTreeMap<NodeId, u32>,
    pub peers_count: usize,
    pub pending_matches: usize,
    pub active_sessions: usize,
    pub peers: Vec<PeerRecord>,
}

/// One lobby node.
///
/// Create one per process (or several per test). Call
/// [`start()`](NetworkManager::start) to begin listening and discovering
/// peers.
pub struct NetworkManager {
    ctx: Arc<NodeContext>,
    running: bool,
    server: Option<JoinHandle<()>>,
    event_loop: Option<JoinHandle<()>>,
    /// Discovery and heartbeat; aborted on stop.
    background: Vec<JoinHandle<()>>,
}

impl NetworkManager {
    /// Create a node with a freshly generated identity.
    pub fn new(config: NetworkConfig) -> Result<Self, NetworkError> {
        Self::with_node_id(NodeId::generate(), config)
    }

    /// Create a node with a fixed identity.
    pub fn with_node_id(node_id: NodeId, config: NetworkConfig) -> Result<Self, NetworkError> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(NodeContext::new(node_id, config)),
            running: false,
            server: None,
            event_loop: None,
            background: Vec::new(),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.ctx.node_id
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.ctx.config
    }

    /// Listening port, or 0 before the first start.
    pub fn port(&self) -> u16 {
        self.ctx.port()
    }

    pub async fn state(&self) -> NodeState {
        self.ctx.lobby.read().await.phase
    }

    /// Register the callback fired whenever this node learns of a new session.
    pub async fn on_match_found(&self, handler: MatchFoundHandler) {
        self.ctx.callbacks.set_match_found(handler).await;
    }

    /// Register the callback fired whenever a session resolves.
    pub async fn on_game_result(&self, handler: GameResultHandler) {
        self.ctx.callbacks.set_game_result(handler).await;
    }

    /// Bind the listener and launch every background task. Returns the
    /// listening port.
    pub async fn start(&mut self) -> Result<u16, NetworkError> {
        if self.running {
            return Ok(self.ctx.port());
        }

        let ctx = Arc::clone(&self.ctx);
        let listener = transport::bind(ctx.config.bind_host, &ctx.config.bind_candidates()).await?;
        let port = listener.local_addr()?.port();
        ctx.set_port(port);
        let detected = if ctx.config.advertise_host.is_none() && ctx.config.bind_host.is_unspecified() {
            transport::detect_local_ip(ctx.config.bind_host).await
        } else {
            None
        };
        ctx.set_advertise_host(ctx.config.resolve_advertise_host(detected));
        ctx.lobby.write().await.phase = NodeState::Listening;

        let (event_tx, event_rx) = mpsc::channel(256);
        self.server = Some(tokio::spawn(transport::serve(
            listener,
            ctx.config.max_message_size,
            event_tx,
            ctx.shutdown.subscribe(),
        )));
        self.event_loop = Some(tokio::spawn(event_loop(
            Arc::clone(&ctx),
            event_rx,
            ctx.shutdown.subscribe(),
        )));

        ctx.reelect().await;

        self.background = vec![
            tokio::spawn(discovery::run(Arc::clone(&ctx))),
            tokio::spawn(heartbeat::run(Arc::clone(&ctx))),
        ];
        self.running = true;
        info!(
            "Node {} started on port {port}, advertising {}",
            ctx.node_id,
            ctx.advertise_host()
        );
        Ok(port)
    }

    /// Stop every task and release the listening port before returning.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        let _ = self.ctx.shutdown.send(());
        for task in self.background.drain(..) {
            task.abort();
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        if let Some(event_loop) = self.event_loop.take() {
            let _ = event_loop.await;
        }

        self.ctx.lobby.write().await.phase = NodeState::Stopped;
        self.running = false;
        info!("Node {} stopped", self.ctx.node_id);
    }

    /// Queue `user_id` for a match. Always yields a request ID once the node
    /// is running, even when every send failed.
    ///
    /// The coordinator pools the request itself. A follower forwards it to the
    /// coordinator and falls back to pooling it locally plus a peer broadcast
    /// when that is impossible.
    pub async fn request_match(&self, user_id: impl Into<String>) -> Result<String, NetworkError> {
        if !self.running {
            return Err(NetworkError::NotRunning);
        }

        let request = MatchRequest::new(user_id, self.ctx.node_id.clone());
        let request_id = request.request_id.clone();

        let (is_coordinator, coordinator) = {
            let lobby = self.ctx.lobby.read().await;
            (lobby.view.is_coordinator(), lobby.view.coordinator().cloned())
        };

        let request = if is_coordinator {
            match self.ctx.enqueue_coordinated(request).await {
                Ok(()) => return Ok(request_id),
                // Lost the role in between; treat as a follower.
                Err(request) => request,
            }
        } else {
            request
        };

        let request = match coordinator.filter(|c| c != &self.ctx.node_id) {
            Some(coordinator) => {
                let envelope = self.ctx.envelope(MessageBody::GlobalMatchRequest {
                    request_id: request.request_id.clone(),
                    user_id: request.user_id.clone(),
                    source_node: self.ctx.node_id.clone(),
                });
                match self.ctx.send_to_peer(&coordinator, &envelope).await {
                    Ok(()) => {
                        debug!(
                            "Forwarded request {request_id} to coordinator {}",
                            coordinator.short()
                        );
                        return Ok(request_id);
                    }
                    Err(e) => {
                        warn!(
                            "Coordinator {} unreachable, falling back to peer broadcast: {e}",
                            coordinator.short()
                        );
                        request
                    }
                }
            }
            None => request,
        };

        self.ctx.enqueue_fallback(request).await;
        Ok(request_id)
    }

    /// Snapshot of identity, coordinator view, queue and peers.
    pub async fn status(&self) -> NetworkStatus {
        let (peers_count, peers) = {
            let registry = self.ctx.peers.read().await;
            let peers: Vec<PeerRecord> = registry.all().into_iter().cloned().collect();
            (registry.len(), peers)
        };
        let lobby = self.ctx.lobby.read().await;
        NetworkStatus {
            node_id: self.ctx.node_id.clone(),
            host: self.ctx.advertise_host(),
            port: self.ctx.port(),
            state: lobby.phase,
            is_coordinator: lobby.view.is_coordinator(),
            coordinator_node_id: lobby.view.coordinator().cloned(),
            global_queue_state: lobby.queue.counts().clone(),
            peers_count,
            pending_matches: lobby.matchmaker.pending_count(),
            active_sessions: lobby.matchmaker.active_sessions(),
            peers,
        }
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        if self.running {
            let _ = self.ctx.shutdown.send(());
            for task in &self.background {
                task.abort();
            }
        }
    }
}

/// Admit and route inbound envelopes one at a time until shutdown.
async fn event_loop(
    ctx: Arc<NodeContext>,
    mut events: mpsc::Receiver<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let TransportEvent::Message { from_addr, envelope } = event;
                if !admit(&ctx, &from_addr, &envelope.sender_id).await {
                    continue;
                }
                router::route(&ctx, from_addr, envelope).await;
            }
            _ = shutdown.recv() => {
                debug!("Event loop shutting down");
                break;
            }
        }
    }
}

async fn admit(ctx: &NodeContext, from_addr: &SocketAddr, sender: &NodeId) -> bool {
    let admitted = ctx.limiter.lock().await.admit(sender.as_str());
    if !admitted {
        warn!("Rate limit exceeded for {} ({from_addr}), dropping message", sender.short());
    }
    admitted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
