//! Message routing: dispatches each admitted envelope to its handler.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::context::NodeContext;
use crate::discovery;
use crate::events::{GameOutcome, MatchFound};
use crate::heartbeat;
use crate::identity::NodeId;
use crate::matchmaker::{GameSession, MatchRequest};
use crate::message::{Envelope, MessageBody};

/// Handle one inbound envelope.
pub(crate) async fn route(ctx: &Arc<NodeContext>, from_addr: SocketAddr, envelope: Envelope) {
    let Envelope { sender_id, body } = envelope;
    trace!("Routing {} from {}", body.kind(), sender_id.short());

    match body {
        MessageBody::Discovery(presence) => {
            discovery::handle_presence(ctx, from_addr, &sender_id, presence, true).await;
        }
        MessageBody::DiscoveryResponse(presence) => {
            discovery::handle_presence(ctx, from_addr, &sender_id, presence, false).await;
        }
        MessageBody::Heartbeat(_) => heartbeat::handle_heartbeat(ctx, &sender_id).await,
        MessageBody::MatchRequest {
            request_id,
            user_id,
            node_id,
            timestamp: _,
        } => {
            // Receipt time orders the pool; sender clocks are not trusted.
            let request = MatchRequest {
                request_id,
                user_id,
                origin_node_id: node_id,
                timestamp: Utc::now(),
            };
            if !ctx.enqueue_local(request).await {
                trace!("Duplicate match_request from {}", sender_id.short());
            }
        }
        MessageBody::GlobalMatchRequest {
            request_id,
            user_id,
            source_node,
        } => on_global_match_request(ctx, &sender_id, request_id, user_id, source_node).await,
        MessageBody::QueueSync {
            coordinator_id,
            global_queue_state,
            total_pending,
        } => on_queue_sync(ctx, coordinator_id, global_queue_state, total_pending).await,
        MessageBody::MatchFound {
            session_id,
            players,
            request_ids,
            coordinator_id,
        } => on_match_found(ctx, session_id, players, request_ids, coordinator_id).await,
        MessageBody::GameResult {
            session_id,
            winner_id,
            timestamp: _,
        } => on_game_result(ctx, session_id, winner_id).await,
    }
}

async fn on_global_match_request(
    ctx: &Arc<NodeContext>,
    sender: &NodeId,
    request_id: String,
    user_id: String,
    source_node: NodeId,
) {
    if request_id.is_empty() || user_id.is_empty() {
        warn!("Malformed global_match_request from {}, dropping", sender.short());
        return;
    }
    let request = MatchRequest {
        request_id,
        user_id,
        origin_node_id: source_node,
        timestamp: Utc::now(),
    };
    if let Err(request) = ctx.enqueue_coordinated(request).await {
        debug!(
            "Not coordinator, dropping global_match_request {} from {}",
            request.request_id,
            sender.short()
        );
    }
}

/// Adopt the sender's queue state and coordinator claim wholesale.
async fn on_queue_sync(
    ctx: &NodeContext,
    coordinator_id: NodeId,
    global_queue_state: BTreeMap<NodeId, u32>,
    total_pending: u32,
) {
    let mut lobby = ctx.lobby.write().await;
    lobby.queue.overwrite(global_queue_state);
    let transition = lobby.view.assert_from_sync(&ctx.node_id, coordinator_id);
    lobby.refresh_phase();
    if transition.changed() {
        info!(
            "Queue sync names {} as coordinator",
            transition.current.short()
        );
    }
    debug!(
        "Queue sync from {}: {total_pending} pending",
        transition.current.short()
    );
}

/// Mirror a session formed elsewhere and drop the requests it consumed.
async fn on_match_found(
    ctx: &Arc<NodeContext>,
    session_id: String,
    players: Vec<String>,
    request_ids: Vec<String>,
    coordinator_id: NodeId,
) {
    let (sync, adopted) = {
        let mut lobby = ctx.lobby.write().await;
        let consumed = lobby.matchmaker.remove_pending(&request_ids);
        let mut sync = None;
        if lobby.view.is_coordinator() && !consumed.is_empty() {
            for request in &consumed {
                lobby.queue.decrement(&request.origin_node_id);
            }
            sync = Some(lobby.queue.sync_body(&ctx.node_id));
        }
        let session = GameSession::playing(
            session_id.clone(),
            players.clone(),
            coordinator_id,
            Utc::now(),
        );
        (sync, lobby.matchmaker.adopt_session(session))
    };

    if let Some(sync) = sync {
        ctx.broadcast_detached(sync);
    }
    if adopted {
        info!("Joined session {session_id} with players {players:?}");
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            ctx.callbacks
                .emit_match_found(MatchFound {
                    session_id,
                    players,
                })
                .await;
        });
    }
}

async fn on_game_result(ctx: &Arc<NodeContext>, session_id: String, winner_id: String) {
    let finished = {
        let mut lobby = ctx.lobby.write().await;
        lobby.matchmaker.finish_session(&session_id, Utc::now())
    };
    if finished.is_none() {
        debug!("Result for unknown session {session_id}, ignoring");
        return;
    }

    info!("Session {session_id} resolved, winner {winner_id}");
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        ctx.callbacks
            .emit_game_result(GameOutcome {
                session_id,
                winner_id,
            })
            .await;
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
