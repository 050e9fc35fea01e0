//! Game session timer: resolves a session after the configured duration.

use std::sync::Arc;

use chrono::Utc;
use rand::seq::IndexedRandom;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::events::GameOutcome;
use crate::message::MessageBody;

/// Start the timer for `session_id`. A node stop cancels it before it fires.
pub(crate) fn spawn_timer(ctx: Arc<NodeContext>, session_id: String) -> JoinHandle<()> {
    let mut shutdown = ctx.shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.game_duration) => {
                resolve(&ctx, &session_id).await;
            }
            _ = shutdown.recv() => {
                debug!("Timer for session {session_id} cancelled by shutdown");
            }
        }
    })
}

/// Pick a winner, tell every peer and notify the local collaborator.
async fn resolve(ctx: &NodeContext, session_id: &str) {
    let finished = {
        let mut lobby = ctx.lobby.write().await;
        lobby.matchmaker.finish_session(session_id, Utc::now())
    };
    let Some(session) = finished else {
        debug!("Session {session_id} already gone, nothing to resolve");
        return;
    };
    let Some(winner_id) = pick_winner(&session.players) else {
        warn!("Session {session_id} has no players, dropping it");
        return;
    };

    info!("Session {session_id} finished, winner {winner_id}");
    let reached = ctx
        .broadcast(MessageBody::GameResult {
            session_id: session.session_id.clone(),
            winner_id: winner_id.clone(),
            timestamp: Utc::now(),
        })
        .await;
    debug!("Game result for {session_id} sent to {reached} peers");

    ctx.callbacks
        .emit_game_result(GameOutcome {
            session_id: session.session_id,
            winner_id,
        })
        .await;
}

/// Uniformly random winner, or `None` for an empty roster.
pub fn pick_winner(players: &[String]) -> Option<String> {
    players.choose(&mut rand::rng()).cloned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::events::game_result_handler;
    use crate::identity::NodeId;
    use crate::matchmaker::GameSession;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn context(game_duration: Duration) -> Arc<NodeContext> {
        let config = NetworkConfig {
            game_duration,
            ..NetworkConfig::default()
        };
        Arc::new(NodeContext::new(NodeId::from("a1"), config))
    }

    async fn seed_session(ctx: &NodeContext, id: &str) {
        let session = GameSession::playing(
            id,
            vec!["userA".to_string(), "userB".to_string()],
            NodeId::from("a1"),
            Utc::now(),
        );
        ctx.lobby.write().await.matchmaker.adopt_session(session);
    }

    #[test]
    fn test_winner_is_a_player() {
        let players = vec!["userA".to_string(), "userB".to_string(), "userC".to_string()];
        for _ in 0..20 {
            let winner = pick_winner(&players).unwrap();
            assert!(players.contains(&winner));
        }
        assert!(pick_winner(&[]).is_none());
    }

    #[tokio::test]
    async fn test_timer_resolves_and_removes_session() {
        let ctx = context(Duration::from_millis(20));
        seed_session(&ctx, "s-1").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        ctx.callbacks
            .set_game_result(game_result_handler(move |outcome: GameOutcome| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(outcome);
                }
            }))
            .await;

        spawn_timer(Arc::clone(&ctx), "s-1".to_string()).await.unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.session_id, "s-1");
        assert!(["userA", "userB"].contains(&outcome.winner_id.as_str()));
        assert!(ctx.lobby.read().await.matchmaker.session("s-1").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_timer() {
        let ctx = context(Duration::from_secs(60));
        seed_session(&ctx, "s-2").await;

        let timer = spawn_timer(Arc::clone(&ctx), "s-2".to_string());
        let _ = ctx.shutdown.send(());
        timer.await.unwrap();

        assert!(ctx.lobby.read().await.matchmaker.session("s-2").is_some());
    }
}
