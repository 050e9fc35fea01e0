//! Collaborator-facing events and the callbacks that receive them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A session was formed (locally or by the coordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFound {
    pub session_id: String,
    pub players: Vec<String>,
}

/// A session was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    pub session_id: String,
    pub winner_id: String,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Async callback invoked when a match is found.
pub type MatchFoundHandler = Arc<dyn Fn(MatchFound) -> BoxFuture + Send + Sync>;

/// Async callback invoked when a game result is known.
pub type GameResultHandler = Arc<dyn Fn(GameOutcome) -> BoxFuture + Send + Sync>;

/// Registered callbacks. Either may be absent.
#[derive(Default)]
pub(crate) struct Callbacks {
    match_found: RwLock<Option<MatchFoundHandler>>,
    game_result: RwLock<Option<GameResultHandler>>,
}

impl Callbacks {
    pub async fn set_match_found(&self, handler: MatchFoundHandler) {
        *self.match_found.write().await = Some(handler);
    }

    pub async fn set_game_result(&self, handler: GameResultHandler) {
        *self.game_result.write().await = Some(handler);
    }

    pub async fn emit_match_found(&self, event: MatchFound) {
        let handler = self.match_found.read().await.clone();
        if let Some(handler) = handler {
            handler(event).await;
        }
    }

    pub async fn emit_game_result(&self, event: GameOutcome) {
        let handler = self.game_result.read().await.clone();
        if let Some(handler) = handler {
            handler(event).await;
        }
    }
}

/// Wrap an async closure into a [`MatchFoundHandler`].
pub fn match_found_handler<F, Fut>(f: F) -> MatchFoundHandler
where
    F: Fn(MatchFound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event: MatchFound| -> BoxFuture { Box::pin(f(event)) })
}

/// Wrap an async closure into a [`GameResultHandler`].
pub fn game_result_handler<F, Fut>(f: F) -> GameResultHandler
where
    F: Fn(GameOutcome) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event: GameOutcome| -> BoxFuture { Box::pin(f(event)) })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
