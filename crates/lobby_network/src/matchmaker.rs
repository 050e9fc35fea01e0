//! Matchmaker: pools pending match requests and groups them into sessions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// A single user's intent to join a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub request_id: String,
    pub user_id: String,
    /// Node the request originated from.
    pub origin_node_id: NodeId,
    pub timestamp: DateTime<Utc>,
}

impl MatchRequest {
    pub fn new(user_id: impl Into<String>, origin_node_id: NodeId) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            origin_node_id,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Playing,
    Finished,
}

/// A group of matched players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub session_id: String,
    pub players: Vec<String>,
    pub coordinator_node_id: NodeId,
    pub status: SessionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl GameSession {
    /// A session that started playing at `now`.
    pub fn playing(
        session_id: impl Into<String>,
        players: Vec<String>,
        coordinator_node_id: NodeId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            players,
            coordinator_node_id,
            status: SessionStatus::Playing,
            start_time: Some(now),
            end_time: None,
        }
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Finished;
        self.end_time = Some(now);
    }
}

/// A session just formed from the pool, with the requests it consumed.
#[derive(Debug, Clone)]
pub struct FormedMatch {
    pub session: GameSession,
    pub requests: Vec<MatchRequest>,
}

impl FormedMatch {
    pub fn request_ids(&self) -> Vec<String> {
        self.requests.iter().map(|r| r.request_id.clone()).collect()
    }
}

/// Pending pool plus the table of active sessions.
#[derive(Debug)]
pub struct Matchmaker {
    match_size: usize,
    pending: Vec<MatchRequest>,
    sessions: HashMap<String, GameSession>,
}

impl Matchmaker {
    pub fn new(match_size: usize) -> Self {
        Self {
            match_size,
            pending: Vec::new(),
            sessions: HashMap::new(),
        }
    }

    /// Add a request to the pool. Duplicate request IDs are ignored.
    pub fn insert(&mut self, request: MatchRequest) -> bool {
        if self
            .pending
            .iter()
            .any(|r| r.request_id == request.request_id)
        {
            return false;
        }
        self.pending.push(request);
        true
    }

    /// Remove pending requests by ID, returning those that were present.
    pub fn remove_pending(&mut self, request_ids: &[String]) -> Vec<MatchRequest> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| request_ids.contains(&r.request_id));
        self.pending = kept;
        removed
    }

    /// Form a session from the oldest `match_size` requests if enough are
    /// pending. The session is recorded as active.
    pub fn try_form(&mut self, coordinator: &NodeId, now: DateTime<Utc>) -> Option<FormedMatch> {
        if self.pending.len() < self.match_size {
            return None;
        }

        // Stable sort keeps arrival order among equal timestamps.
        self.pending.sort_by_key(|r| r.timestamp);
        let requests: Vec<MatchRequest> = self.pending.drain(..self.match_size).collect();
        let players = requests.iter().map(|r| r.user_id.clone()).collect();

        let session = GameSession::playing(
            uuid::Uuid::new_v4().to_string(),
            players,
            coordinator.clone(),
            now,
        );
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Some(FormedMatch { session, requests })
    }

    /// Record a session formed elsewhere. Returns `false` if already known.
    pub fn adopt_session(&mut self, session: GameSession) -> bool {
        if self.sessions.contains_key(&session.session_id) {
            return false;
        }
        self.sessions.insert(session.session_id.clone(), session);
        true
    }

    /// Finish and remove a session.
    pub fn finish_session(&mut self, session_id: &str, now: DateTime<Utc>) -> Option<GameSession> {
        let mut session = self.sessions.remove(session_id)?;
        session.finish(now);
        Some(session)
    }

    /// Remove every session that started before `cutoff`.
    pub fn expire_sessions(&mut self, cutoff: DateTime<Utc>) -> Vec<GameSession> {
        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.start_time.is_some_and(|t| t < cutoff))
            .map(|s| s.session_id.clone())
            .collect();
        stale
            .iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect()
    }

    pub fn session(&self, session_id: &str) -> Option<&GameSession> {
        self.sessions.get(session_id)
    }

    pub fn pending(&self) -> &[MatchRequest] {
        &self.pending
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
