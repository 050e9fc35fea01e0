//! Per-sender sliding-window admission control.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Sliding-window rate limiter keyed by sender ID.
#[derive(Debug)]
pub struct RateLimiter {
    max_messages: usize,
    window: Duration,
    windows: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            windows: HashMap::new(),
        }
    }

    /// Admit or reject a message from `sender` at the current instant.
    pub fn admit(&mut self, sender: &str) -> bool {
        self.admit_at(sender, Instant::now())
    }

    /// Admit or reject a message from `sender` at `now`.
    ///
    /// Timestamps older than the window are pruned first; the message is
    /// admitted (and recorded) only while fewer than `max_messages` remain.
    pub fn admit_at(&mut self, sender: &str, now: Instant) -> bool {
        let window = self.window;
        let stamps = self.windows.entry(sender.to_string()).or_default();
        while stamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            stamps.pop_front();
        }

        if stamps.len() >= self.max_messages {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Drop senders whose windows hold no live timestamps. Returns the
    /// number of senders removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.windows.len();
        self.windows.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window)
        });
        before - self.windows.len()
    }

    /// Number of senders currently tracked.
    pub fn tracked_senders(&self) -> usize {
        self.windows.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
