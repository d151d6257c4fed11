//! Per-owner conversation state for the chat interface.
//!
//! The chat layer walks users through a short registration flow (pick a
//! market, optionally a token, then a threshold). That in-flight state
//! lives here, keyed by owner, with a bounded lifetime so abandoned
//! conversations do not accumulate. The map is passed by reference into
//! the interface layer rather than living as process-wide state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::time::Duration;

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

/// Where an owner currently is in the registration flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    AwaitingMarketId,
    AwaitingTokenId,
    AwaitingThreshold,
}

/// One owner's in-flight registration conversation
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub step: SessionStep,
    pub market_id: Option<String>,
    pub market_title: Option<String>,
    pub token_id: Option<String>,
    pub threshold_pct: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    fn new(step: SessionStep) -> Self {
        Self {
            step,
            market_id: None,
            market_title: None,
            token_id: None,
            threshold_pct: None,
            updated_at: Utc::now(),
        }
    }
}

/// Concurrent session store with TTL-bounded entries
pub struct SessionMap {
    sessions: DashMap<i64, ChatSession>,
    ttl: Duration,
}

impl SessionMap {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }

    /// Start (or restart) a conversation for an owner
    pub fn begin(&self, owner_id: i64, step: SessionStep) {
        self.sessions.insert(owner_id, ChatSession::new(step));
    }

    /// Current session, if one exists and has not expired
    pub fn get(&self, owner_id: i64) -> Option<ChatSession> {
        let expired = match self.sessions.get(&owner_id) {
            Some(session) => self.is_expired(&session),
            None => return None,
        };

        if expired {
            self.sessions.remove(&owner_id);
            return None;
        }

        self.sessions.get(&owner_id).map(|s| s.value().clone())
    }

    /// Mutate a live session; refreshes its lifetime. Returns false when
    /// no live session exists.
    pub fn update<F>(&self, owner_id: i64, f: F) -> bool
    where
        F: FnOnce(&mut ChatSession),
    {
        match self.sessions.get_mut(&owner_id) {
            Some(mut session) if !self.is_expired(&session) => {
                f(&mut session);
                session.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Drop an owner's conversation
    pub fn clear(&self, owner_id: i64) {
        self.sessions.remove(&owner_id);
    }

    /// Remove expired sessions; returns how many were dropped
    pub fn prune_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !self.is_expired(session));
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_expired(&self, session: &ChatSession) -> bool {
        let age = Utc::now().signed_duration_since(session.updated_at);
        age >= chrono::Duration::seconds(self.ttl.as_secs() as i64)
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}
