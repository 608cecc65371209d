//! Refresh-session bookkeeping.
//!
//! A session row exists iff its refresh token is still redeemable. Deleting
//! the row revokes the token even though its signature keeps verifying.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::error::StoreError;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Upsert keyed by (user_id, session_id).
    async fn store_session(
        &self,
        user_id: Uuid,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Existence check. Independent of the token's own `exp` claim.
    async fn is_valid(&self, user_id: Uuid, session_id: &str) -> Result<bool, StoreError>;

    /// Idempotent delete.
    async fn revoke(&self, user_id: Uuid, session_id: &str) -> Result<(), StoreError>;

    /// Conditional delete. Returns true only for the caller that actually
    /// removed a live row, so concurrent callers cannot both succeed.
    async fn consume(&self, user_id: Uuid, session_id: &str) -> Result<bool, StoreError>;

    /// Deletes every session visible at scan time; returns how many were removed.
    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Drops every expired session; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

type SessionKey = (Uuid, String);

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionKey, DateTime<Utc>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self, user_id: Uuid) -> usize {
        self.sessions.iter().filter(|entry| entry.key().0 == user_id).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn store_session(
        &self,
        user_id: Uuid,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.sessions.insert((user_id, session_id.to_string()), expires_at);
        Ok(())
    }

    async fn is_valid(&self, user_id: Uuid, session_id: &str) -> Result<bool, StoreError> {
        let key = (user_id, session_id.to_string());
        let now = Utc::now();
        let live = match self.sessions.get(&key) {
            Some(expires_at) => *expires_at > now,
            None => return Ok(false),
        };
        if !live {
            self.sessions.remove_if(&key, |_, expires_at| *expires_at <= now);
        }
        Ok(live)
    }

    async fn revoke(&self, user_id: Uuid, session_id: &str) -> Result<(), StoreError> {
        self.sessions.remove(&(user_id, session_id.to_string()));
        Ok(())
    }

    async fn consume(&self, user_id: Uuid, session_id: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let removed = self.sessions.remove(&(user_id, session_id.to_string()));
        Ok(matches!(removed, Some((_, expires_at)) if expires_at > now))
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let snapshot: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in snapshot {
            if self.sessions.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, expires_at| *expires_at > now);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }
}
