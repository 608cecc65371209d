//! One-time verification code storage.
//!
//! Each channel holds at most one live code. Saving a new code replaces the
//! previous one and restarts its TTL. Expiry is enforced on read; codes that
//! are never read again are dropped by `purge_expired`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;

use crate::error::StoreError;
use crate::store::models::{Channel, VerificationCode};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait VerificationStore: Send + Sync + 'static {
    /// Overwrites any existing code for `channel`; expiry = now + ttl.
    async fn save_code(&self, channel: &Channel, code: &str, ttl: Duration) -> Result<(), StoreError>;

    /// True iff a non-expired code exists for `channel` and equals `candidate`.
    async fn verify_code(&self, channel: &Channel, candidate: &str) -> Result<bool, StoreError>;

    /// Returns the live code, or `StoreError::NotFound`.
    async fn get_code(&self, channel: &Channel) -> Result<String, StoreError>;

    /// Idempotent.
    async fn delete_code(&self, channel: &Channel) -> Result<(), StoreError>;

    /// Verifies and deletes in one step. Only one caller can consume a given code.
    async fn consume_code(&self, channel: &Channel, candidate: &str) -> Result<bool, StoreError>;

    /// Drops every expired code; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryVerificationStore {
    codes: DashMap<String, VerificationCode>,
}

impl MemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl VerificationStore for MemoryVerificationStore {
    async fn save_code(&self, channel: &Channel, code: &str, ttl: Duration) -> Result<(), StoreError> {
        let record = VerificationCode::new(channel.clone(), code.to_string(), ttl);
        self.codes.insert(channel.key(), record);
        Ok(())
    }

    async fn verify_code(&self, channel: &Channel, candidate: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let key = channel.key();
        let live = match self.codes.get(&key) {
            Some(record) if !record.is_expired_at(now) => Some(record.code == candidate),
            Some(_) => None,
            None => return Ok(false),
        };

        match live {
            Some(matched) => Ok(matched),
            None => {
                self.codes.remove_if(&key, |_, record| record.is_expired_at(now));
                Ok(false)
            }
        }
    }

    async fn get_code(&self, channel: &Channel) -> Result<String, StoreError> {
        let now = Utc::now();
        match self.codes.get(&channel.key()) {
            Some(record) if !record.is_expired_at(now) => Ok(record.code.clone()),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_code(&self, channel: &Channel) -> Result<(), StoreError> {
        self.codes.remove(&channel.key());
        Ok(())
    }

    async fn consume_code(&self, channel: &Channel, candidate: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let removed = self.codes.remove_if(&channel.key(), |_, record| {
            !record.is_expired_at(now) && record.code == candidate
        });
        Ok(removed.is_some())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let before = self.codes.len();
        self.codes.retain(|_, record| !record.is_expired_at(now));
        Ok(before.saturating_sub(self.codes.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration as TokioDuration};

    fn email(addr: &str) -> Channel {
        Channel::Email(addr.to_string())
    }

    #[tokio::test]
    async fn test_code_valid_until_ttl_elapses() {
        let store = MemoryVerificationStore::new();
        let channel = email("a@x.com");

        store.save_code(&channel, "a1b2c3", Duration::milliseconds(80)).await.unwrap();
        assert!(store.verify_code(&channel, "a1b2c3").await.unwrap());
        assert!(!store.verify_code(&channel, "000000").await.unwrap());

        sleep(TokioDuration::from_millis(120)).await;
        assert!(!store.verify_code(&channel, "a1b2c3").await.unwrap());
        assert!(matches!(store.get_code(&channel).await, Err(StoreError::NotFound)));
        assert!(store.is_empty(), "expired code should be dropped on read");
    }

    #[tokio::test]
    async fn test_new_code_replaces_old() {
        let store = MemoryVerificationStore::new();
        let channel = email("a@x.com");

        store.save_code(&channel, "aaaaaa", Duration::minutes(10)).await.unwrap();
        store.save_code(&channel, "bbbbbb", Duration::minutes(10)).await.unwrap();

        assert!(!store.verify_code(&channel, "aaaaaa").await.unwrap());
        assert!(store.verify_code(&channel, "bbbbbb").await.unwrap());
        assert_eq!(store.get_code(&channel).await.unwrap(), "bbbbbb");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_plain_verify_does_not_delete() {
        let store = MemoryVerificationStore::new();
        let channel = email("a@x.com");
        store.save_code(&channel, "123abc", Duration::minutes(10)).await.unwrap();

        assert!(store.verify_code(&channel, "123abc").await.unwrap());
        assert!(store.verify_code(&channel, "123abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let store = MemoryVerificationStore::new();
        let channel = email("a@x.com");
        store.save_code(&channel, "123abc", Duration::minutes(10)).await.unwrap();

        assert!(!store.consume_code(&channel, "wrong").await.unwrap());
        assert!(store.consume_code(&channel, "123abc").await.unwrap());
        assert!(!store.consume_code(&channel, "123abc").await.unwrap());
        assert!(!store.verify_code(&channel, "123abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryVerificationStore::new();
        let channel = Channel::Phone("+15550001111".into());
        store.save_code(&channel, "123456", Duration::minutes(10)).await.unwrap();

        store.delete_code(&channel).await.unwrap();
        store.delete_code(&channel).await.unwrap();
        assert!(!store.verify_code(&channel, "123456").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_drops_unread_expired_codes() {
        let store = MemoryVerificationStore::new();
        for i in 0..500 {
            store.save_code(&email(&format!("u{}@x.com", i)), "abcdef", Duration::milliseconds(1)).await.unwrap();
        }
        store.save_code(&email("live@x.com"), "123456", Duration::minutes(10)).await.unwrap();

        sleep(TokioDuration::from_millis(20)).await;
        assert_eq!(store.len(), 501, "nothing is reclaimed until a read or a purge");

        assert_eq!(store.purge_expired().await.unwrap(), 500);
        assert_eq!(store.len(), 1);
        assert!(store.verify_code(&email("live@x.com"), "123456").await.unwrap());
    }

    #[tokio::test]
    async fn test_email_and_phone_do_not_collide() {
        let store = MemoryVerificationStore::new();
        store.save_code(&email("x"), "aaaaaa", Duration::minutes(10)).await.unwrap();
        store.save_code(&Channel::Phone("x".into()), "111111", Duration::minutes(10)).await.unwrap();

        assert!(store.verify_code(&email("x"), "aaaaaa").await.unwrap());
        assert!(store.verify_code(&Channel::Phone("x".into()), "111111").await.unwrap());
    }
}
