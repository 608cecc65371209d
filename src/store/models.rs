use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Contact channel a verification code is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Channel {
    Email(String),
    Phone(String),
}

impl Channel {
    /// Storage key; email and phone namespaces never collide.
    pub fn key(&self) -> String {
        match self {
            Channel::Email(email) => format!("verify:{}", email),
            Channel::Phone(phone) => format!("phone_verification:{}", phone),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email(email) => write!(f, "email:{}", email),
            Channel::Phone(phone) => write!(f, "phone:{}", phone),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationCode {
    pub channel: Channel,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationCode {
    pub fn new(channel: Channel, code: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            channel,
            code,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            created_at: Utc::now(),
        }
    }
}

/// Server-side record backing one redeemable refresh token.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RefreshSession {
    pub user_id: Uuid,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
