//! Postgres-backed stores.
//!
//! Queries use the runtime `sqlx::query*` API so the crate builds without a
//! live database. TTL is carried on each row and checked in the `WHERE`
//! clause; `purge_expired` only reclaims space.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::models::{Channel, User};
use crate::store::session::SessionStore;
use crate::store::users::UserStore;
use crate::store::verification::VerificationStore;

/// Shared connection pool plus maintenance helpers.
#[derive(Clone)]
pub struct PgStores {
    pool: Arc<PgPool>,
}

impl PgStores {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: StdDuration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    pub fn users(&self) -> PgUserStore {
        PgUserStore { pool: self.pool.clone() }
    }

    pub fn sessions(&self) -> PgSessionStore {
        PgSessionStore { pool: self.pool.clone() }
    }

    pub fn verification(&self) -> PgVerificationStore {
        PgVerificationStore { pool: self.pool.clone() }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: Arc<PgPool>,
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<Uuid, StoreError> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, password_hash, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(id)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: Arc<PgPool>,
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn store_session(
        &self,
        user_id: Uuid,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (user_id, session_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, session_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(expires_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn is_valid(&self, user_id: Uuid, session_id: &str) -> Result<bool, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM refresh_sessions WHERE user_id = $1 AND session_id = $2 AND expires_at > $3",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.is_some())
    }

    async fn revoke(&self, user_id: Uuid, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refresh_sessions WHERE user_id = $1 AND session_id = $2")
            .bind(user_id)
            .bind(session_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn consume(&self, user_id: Uuid, session_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM refresh_sessions WHERE user_id = $1 AND session_id = $2 AND expires_at > $3",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgVerificationStore {
    pool: Arc<PgPool>,
}

#[async_trait]
impl VerificationStore for PgVerificationStore {
    async fn save_code(&self, channel: &Channel, code: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO verification_codes (channel, code, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (channel) DO UPDATE
                SET code = EXCLUDED.code,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(channel.key())
        .bind(code)
        .bind(now)
        .bind(now + ttl)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn verify_code(&self, channel: &Channel, candidate: &str) -> Result<bool, StoreError> {
        match self.get_code(channel).await {
            Ok(code) => Ok(code == candidate),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_code(&self, channel: &Channel) -> Result<String, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT code FROM verification_codes WHERE channel = $1 AND expires_at > $2",
        )
        .bind(channel.key())
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(|(code,)| code).ok_or(StoreError::NotFound)
    }

    async fn delete_code(&self, channel: &Channel) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM verification_codes WHERE channel = $1")
            .bind(channel.key())
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn consume_code(&self, channel: &Channel, candidate: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM verification_codes WHERE channel = $1 AND code = $2 AND expires_at > $3",
        )
        .bind(channel.key())
        .bind(candidate)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}
