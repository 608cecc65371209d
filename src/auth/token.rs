//! Access and refresh token minting.
//!
//! Access and refresh tokens are signed with independent HMAC secrets, so a
//! leaked access secret cannot forge refresh tokens and vice versa. Expiry is
//! checked here, at whole-second granularity, with no skew allowance.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::codes;
use crate::config::AuthConfig;
use crate::error::{AppError, AuthError};
use crate::store::RefreshSession;

pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,  // User ID
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,  // Session ID
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::InvalidToken)
    }
}

impl RefreshClaims {
    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::InvalidToken)
    }
}

trait Expiring {
    fn exp(&self) -> i64;
}

impl Expiring for AccessClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl Expiring for RefreshClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// A freshly minted refresh token and the session row that backs it.
#[derive(Debug, Clone)]
pub struct IssuedRefresh {
    pub token: String,
    pub session: RefreshSession,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub struct TokenIssuer {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl TokenIssuer {
    pub fn new(access_secret: &str, refresh_secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is compared manually against the caller's clock.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            access: SigningKeys::from_secret(access_secret),
            refresh: SigningKeys::from_secret(refresh_secret),
            access_ttl,
            refresh_ttl,
            validation,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.access_secret,
            &config.refresh_secret,
            Duration::seconds(config.access_ttl_secs),
            Duration::seconds(config.refresh_ttl_secs),
        )
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, user_id: Uuid) -> Result<String, AppError> {
        self.issue_access_at(user_id, Utc::now())
    }

    pub fn issue_access_at(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<String, AppError> {
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        sign(&claims, &self.access.encoding)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> Result<IssuedRefresh, AppError> {
        self.issue_refresh_at(user_id, Utc::now())
    }

    pub fn issue_refresh_at(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<IssuedRefresh, AppError> {
        let session_id = codes::session_id();
        let expires_at = now + self.refresh_ttl;
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: session_id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = sign(&claims, &self.refresh.encoding)?;

        Ok(IssuedRefresh {
            token,
            session: RefreshSession {
                user_id,
                session_id,
                expires_at,
            },
        })
    }

    /// Signature and expiry only; never consults a store.
    pub fn validate_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.validate_access_at(token, Utc::now())
    }

    pub fn validate_access_at(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AuthError> {
        self.verify(token, &self.access.decoding, now)
    }

    /// Signature and expiry only. The caller must still check the session
    /// store before trusting the session id.
    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.validate_refresh_at(token, Utc::now())
    }

    pub fn validate_refresh_at(&self, token: &str, now: DateTime<Utc>) -> Result<RefreshClaims, AuthError> {
        self.verify(token, &self.refresh.decoding, now)
    }

    fn verify<C>(&self, token: &str, key: &DecodingKey, now: DateTime<Utc>) -> Result<C, AuthError>
    where
        C: DeserializeOwned + Expiring,
    {
        let claims = decode::<C>(token, key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        if claims.exp() > now.timestamp() {
            Ok(claims)
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

fn sign<C: Serialize>(claims: &C, key: &EncodingKey) -> Result<String, AppError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| AppError::InternalError(format!("Token signing failed: {}", e)))
}
