use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration as StdDuration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::codes;
use crate::auth::password::{self, validate_password_strength};
use crate::auth::token::{AccessClaims, TokenIssuer};
use crate::config::Settings;
use crate::error::{AppError, AuthError, DeliveryError, StoreError};
use crate::notify::{Mailer, MailerBackend, SmsBackend, SmsProvider};
use crate::store::{
    Channel, MemorySessionStore, MemoryUserStore, MemoryVerificationStore, PgSessionStore,
    PgUserStore, PgVerificationStore, SessionStore, User, UserStore, VerificationStore,
};

/// The set of collaborators an `AuthService` is assembled from. Chosen once
/// at startup; business logic is generic over it.
pub trait Backend: Send + Sync + 'static {
    type Verification: VerificationStore;
    type Sessions: SessionStore;
    type Users: UserStore;
    type Mailer: Mailer;
    type Sms: SmsProvider;
}

/// Everything in process memory. Used for tests and single-node development.
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    type Verification = MemoryVerificationStore;
    type Sessions = MemorySessionStore;
    type Users = MemoryUserStore;
    type Mailer = MailerBackend;
    type Sms = SmsBackend;
}

pub struct PostgresBackend;

impl Backend for PostgresBackend {
    type Verification = PgVerificationStore;
    type Sessions = PgSessionStore;
    type Users = PgUserStore;
    type Mailer = MailerBackend;
    type Sms = SmsBackend;
}

#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub verification_ttl: Duration,
    /// Deadline for each individual store or provider call.
    pub call_timeout: StdDuration,
}

impl From<&Settings> for AuthPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            verification_ttl: Duration::seconds(settings.auth.verification_ttl_secs),
            call_timeout: settings.storage.timeout(),
        }
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            verification_ttl: Duration::minutes(10),
            call_timeout: StdDuration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Result of a passwordless code login.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CodeAuthOutcome {
    Authenticated {
        user_id: Uuid,
        #[serde(flatten)]
        tokens: TokenPair,
    },
    SignupRequired,
}

/// The credential state machine: verification codes, sign-up, login,
/// refresh rotation and logout.
pub struct AuthService<B: Backend> {
    verification: B::Verification,
    sessions: B::Sessions,
    users: B::Users,
    mailer: B::Mailer,
    sms: B::Sms,
    tokens: TokenIssuer,
    policy: AuthPolicy,
}

impl<B: Backend> AuthService<B> {
    pub fn new(
        verification: B::Verification,
        sessions: B::Sessions,
        users: B::Users,
        mailer: B::Mailer,
        sms: B::Sms,
        tokens: TokenIssuer,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            verification,
            sessions,
            users,
            mailer,
            sms,
            tokens,
            policy,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn sessions(&self) -> &B::Sessions {
        &self.sessions
    }

    pub fn verification(&self) -> &B::Verification {
        &self.verification
    }

    /// Runs one store call under the configured deadline.
    async fn store_call<T, F>(&self, call: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(StoreError::Timeout.into()),
        }
    }

    async fn delivery_call<F>(&self, call: F, timed_out: DeliveryError) -> Result<(), AppError>
    where
        F: Future<Output = Result<(), DeliveryError>>,
    {
        match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(timed_out.into()),
        }
    }

    pub async fn send_verification(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email)?;
        let channel = Channel::Email(email.clone());
        let code = codes::email_code();

        self.store_call(self.verification.save_code(&channel, &code, self.policy.verification_ttl))
            .await?;

        let body = format!("Your verification code is: {}", code);
        let sent = self
            .delivery_call(
                self.mailer.send(&email, "Email Verification", &body),
                DeliveryError::Mail("timed out".into()),
            )
            .await;

        if let Err(e) = sent {
            // The stored code stays live so a retry can resend it.
            warn!(email = %email, error = %e, "Verification mail failed; code kept");
            return Err(e);
        }

        info!(email = %email, "Verification code sent");
        Ok(())
    }

    /// Plain check; never consumes the code.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<bool, AppError> {
        let channel = Channel::Email(normalize_email(email)?);
        self.store_call(self.verification.verify_code(&channel, code)).await
    }

    pub async fn send_phone_verification(&self, phone_number: &str) -> Result<(), AppError> {
        let phone = normalize_phone(phone_number)?;
        let channel = Channel::Phone(phone.clone());
        let code = codes::phone_code();

        self.store_call(self.verification.save_code(&channel, &code, self.policy.verification_ttl))
            .await?;

        self.delivery_call(
            self.sms.send_verification_sms(&phone, &code),
            DeliveryError::Sms("timed out".into()),
        )
        .await
        .map_err(|e| {
            warn!(phone = %phone, error = %e, "Verification SMS failed; code kept");
            e
        })?;

        info!(phone = %phone, "Phone verification code sent");
        Ok(())
    }

    /// Consumes the phone code on a successful match.
    pub async fn verify_phone_code(&self, phone_number: &str, code: &str) -> Result<bool, AppError> {
        let channel = Channel::Phone(normalize_phone(phone_number)?);
        self.store_call(self.verification.consume_code(&channel, code)).await
    }

    /// The code is checked up front but only deleted once the user row
    /// exists, so a failed insert leaves it usable for a retry. Emails are
    /// unique, which keeps one code from creating two accounts.
    pub async fn sign_up(&self, email: &str, password: &str, code: &str) -> Result<Uuid, AppError> {
        let email = normalize_email(email)?;
        validate_password_strength(password)?;

        let channel = Channel::Email(email.clone());
        if !self.store_call(self.verification.verify_code(&channel, code)).await? {
            warn!(email = %email, "Sign-up rejected: invalid verification code");
            return Err(AuthError::InvalidVerificationCode.into());
        }

        let password_hash = hash_blocking(password.to_string()).await?;
        let user = User::new(email.clone(), password_hash);
        let user_id = self.store_call(self.users.create(&user)).await?;

        if let Err(e) = self.store_call(self.verification.consume_code(&channel, code)).await {
            warn!(email = %email, error = %e, "Signed-up user's code could not be cleared");
        }

        info!(email = %email, user_id = %user_id, "User created");
        Ok(user_id)
    }

    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AppError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let user = self.store_call(self.users.get_by_email(&email)).await?;

        let user = match user {
            Some(user) => user,
            None => {
                dummy_verify_blocking(password.to_string()).await;
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !verify_blocking(user.password_hash.clone(), password.to_string()).await? {
            return Err(AuthError::InvalidCredentials.into());
        }

        let tokens = self.issue_pair(user.id).await?;
        info!(user_id = %user.id, "Login succeeded");
        Ok(LoginOutcome { user_id: user.id, tokens })
    }

    /// Single-use rotation: the presented session is consumed with a
    /// conditional delete, and only the caller that removed it gets a new pair.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self.tokens.validate_refresh(refresh_token)?;
        let user_id = claims.user_id()?;

        if !self.store_call(self.sessions.consume(user_id, &claims.jti)).await? {
            warn!(user_id = %user_id, "Refresh rejected: session revoked, expired or already rotated");
            return Err(AuthError::InvalidOrExpiredSession.into());
        }

        let tokens = self.issue_pair(user_id).await?;
        info!(user_id = %user_id, "Refresh token rotated");
        Ok(tokens)
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), AppError> {
        let claims = self.tokens.validate_refresh(refresh_token)?;
        let user_id = claims.user_id()?;

        self.store_call(self.sessions.revoke(user_id, &claims.jti)).await?;
        info!(user_id = %user_id, "Session revoked");
        Ok(())
    }

    /// Revokes every refresh session of the access token's subject.
    pub async fn logout_all(&self, access_token: &str) -> Result<u64, AppError> {
        let claims = self.tokens.validate_access(access_token)?;
        let user_id = claims.user_id()?;

        let revoked = self.store_call(self.sessions.revoke_all(user_id)).await?;
        info!(user_id = %user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Stateless access-token check for authenticated requests.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AppError> {
        Ok(self.tokens.validate_access(access_token)?)
    }

    /// Passwordless login with an email code. Existing users get a token
    /// pair and the code is consumed; unknown emails keep their code so it
    /// can be used for sign-up.
    pub async fn verify_and_authenticate(&self, email: &str, code: &str) -> Result<CodeAuthOutcome, AppError> {
        let email = normalize_email(email)?;
        let channel = Channel::Email(email.clone());

        if !self.store_call(self.verification.verify_code(&channel, code)).await? {
            return Err(AuthError::InvalidVerificationCode.into());
        }

        let user = match self.store_call(self.users.get_by_email(&email)).await? {
            Some(user) => user,
            None => return Ok(CodeAuthOutcome::SignupRequired),
        };

        if !self.store_call(self.verification.consume_code(&channel, code)).await? {
            return Err(AuthError::InvalidVerificationCode.into());
        }

        let tokens = self.issue_pair(user.id).await?;
        info!(user_id = %user.id, "Code login succeeded");
        Ok(CodeAuthOutcome::Authenticated { user_id: user.id, tokens })
    }

    /// Reclaims expired codes and sessions. Reads already ignore them.
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let codes = self.store_call(self.verification.purge_expired()).await?;
        let sessions = self.store_call(self.sessions.purge_expired()).await?;
        Ok(codes + sessions)
    }

    async fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, AppError> {
        let access_token = self.tokens.issue_access(user_id)?;
        let refresh = self.tokens.issue_refresh(user_id)?;
        let expires_at: DateTime<Utc> = refresh.session.expires_at;

        self.store_call(self.sessions.store_session(user_id, &refresh.session.session_id, expires_at))
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }
}

impl AuthService<MemoryBackend> {
    pub fn in_memory(settings: &Settings) -> Result<Self, AppError> {
        Ok(Self::new(
            MemoryVerificationStore::new(),
            MemorySessionStore::new(),
            MemoryUserStore::new(),
            MailerBackend::from_config(&settings.notify)?,
            SmsBackend::from_config(&settings.notify)?,
            TokenIssuer::from_config(&settings.auth),
            AuthPolicy::from(settings),
        ))
    }
}

impl AuthService<PostgresBackend> {
    pub fn postgres(settings: &Settings, stores: &crate::store::PgStores) -> Result<Self, AppError> {
        Ok(Self::new(
            stores.verification(),
            stores.sessions(),
            stores.users(),
            MailerBackend::from_config(&settings.notify)?,
            SmsBackend::from_config(&settings.notify)?,
            TokenIssuer::from_config(&settings.auth),
            AuthPolicy::from(settings),
        ))
    }
}

/// Trimmed and lowercased; the result keys both the verification channel
/// and the user row.
fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::ValidationError("Invalid email address".into())),
    }
}

fn normalize_phone(phone: &str) -> Result<String, AppError> {
    let phone = phone.trim();
    if phone.len() >= 8 && phone.starts_with('+') && phone[1..].chars().all(|c| c.is_ascii_digit()) {
        Ok(phone.to_string())
    } else {
        Err(AppError::ValidationError("Invalid phone number format".into()))
    }
}

async fn hash_blocking(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
}

async fn verify_blocking(hash: String, password: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || password::verify_password(&hash, &password))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))
}

async fn dummy_verify_blocking(password: String) {
    let _ = tokio::task::spawn_blocking(move || password::verify_against_dummy(&password)).await;
}
