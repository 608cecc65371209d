pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod store;
pub mod telemetry;

use std::sync::Arc;
use actix_web::HttpResponse;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthService, Backend, MemoryBackend, PostgresBackend, RateGovernor, RateLimitConfig};
pub use store::{PgStores, User};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers. Owns the rate governor, so
/// its bucket map lives exactly as long as the server.
pub struct AppState<B: Backend> {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService<B>>,
    pub governor: Arc<RateGovernor>,
}

impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            auth_service: self.auth_service.clone(),
            governor: self.governor.clone(),
        }
    }
}

impl<B: Backend> AppState<B> {
    pub fn new(config: Settings, auth_service: AuthService<B>) -> Self {
        let governor = RateGovernor::new(RateLimitConfig::from(&config.rate_limit));
        Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            governor: Arc::new(governor),
        }
    }
}

impl AppState<MemoryBackend> {
    pub fn in_memory(config: Settings) -> Result<Self> {
        let auth_service = AuthService::in_memory(&config)?;
        Ok(Self::new(config, auth_service))
    }
}

impl AppState<PostgresBackend> {
    pub async fn connect(config: Settings) -> Result<(Self, PgStores)> {
        let stores = PgStores::connect(
            &config.database.url,
            config.database.max_connections,
            std::time::Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?;
        stores.migrate().await?;

        let auth_service = AuthService::postgres(&config, &stores)?;
        Ok((Self::new(config, auth_service), stores))
    }
}
