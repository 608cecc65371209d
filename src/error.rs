use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Storage error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Delivery error: {0}")]
    DeliveryError(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    /// True when the failure came from an unreachable or slow backing store
    /// and the same request may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::StoreError(StoreError::Unavailable(_)) | AppError::StoreError(StoreError::Timeout)
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::StoreError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl AppError {
    /// Text safe to show a client. Store, provider and internal detail stays
    /// in the logs.
    pub fn client_message(&self) -> String {
        match self {
            AppError::AuthError(_) | AppError::ValidationError(_) => self.to_string(),
            AppError::StoreError(StoreError::Duplicate) => "Account already exists".to_string(),
            AppError::StoreError(StoreError::NotFound) => "Record not found".to_string(),
            e if e.is_transient() => "Service temporarily unavailable".to_string(),
            AppError::DeliveryError(_) => "Delivery failed".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }

        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.client_message()
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                AuthError::InvalidOrExpiredSession => StatusCode::UNAUTHORIZED,
                AuthError::InvalidVerificationCode => StatusCode::BAD_REQUEST,
                AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            },
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::StoreError(StoreError::Duplicate) => StatusCode::CONFLICT,
            AppError::StoreError(StoreError::NotFound) => StatusCode::NOT_FOUND,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DeliveryError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid verification code")]
    InvalidVerificationCode,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid or expired session")]
    InvalidOrExpiredSession,

    #[error("Rate limited")]
    RateLimited,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Backing store call timed out")]
    Timeout,

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,

    #[error("Query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Duplicate,
            _ => StoreError::Query(err.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Mail send failed: {0}")]
    Mail(String),

    #[error("SMS send failed: {0}")]
    Sms(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Mail(err.to_string())
    }
}
