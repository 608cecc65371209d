use actix_web::{dev::Payload, web, FromRequest, HttpRequest, HttpResponse};
use futures::future::{ready, Ready};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::rate_limit::client_identity;
use crate::auth::service::Backend;
use crate::error::{AppError, AuthError};
use crate::AppState;

/// Registers every auth route for the given backend.
pub fn configure<B: Backend>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/verification/send", web::post().to(send_verification::<B>))
            .route("/verification/verify", web::post().to(verify_code::<B>))
            .route("/verification/authenticate", web::post().to(authenticate_with_code::<B>))
            .route("/phone/send", web::post().to(send_phone_verification::<B>))
            .route("/phone/verify", web::post().to(verify_phone_code::<B>))
            .route("/signup", web::post().to(sign_up::<B>))
            .route("/login", web::post().to(login::<B>))
            .route("/refresh", web::post().to(refresh::<B>))
            .route("/logout", web::post().to(logout::<B>))
            .route("/logout-all", web::post().to(logout_all::<B>))
            .route("/me", web::get().to(me::<B>)),
    );
}

/// Rate Governor admission check for token-issuing endpoints.
fn admit<B: Backend>(req: &HttpRequest, state: &AppState<B>) -> Result<(), AppError> {
    let client = client_identity(
        req.peer_addr().map(|addr| addr.ip()),
        header_str(req, "x-forwarded-for"),
        header_str(req, "x-real-ip"),
    );

    if state.governor.allow(&client) {
        Ok(())
    } else {
        warn!(client = %client, path = %req.path(), "Rate limit exceeded");
        Err(AuthError::RateLimited.into())
    }
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|h| h.to_str().ok())
}

/// `Authorization: Bearer <token>` extractor. Validation happens in the handler.
pub struct BearerToken(pub String);

impl FromRequest for BearerToken {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = req.headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        ready(token.map(BearerToken).ok_or(AppError::AuthError(AuthError::InvalidToken)))
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendVerificationRequest {
    pub email: String,
}

pub async fn send_verification<B: Backend>(
    req: HttpRequest,
    body: web::Json<SendVerificationRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    admit(&req, &state)?;
    info!("Received verification request for email: {}", body.email);

    match state.auth_service.send_verification(&body.email).await {
        Ok(()) => Ok(HttpResponse::Ok().json(MessageResponse::new("Verification code sent"))),
        Err(e) => {
            error!("SendVerification failed for email: {}: {}", body.email, e);
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyCodeResponse {
    pub ok: bool,
}

pub async fn verify_code<B: Backend>(
    body: web::Json<VerifyCodeRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let ok = state.auth_service.verify_code(&body.email, &body.code).await?;
    Ok(HttpResponse::Ok().json(VerifyCodeResponse { ok }))
}

pub async fn authenticate_with_code<B: Backend>(
    req: HttpRequest,
    body: web::Json<VerifyCodeRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    admit(&req, &state)?;
    let outcome = state.auth_service.verify_and_authenticate(&body.email, &body.code).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct SendPhoneVerificationRequest {
    pub phone_number: String,
}

pub async fn send_phone_verification<B: Backend>(
    req: HttpRequest,
    body: web::Json<SendPhoneVerificationRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    admit(&req, &state)?;
    state.auth_service.send_phone_verification(&body.phone_number).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Verification code sent")))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPhoneRequest {
    pub phone_number: String,
    pub code: String,
}

pub async fn verify_phone_code<B: Backend>(
    body: web::Json<VerifyPhoneRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let ok = state.auth_service.verify_phone_code(&body.phone_number, &body.code).await?;
    Ok(HttpResponse::Ok().json(VerifyCodeResponse { ok }))
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub user_id: Uuid,
}

pub async fn sign_up<B: Backend>(
    body: web::Json<SignUpRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    info!("Received sign-up request for email: {}", body.email);

    match state.auth_service.sign_up(&body.email, &body.password, &body.code).await {
        Ok(user_id) => Ok(HttpResponse::Created().json(SignUpResponse { user_id })),
        Err(e) => {
            error!("Sign-up failed for email: {}: {}", body.email, e);
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login<B: Backend>(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    admit(&req, &state)?;
    info!("Received login request for email: {}", body.email);

    match state.auth_service.login(&body.email, &body.password).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome)),
        Err(e) => {
            error!("Login failed for email: {}: {}", body.email, e);
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh<B: Backend>(
    req: HttpRequest,
    body: web::Json<RefreshRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    admit(&req, &state)?;
    let tokens = state.auth_service.refresh_token(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

pub async fn logout<B: Backend>(
    body: web::Json<RefreshRequest>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.logout(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Successfully logged out")))
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

pub async fn logout_all<B: Backend>(
    token: BearerToken,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let revoked = state.auth_service.logout_all(&token.0).await?;
    Ok(HttpResponse::Ok().json(LogoutAllResponse { revoked }))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub expires_at: i64,
}

pub async fn me<B: Backend>(
    token: BearerToken,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let claims = state.auth_service.authenticate(&token.0)?;
    Ok(HttpResponse::Ok().json(MeResponse {
        user_id: claims.sub,
        expires_at: claims.exp,
    }))
}
