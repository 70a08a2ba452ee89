use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{bearer_token, client_ip, now, require_session, JsonBody};
use crate::errors::AppError;
use crate::models::{UserAccount, UserSession};
use crate::services::auth::{self, SignupInput};
use crate::services::otp;
use crate::state::AppState;

// POST /api/auth/signup
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub role: String,
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<SignupRequest>,
) -> Result<(StatusCode, Json<UserAccount>), AppError> {
    let user = auth::signup(
        &state,
        SignupInput {
            phone: &req.phone,
            password: &req.password,
            full_name: &req.full_name,
            role: &req.role,
        },
        now(),
    )?;
    Ok((StatusCode::CREATED, Json(user)))
}

// POST /api/auth/login
#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    token: String,
    expires_at: chrono::NaiveDateTime,
    user: UserAccount,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let (user, session) = auth::login(&state, &req.phone, &req.password, now())?;
    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        user,
    }))
}

// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Some(token) = bearer_token(&headers) {
        auth::logout(&state, token)?;
    }
    Ok(Json(json!({ "success": true })))
}

// GET /api/auth/session
pub async fn session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserSession>, AppError> {
    Ok(Json(require_session(&state, &headers)?))
}

// POST /api/auth/otp/send
#[derive(Deserialize)]
pub struct SendOtpRequest {
    #[serde(default)]
    pub phone: String,
}

pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<SendOtpRequest>,
) -> Result<Json<Value>, AppError> {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let ip = client_ip(&headers, peer, state.config.trust_proxy_headers);
    otp::send_otp(&state, &req.phone, &ip, now()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "if an account exists for this phone, a verification code has been sent",
    })))
}

// POST /api/auth/password/reset
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<ResetPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let ip = client_ip(&headers, peer, state.config.trust_proxy_headers);
    auth::reset_password(&state, &req.phone, &req.code, &req.new_password, &ip, now())?;
    Ok(Json(json!({ "success": true })))
}

// POST /api/auth/password/change
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<ChangePasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let session = require_session(&state, &headers)?;
    auth::change_password(
        &state,
        &session,
        &req.phone,
        &req.old_password,
        &req.new_password,
    )?;
    Ok(Json(json!({ "success": true })))
}
