pub mod auth;
pub mod bookings;
pub mod health;
pub mod slots;

use std::net::SocketAddr;

use axum::extract::FromRequest;
use axum::http::{header, HeaderMap};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::errors::AppError;
use crate::models::slot::{parse_date, parse_time};
use crate::models::{Role, UserSession};
use crate::services::auth::verify_session;
use crate::state::AppState;

/// `axum::Json` whose rejections render as a 400 `{error}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub(crate) fn require_session(state: &AppState, headers: &HeaderMap) -> Result<UserSession, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    verify_session(state, token, now())
}

/// A present but invalid token is still an error; only its absence means
/// the caller is anonymous.
pub(crate) fn optional_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<UserSession>, AppError> {
    match bearer_token(headers) {
        Some(token) => verify_session(state, token, now()).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn require_barber(state: &AppState, headers: &HeaderMap) -> Result<UserSession, AppError> {
    let session = require_session(state, headers)?;
    if session.role != Role::Barber {
        return Err(AppError::Forbidden(
            "only barbers can manage slots".to_string(),
        ));
    }
    Ok(session)
}

/// Key for per-IP rate limits. Proxy headers are honoured only when the
/// deployment says a trusted proxy sets them; otherwise the socket peer is
/// used.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let forwarded = if trust_proxy {
        header_value("x-forwarded-for").or_else(|| header_value("x-real-ip"))
    } else {
        None
    };

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn date_field(name: &str, value: &str) -> Result<NaiveDate, AppError> {
    parse_date(value).map_err(|_| AppError::Validation(format!("{name} must be YYYY-MM-DD")))
}

pub(crate) fn time_field(name: &str, value: &str) -> Result<NaiveTime, AppError> {
    parse_time(value).map_err(|_| AppError::Validation(format!("{name} must be HH:MM")))
}

pub(crate) fn required<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, AppError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{name} is required")))
}
