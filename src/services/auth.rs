use chrono::{Duration, NaiveDateTime};
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Role, UserAccount, UserSession};
use crate::services::otp::{self, OtpPolicy};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "invalid phone or password";
const PHONE_TAKEN: &str = "an account with this phone already exists";
const MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 128;
const LOCAL_DIGITS: usize = 9;

/// Strips whitespace and checks the `+<country code><9 digits>` shape.
pub fn normalize_phone(raw: &str, country_code: &str) -> Result<String, AppError> {
    let phone: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let local = phone
        .strip_prefix('+')
        .and_then(|rest| rest.strip_prefix(country_code));

    match local {
        Some(digits) if digits.len() == LOCAL_DIGITS && digits.chars().all(|c| c.is_ascii_digit()) => {
            Ok(phone)
        }
        _ => Err(AppError::Validation(format!(
            "phone must look like +{country_code} followed by {LOCAL_DIGITS} digits"
        ))),
    }
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(AppError::Validation(format!(
            "password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn generate_session_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("{}_{suffix}", Uuid::new_v4().simple())
}

pub struct SignupInput<'a> {
    pub phone: &'a str,
    pub password: &'a str,
    pub full_name: &'a str,
    pub role: &'a str,
}

pub fn signup(
    state: &AppState,
    input: SignupInput<'_>,
    now: NaiveDateTime,
) -> Result<UserAccount, AppError> {
    let phone = normalize_phone(input.phone, &state.config.phone_country_code)?;
    validate_password(input.password)?;
    let full_name = input.full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::Validation("full name is required".to_string()));
    }
    let role = Role::parse(input.role)
        .ok_or_else(|| AppError::Validation("role must be customer or barber".to_string()))?;

    {
        let db = state.db()?;
        if queries::get_user_by_phone(&db, &phone)?.is_some() {
            return Err(AppError::Conflict(PHONE_TAKEN.to_string()));
        }
    }

    let user = UserAccount {
        id: Uuid::new_v4().to_string(),
        phone,
        password_hash: state.hasher.hash(input.password)?,
        full_name: full_name.to_string(),
        role,
        created_at: now,
    };

    {
        let db = state.db()?;
        queries::insert_user(&db, &user)
            .map_err(|e| AppError::conflict_on_unique(e, PHONE_TAKEN))?;
    }

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "account created");
    Ok(user)
}

pub fn login(
    state: &AppState,
    raw_phone: &str,
    password: &str,
    now: NaiveDateTime,
) -> Result<(UserAccount, UserSession), AppError> {
    let phone = normalize_phone(raw_phone, &state.config.phone_country_code)?;

    let user = {
        let db = state.db()?;
        queries::get_user_by_phone(&db, &phone)?
    };

    let stored_hash = match &user {
        Some(u) => u.password_hash.as_str(),
        None => state.hasher.dummy_hash(),
    };
    let verified = state.hasher.verify(password, stored_hash);

    let Some(user) = user.filter(|_| verified) else {
        tracing::warn!(phone = %phone, "failed login");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    };

    let session = UserSession {
        token: generate_session_token(),
        user_id: user.id.clone(),
        phone: user.phone.clone(),
        role: user.role,
        created_at: now,
        expires_at: now + Duration::days(state.config.session_ttl_days),
    };

    {
        let db = state.db()?;
        queries::insert_session(&db, &session)?;
    }

    tracing::info!(user_id = %user.id, "login");
    Ok((user, session))
}

/// Resolves a bearer token to its session. Expired sessions are deleted on
/// sight.
pub fn verify_session(
    state: &AppState,
    token: &str,
    now: NaiveDateTime,
) -> Result<UserSession, AppError> {
    let db = state.db()?;
    let Some(session) = queries::get_session(&db, token)? else {
        return Err(AppError::Unauthorized("invalid session token".to_string()));
    };

    if session.is_expired(now) {
        queries::delete_session(&db, token)?;
        return Err(AppError::Unauthorized(
            "session expired, please log in again".to_string(),
        ));
    }

    Ok(session)
}

pub fn logout(state: &AppState, token: &str) -> Result<(), AppError> {
    let db = state.db()?;
    if queries::delete_session(&db, token)? {
        tracing::info!("logout");
    }
    Ok(())
}

/// Changes the caller's own password. Other sessions of the account are
/// revoked; the calling session stays valid.
pub fn change_password(
    state: &AppState,
    session: &UserSession,
    raw_phone: &str,
    old_password: &str,
    new_password: &str,
) -> Result<(), AppError> {
    let phone = normalize_phone(raw_phone, &state.config.phone_country_code)?;
    if phone != session.phone {
        return Err(AppError::Forbidden(
            "you can only change your own password".to_string(),
        ));
    }
    validate_password(new_password)?;

    let user = {
        let db = state.db()?;
        queries::get_user(&db, &session.user_id)?
    }
    .ok_or_else(|| AppError::NotFound("account not found".to_string()))?;

    if !state.hasher.verify(old_password, &user.password_hash) {
        tracing::warn!(user_id = %user.id, "password change with wrong current password");
        return Err(AppError::Unauthorized(
            "current password is incorrect".to_string(),
        ));
    }

    let hash = state.hasher.hash(new_password)?;
    let revoked = {
        let db = state.db()?;
        queries::update_password_hash(&db, &user.id, &hash)?;
        queries::delete_sessions_for_user(&db, &user.id, Some(&session.token))?
    };

    tracing::info!(user_id = %user.id, revoked, "password changed");
    Ok(())
}

/// Consumes a password-reset code, then replaces the password and revokes
/// every session of the account.
pub fn reset_password(
    state: &AppState,
    raw_phone: &str,
    code: &str,
    new_password: &str,
    ip: &str,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    let phone = normalize_phone(raw_phone, &state.config.phone_country_code)?;
    validate_password(new_password)?;
    let policy = OtpPolicy::from_config(&state.config);

    let user = {
        let db = state.db()?;
        otp::verify(&db, &state.config.otp_secret, &policy, &phone, code, ip, now)?;
        queries::get_user_by_phone(&db, &phone)?
    }
    .ok_or_else(|| AppError::NotFound("verification code not found".to_string()))?;

    let hash = state.hasher.hash(new_password)?;
    let revoked = {
        let db = state.db()?;
        queries::update_password_hash(&db, &user.id, &hash)?;
        queries::delete_sessions_for_user(&db, &user.id, None)?
    };

    tracing::info!(user_id = %user.id, revoked, "password reset");
    Ok(())
}
