use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Duration, NaiveDateTime};
use hmac::{Hmac, Mac};
use rand::{Rng, RngCore};
use rusqlite::Connection;
use sha2::Sha256;

use crate::config::AppConfig;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{OtpPurpose, OtpRecord};
use crate::services::auth::normalize_phone;
use crate::services::rate_limit::{self, LimitCheck, RateLimit};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct OtpPolicy {
    pub ttl: Duration,
    pub max_attempts: i64,
    pub per_phone: RateLimit,
    pub per_ip: RateLimit,
    pub cooldown: RateLimit,
}

impl OtpPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ttl: Duration::minutes(config.otp_ttl_minutes),
            max_attempts: config.otp_max_attempts,
            per_phone: RateLimit::per_hour(config.otp_phone_limit_per_hour),
            per_ip: RateLimit::per_hour(config.otp_ip_limit_per_hour),
            cooldown: RateLimit::new(1, Duration::seconds(config.otp_resend_cooldown_secs)),
        }
    }
}

pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

fn keyed_mac(secret: &str, salt: &[u8], phone: &str, code: &str) -> anyhow::Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("unusable OTP secret: {e}"))?;
    mac.update(salt);
    mac.update(phone.as_bytes());
    mac.update(code.as_bytes());
    Ok(mac)
}

fn code_matches(secret: &str, record: &OtpRecord, code: &str) -> anyhow::Result<bool> {
    let salt = STANDARD.decode(&record.salt).context("corrupt OTP salt")?;
    let expected = STANDARD.decode(&record.otp_hash).context("corrupt OTP hash")?;
    let mac = keyed_mac(secret, &salt, &record.phone, code)?;
    Ok(mac.verify_slice(&expected).is_ok())
}

/// Applies the resend cooldown and the per-phone and per-IP hourly caps.
pub fn check_send_limits(
    conn: &Connection,
    policy: &OtpPolicy,
    phone: &str,
    ip: &str,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    rate_limit::enforce(
        conn,
        &[
            LimitCheck {
                scope: "otp_cooldown",
                key: phone,
                limit: policy.cooldown,
            },
            LimitCheck {
                scope: "otp_phone",
                key: phone,
                limit: policy.per_phone,
            },
            LimitCheck {
                scope: "otp_ip",
                key: ip,
                limit: policy.per_ip,
            },
        ],
        now,
        "too many verification codes requested",
    )
}

/// Generates a fresh code for `phone`, replacing any pending one, and returns
/// it in clear for dispatch. Only its salted keyed hash is stored.
pub fn store_code(
    conn: &Connection,
    secret: &str,
    policy: &OtpPolicy,
    phone: &str,
    ip: &str,
    purpose: OtpPurpose,
    now: NaiveDateTime,
) -> Result<String, AppError> {
    let code = generate_code();
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = keyed_mac(secret, &salt, phone, &code)?.finalize().into_bytes();

    let record = OtpRecord {
        phone: phone.to_string(),
        otp_hash: STANDARD.encode(digest),
        salt: STANDARD.encode(salt),
        attempts: 0,
        expires_at: now + policy.ttl,
        created_at: now,
        ip: ip.to_string(),
        purpose,
    };
    queries::upsert_otp(conn, &record)?;
    Ok(code)
}

/// Checks `code` against the pending record. A match consumes the record; so
/// do expiry and exhausting the attempt budget.
pub fn verify(
    conn: &Connection,
    secret: &str,
    policy: &OtpPolicy,
    phone: &str,
    code: &str,
    ip: &str,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    let code = code.trim();
    if code.len() != CODE_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(format!(
            "verification code must be {CODE_LENGTH} digits"
        )));
    }

    let Some(record) = queries::get_otp(conn, phone)? else {
        return Err(AppError::NotFound("verification code not found".to_string()));
    };

    if record.is_expired(now) {
        queries::delete_otp(conn, phone)?;
        return Err(AppError::Unauthorized(
            "verification code expired, request a new one".to_string(),
        ));
    }

    if record.attempts >= policy.max_attempts {
        queries::delete_otp(conn, phone)?;
        tracing::warn!(phone = %phone, ip = %ip, "OTP locked after too many attempts");
        return Err(AppError::Forbidden(
            "too many incorrect attempts, request a new code".to_string(),
        ));
    }

    if !code_matches(secret, &record, code)? {
        let attempts = queries::increment_otp_attempts(conn, phone)?;
        let remaining = (policy.max_attempts - attempts).max(0);
        tracing::warn!(phone = %phone, ip = %ip, attempts, "incorrect OTP");
        return Err(AppError::Unauthorized(format!(
            "incorrect verification code, {remaining} attempts remaining"
        )));
    }

    if record.ip != ip {
        tracing::info!(phone = %phone, "OTP verified from a different IP than requested");
    }
    queries::delete_otp(conn, phone)?;
    Ok(())
}

/// Rate-limits, stores and dispatches a password-reset code. Unknown phones
/// get the same limits and the same outcome but no message.
pub async fn send_otp(
    state: &AppState,
    raw_phone: &str,
    ip: &str,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    let phone = normalize_phone(raw_phone, &state.config.phone_country_code)?;
    let policy = OtpPolicy::from_config(&state.config);

    let code = {
        let db = state.db()?;
        check_send_limits(&db, &policy, &phone, ip, now)?;
        if queries::get_user_by_phone(&db, &phone)?.is_none() {
            tracing::info!(phone = %phone, ip = %ip, "OTP requested for unknown phone, nothing sent");
            return Ok(());
        }
        store_code(
            &db,
            &state.config.otp_secret,
            &policy,
            &phone,
            ip,
            OtpPurpose::PasswordReset,
            now,
        )?
    };

    let body = format!(
        "Your Chairtime verification code is {code}. It expires in {} minutes.",
        policy.ttl.num_minutes()
    );
    if let Err(e) = state.messaging.send_message(&phone, &body).await {
        tracing::error!(error = %e, phone = %phone, "failed to dispatch OTP");
        let db = state.db()?;
        queries::delete_otp(&db, &phone)?;
        return Err(AppError::Internal(e));
    }

    tracing::info!(phone = %phone, ip = %ip, "OTP sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    const SECRET: &str = "test-secret";
    const PHONE: &str = "+998901234567";

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn policy() -> OtpPolicy {
        OtpPolicy::from_config(&AppConfig::default())
    }

    fn issue(conn: &Connection, now: NaiveDateTime) -> String {
        store_code(conn, SECRET, &policy(), PHONE, "10.0.0.1", OtpPurpose::PasswordReset, now)
            .unwrap()
    }

    fn wrong(code: &str) -> String {
        let flipped = (code.as_bytes()[0] - b'0' + 1) % 10;
        format!("{flipped}{}", &code[1..])
    }

    #[test]
    fn test_code_shape_and_hash_only_storage() {
        let conn = db::init_db(":memory:").unwrap();
        let code = issue(&conn, at("2025-06-01 09:00:00"));
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let record = queries::get_otp(&conn, PHONE).unwrap().unwrap();
        assert_ne!(record.otp_hash, code);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.expires_at, at("2025-06-01 09:10:00"));
    }

    #[test]
    fn test_code_is_single_use() {
        let conn = db::init_db(":memory:").unwrap();
        let now = at("2025-06-01 09:00:00");
        let code = issue(&conn, now);

        verify(&conn, SECRET, &policy(), PHONE, &code, "10.0.0.1", now).unwrap();
        let second = verify(&conn, SECRET, &policy(), PHONE, &code, "10.0.0.1", now).unwrap_err();
        assert!(matches!(second, AppError::NotFound(_)));
    }

    #[test]
    fn test_lockout_after_three_wrong_guesses() {
        let conn = db::init_db(":memory:").unwrap();
        let now = at("2025-06-01 09:00:00");
        let code = issue(&conn, now);
        let bad = wrong(&code);

        for remaining in [2, 1, 0] {
            let err = verify(&conn, SECRET, &policy(), PHONE, &bad, "10.0.0.1", now).unwrap_err();
            match err {
                AppError::Unauthorized(msg) => {
                    assert!(msg.contains(&format!("{remaining} attempts remaining")), "{msg}")
                }
                other => panic!("expected mismatch, got {other:?}"),
            }
        }

        let fourth = verify(&conn, SECRET, &policy(), PHONE, &code, "10.0.0.1", now).unwrap_err();
        assert!(matches!(fourth, AppError::Forbidden(_)));
        assert!(queries::get_otp(&conn, PHONE).unwrap().is_none());
    }

    #[test]
    fn test_expired_code_is_purged() {
        let conn = db::init_db(":memory:").unwrap();
        let code = issue(&conn, at("2025-06-01 09:00:00"));

        let err = verify(
            &conn,
            SECRET,
            &policy(),
            PHONE,
            &code,
            "10.0.0.1",
            at("2025-06-01 09:10:00"),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m.contains("expired")));
        assert!(queries::get_otp(&conn, PHONE).unwrap().is_none());
    }

    #[test]
    fn test_other_secret_does_not_verify() {
        let conn = db::init_db(":memory:").unwrap();
        let now = at("2025-06-01 09:00:00");
        let code = issue(&conn, now);

        let err = verify(&conn, "other-secret", &policy(), PHONE, &code, "10.0.0.1", now).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_malformed_code_rejected_before_lookup() {
        let conn = db::init_db(":memory:").unwrap();
        let now = at("2025-06-01 09:00:00");
        issue(&conn, now);

        let err = verify(&conn, SECRET, &policy(), PHONE, "12ab56", "10.0.0.1", now).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(queries::get_otp(&conn, PHONE).unwrap().unwrap().attempts, 0);
    }

    #[test]
    fn test_three_sends_per_hour_with_cooldown() {
        let conn = db::init_db(":memory:").unwrap();
        let t0 = at("2025-06-01 09:00:00");
        let policy = policy();

        for i in 0..3 {
            let now = t0 + Duration::seconds(61 * i);
            check_send_limits(&conn, &policy, PHONE, "10.0.0.1", now).unwrap();
        }

        let err = check_send_limits(&conn, &policy, PHONE, "10.0.0.1", t0 + Duration::seconds(200))
            .unwrap_err();
        match err {
            AppError::RateLimited { wait_seconds, .. } => {
                assert!(wait_seconds > 0);
                assert_eq!(wait_seconds, 3600 - 200);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn test_resend_cooldown() {
        let conn = db::init_db(":memory:").unwrap();
        let t0 = at("2025-06-01 09:00:00");

        check_send_limits(&conn, &policy(), PHONE, "10.0.0.1", t0).unwrap();
        let err = check_send_limits(&conn, &policy(), PHONE, "10.0.0.1", t0 + Duration::seconds(20))
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { wait_seconds: 40, .. }));
    }

    #[test]
    fn test_ip_cap_spans_phones() {
        let conn = db::init_db(":memory:").unwrap();
        let t0 = at("2025-06-01 09:00:00");

        for i in 0..9 {
            let phone = format!("+99890123456{i}");
            check_send_limits(&conn, &policy(), &phone, "10.0.0.9", t0).unwrap();
        }
        let err = check_send_limits(&conn, &policy(), "+998901111111", "10.0.0.9", t0).unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
        check_send_limits(&conn, &policy(), "+998901111111", "10.0.0.10", t0).unwrap();
    }
}
