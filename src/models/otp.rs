use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::PasswordReset => "password_reset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "password_reset" => Some(OtpPurpose::PasswordReset),
            _ => None,
        }
    }
}

/// Pending one-time code for a phone. Only the keyed hash of the code is kept.
#[derive(Debug, Clone)]
pub struct OtpRecord {
    pub phone: String,
    pub otp_hash: String,
    pub salt: String,
    pub attempts: i64,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub ip: String,
    pub purpose: OtpPurpose,
}

impl OtpRecord {
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: i64,
    pub reset_at: NaiveDateTime,
}
