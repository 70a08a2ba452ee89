use std::env;

pub const DEV_OTP_SECRET: &str = "chairtime-dev-otp-secret";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub phone_country_code: String,
    pub session_ttl_days: i64,
    pub otp_ttl_minutes: i64,
    pub otp_max_attempts: i64,
    pub otp_phone_limit_per_hour: i64,
    pub otp_ip_limit_per_hour: i64,
    pub otp_resend_cooldown_secs: i64,
    pub otp_secret: String,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub trust_proxy_headers: bool,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "chairtime.db".to_string(),
            phone_country_code: "998".to_string(),
            session_ttl_days: 30,
            otp_ttl_minutes: 10,
            otp_max_attempts: 3,
            otp_phone_limit_per_hour: 3,
            otp_ip_limit_per_hour: 9,
            otp_resend_cooldown_secs: 60,
            otp_secret: DEV_OTP_SECRET.to_string(),
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            trust_proxy_headers: false,
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_phone_number: String::new(),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed("PORT", defaults.port),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            phone_country_code: env::var("PHONE_COUNTRY_CODE")
                .map(|v| v.trim().trim_start_matches('+').to_string())
                .unwrap_or(defaults.phone_country_code),
            session_ttl_days: parsed("SESSION_TTL_DAYS", defaults.session_ttl_days),
            otp_ttl_minutes: parsed("OTP_TTL_MINUTES", defaults.otp_ttl_minutes),
            otp_max_attempts: parsed("OTP_MAX_ATTEMPTS", defaults.otp_max_attempts),
            otp_phone_limit_per_hour: parsed(
                "OTP_PHONE_LIMIT_PER_HOUR",
                defaults.otp_phone_limit_per_hour,
            ),
            otp_ip_limit_per_hour: parsed("OTP_IP_LIMIT_PER_HOUR", defaults.otp_ip_limit_per_hour),
            otp_resend_cooldown_secs: parsed(
                "OTP_RESEND_COOLDOWN_SECS",
                defaults.otp_resend_cooldown_secs,
            ),
            otp_secret: env::var("OTP_SECRET").unwrap_or(defaults.otp_secret),
            argon2_memory_kib: parsed("ARGON2_MEMORY_KIB", defaults.argon2_memory_kib),
            argon2_iterations: parsed("ARGON2_ITERATIONS", defaults.argon2_iterations),
            trust_proxy_headers: parsed("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
        }
    }
}
