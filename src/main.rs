use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use chairtime::config::{AppConfig, DEV_OTP_SECRET};
use chairtime::db;
use chairtime::routes;
use chairtime::services::messaging::log::LogSmsProvider;
use chairtime::services::messaging::twilio::TwilioSmsProvider;
use chairtime::services::messaging::MessagingProvider;
use chairtime::services::password::Argon2Hasher;
use chairtime::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if config.otp_secret == DEV_OTP_SECRET {
        tracing::warn!("OTP_SECRET is not set, using the development secret");
    }

    let conn = db::init_db(&config.database_url)?;
    let purged = db::queries::purge_expired(&conn, &Utc::now().naive_utc())?;
    tracing::info!(
        sessions = purged.sessions,
        otp_records = purged.otp_records,
        rate_limits = purged.rate_limits,
        "purged expired records"
    );

    let messaging: Box<dyn MessagingProvider> = match TwilioSmsProvider::from_config(&config) {
        Some(twilio) => {
            tracing::info!("using Twilio SMS transport");
            Box::new(twilio)
        }
        None => {
            tracing::warn!("Twilio credentials missing, SMS will only be logged");
            Box::new(LogSmsProvider)
        }
    };
    let hasher = Argon2Hasher::new(config.argon2_memory_kib, config.argon2_iterations)?;

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        messaging,
        hasher: Box::new(hasher),
    });

    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
