use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use super::MessagingProvider;
use crate::config::AppConfig;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

pub struct TwilioSmsProvider {
    account_sid: String,
    auth_token: String,
    from_number: String,
    messages_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MessageResource {
    sid: String,
    status: Option<String>,
}

impl TwilioSmsProvider {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        let messages_url = format!("{TWILIO_API}/Accounts/{account_sid}/Messages.json");
        Self {
            account_sid,
            auth_token,
            from_number,
            messages_url,
            client: reqwest::Client::new(),
        }
    }

    /// `None` unless SID, token and sender number are all configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        if config.twilio_account_sid.is_empty()
            || config.twilio_auth_token.is_empty()
            || config.twilio_phone_number.is_empty()
        {
            return None;
        }
        Some(Self::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_phone_number.clone(),
        ))
    }
}

#[async_trait]
impl MessagingProvider for TwilioSmsProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", &self.from_number), ("Body", body)])
            .send()
            .await
            .context("failed to reach Twilio")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Twilio rejected SMS to {to}: {status} {detail}");
        }

        let message: MessageResource = response
            .json()
            .await
            .context("unexpected Twilio response body")?;
        tracing::debug!(
            to = %to,
            sid = %message.sid,
            status = message.status.as_deref().unwrap_or("unknown"),
            "SMS queued with Twilio"
        );

        Ok(())
    }
}
