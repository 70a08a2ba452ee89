use async_trait::async_trait;

use super::MessagingProvider;

/// Development transport: writes the message to the log instead of delivering it.
pub struct LogSmsProvider;

#[async_trait]
impl MessagingProvider for LogSmsProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to = %to, "SMS not delivered (log transport)");
        tracing::debug!(to = %to, body = %body, "undelivered SMS body");
        Ok(())
    }
}
