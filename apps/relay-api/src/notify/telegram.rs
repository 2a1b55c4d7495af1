//! Fire-and-forget Telegram relay.
//!
//! Failure here must never stall or fail the originating publish, so sends
//! run in their own task and only log.

use reqwest::Client;

use crate::config::TelegramConfig;

pub struct TelegramRelay {
    http: Client,
    config: Option<TelegramConfig>,
}

impl TelegramRelay {
    pub fn new(config: Option<TelegramConfig>) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Relay a message to the configured chat. Returns immediately.
    pub fn notify(&self, text: String) {
        let Some(config) = self.config.clone() else {
            return;
        };
        let http = self.http.clone();

        tokio::spawn(async move {
            let url = format!("https://api.telegram.org/bot{}/sendMessage", config.bot_token);
            let result = http
                .post(&url)
                .json(&serde_json::json!({
                    "chat_id": config.chat_id,
                    "text": text,
                }))
                .send()
                .await;

            match result {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(status = %resp.status(), "telegram relay rejected");
                }
                Err(e) => {
                    tracing::warn!(?e, "telegram relay failed");
                }
                _ => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_without_config_is_disabled() {
        let relay = TelegramRelay::new(None);
        assert!(!relay.is_enabled());
        // Must be a no-op, not a panic, outside a runtime.
        relay.notify("hello".to_string());
    }
}
