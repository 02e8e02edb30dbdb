//! Telegram Bot API notification sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reeldigest_core::collaborators::NotificationSink;
use reeldigest_shared::text::truncate_chars;
use reeldigest_shared::{ChatId, ReelDigestError, Result};

/// Posts messages with `sendMessage`.
pub(crate) struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: ChatId,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub(crate) fn new(api_base: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("reeldigest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReelDigestError::Notify(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{token}/sendMessage", api_base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn deliver(&self, chat_id: ChatId, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            disable_web_page_preview: true,
        };
        // reqwest errors carry the URL, which carries the token.
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ReelDigestError::Notify(format!("sendMessage failed: {}", e.without_url()))
            })?;

        let status = resp.status();
        let reply: Option<ApiReply> = resp.json().await.ok();
        match reply {
            Some(ApiReply { ok: true, .. }) => {
                debug!(chat_id, "telegram message sent");
                Ok(())
            }
            Some(ApiReply { description, .. }) => Err(ReelDigestError::Notify(format!(
                "telegram rejected message ({status}): {}",
                truncate_chars(description.as_deref().unwrap_or("no description"), 200)
            ))),
            None => Err(ReelDigestError::Notify(format!(
                "telegram returned {status} with an unreadable body"
            ))),
        }
    }
}
