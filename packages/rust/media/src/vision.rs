//! Vision-language client for a locally hosted Ollama server.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reeldigest_shared::text::{strip_thinking_tags, truncate_chars};
use reeldigest_shared::{ReelDigestError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// User-Agent string for model server requests.
const USER_AGENT: &str = concat!("reeldigest/", env!("CARGO_PKG_VERSION"));

const FRAME_PROMPT: &str = "Describe this frame from a short social media video. \
Cover the people, objects, on-screen text, setting and any action in 2-4 sentences. \
Answer with the description only.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Describes one image per call via `POST /api/chat`.
#[derive(Debug, Clone)]
pub struct OllamaVision {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaVision {
    /// `request_timeout` caps a single HTTP call; the pipeline applies its
    /// own per-frame budget on top.
    pub fn new(host: &str, model: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ReelDigestError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
            model: model.into(),
        })
    }

    pub async fn describe(&self, image: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| ReelDigestError::io(image, e))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: FRAME_PROMPT,
                images: vec![STANDARD.encode(&bytes)],
            }],
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ReelDigestError::Analyze(format!("vision request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReelDigestError::Analyze(format!(
                "vision model returned HTTP {status}: {}",
                truncate_chars(&body, 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReelDigestError::Analyze(format!("invalid vision response: {e}")))?;

        let text = strip_thinking_tags(&parsed.message.content);
        if text.is_empty() {
            return Err(ReelDigestError::Analyze(format!(
                "vision model returned no description for {}",
                image.display()
            )));
        }
        debug!(image = %image.display(), chars = text.len(), "frame described");
        Ok(text)
    }
}
