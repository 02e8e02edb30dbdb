//! Locally hosted model server backend (Ollama chat API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reeldigest_shared::text::truncate_chars;
use reeldigest_shared::{ReelDigestError, Result, StructuredSummary};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::backend::{SummarizationBackend, SummaryRequest};
use crate::parse::parse_summary;
use crate::prompt::render_prompt;

/// User-Agent string for model server requests.
const USER_AGENT: &str = concat!("reeldigest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Clone)]
pub struct LocalModelBackend {
    client: Client,
    endpoint: String,
    model: String,
}

impl LocalModelBackend {
    pub fn new(host: &str, model: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ReelDigestError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", host.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl SummarizationBackend for LocalModelBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn summarize(&self, request: &SummaryRequest) -> Result<StructuredSummary> {
        let prompt = render_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: 0.3,
                num_predict: 2048,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReelDigestError::Summarize(format!("model server request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReelDigestError::Summarize(format!(
                "model server returned HTTP {status}: {}",
                truncate_chars(&text, 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReelDigestError::Summarize(format!("invalid model response: {e}")))?;

        debug!(chars = parsed.message.content.len(), "model responded");
        parse_summary(&parsed.message.content)
    }
}
