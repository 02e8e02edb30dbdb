//! The summarization capability interface and its backend selector.

use std::time::Duration;

use async_trait::async_trait;
use reeldigest_shared::{
    BackendKind, ContentType, FrameDescription, Result, StructuredSummary, SummarizerConfig,
};
use tracing::{info, warn};

use crate::agent::{AgentKind, CliAgentBackend};
use crate::local::LocalModelBackend;
use crate::prompt::InstructionTemplate;

/// Everything a backend needs to summarize one job.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub content_type: ContentType,
    pub title: Option<String>,
    pub transcript: Option<String>,
    /// Caption or post body shown alongside the media.
    pub caption: Option<String>,
    /// Chronological for video, gallery order for images.
    pub frame_descriptions: Vec<FrameDescription>,
    pub template: InstructionTemplate,
}

impl SummaryRequest {
    /// At least one of transcript or frame descriptions carries content.
    pub fn has_material(&self) -> bool {
        let has_transcript = self
            .transcript
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        has_transcript || !self.frame_descriptions.is_empty()
    }
}

/// A text-generation backend that produces structured summaries.
///
/// Implementations report every failure as a summarize error.
#[async_trait]
pub trait SummarizationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn summarize(&self, request: &SummaryRequest) -> Result<StructuredSummary>;
}

/// The deployment's backend, chosen once at startup.
#[derive(Debug, Clone)]
pub enum Summarizer {
    Local(LocalModelBackend),
    Claude(CliAgentBackend),
    Copilot(CliAgentBackend),
}

impl Summarizer {
    /// Build the configured variant. A command-line agent that is not
    /// installed falls back to the local model server.
    pub fn from_config(config: &SummarizerConfig, request_timeout: Duration) -> Result<Self> {
        let local = || {
            LocalModelBackend::new(&config.local.host, &config.local.model, request_timeout)
                .map(Self::Local)
        };

        let selected = match config.backend {
            BackendKind::Local => local()?,
            BackendKind::Claude | BackendKind::Copilot => {
                let (kind, cli) = if config.backend == BackendKind::Claude {
                    (AgentKind::Claude, &config.claude)
                } else {
                    (AgentKind::Copilot, &config.copilot)
                };
                let agent = CliAgentBackend::new(kind, &cli.command, &cli.model);
                if agent.is_installed() {
                    match kind {
                        AgentKind::Claude => Self::Claude(agent),
                        AgentKind::Copilot => Self::Copilot(agent),
                    }
                } else {
                    warn!(
                        backend = config.backend.as_str(),
                        command = %cli.command,
                        "agent CLI not found, falling back to local model"
                    );
                    local()?
                }
            }
        };

        info!(backend = selected.name(), "summarization backend selected");
        Ok(selected)
    }
}

#[async_trait]
impl SummarizationBackend for Summarizer {
    fn name(&self) -> &'static str {
        match self {
            Self::Local(b) => b.name(),
            Self::Claude(b) | Self::Copilot(b) => b.name(),
        }
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<StructuredSummary> {
        match self {
            Self::Local(b) => b.summarize(request).await,
            Self::Claude(b) | Self::Copilot(b) => b.summarize(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reeldigest_shared::AppConfig;

    fn request(transcript: Option<&str>, frames: usize) -> SummaryRequest {
        SummaryRequest {
            content_type: ContentType::Reel,
            title: None,
            transcript: transcript.map(str::to_string),
            caption: Some("caption alone is not material".into()),
            frame_descriptions: (0..frames)
                .map(|i| FrameDescription {
                    offset_secs: i as f64,
                    text: format!("frame {i}"),
                })
                .collect(),
            template: InstructionTemplate::Spoken,
        }
    }

    #[test]
    fn material_requires_transcript_or_frames() {
        assert!(!request(None, 0).has_material());
        assert!(!request(Some("  "), 0).has_material());
        assert!(request(Some("words"), 0).has_material());
        assert!(request(None, 1).has_material());
    }

    #[test]
    fn local_is_default() {
        let config = AppConfig::default();
        let summarizer =
            Summarizer::from_config(&config.summarizer, Duration::from_secs(5)).unwrap();
        assert!(matches!(summarizer, Summarizer::Local(_)));
        assert_eq!(summarizer.name(), "local");
    }

    #[test]
    fn missing_agent_falls_back_to_local() {
        let mut config = AppConfig::default().summarizer;
        config.backend = BackendKind::Claude;
        config.claude.command = "reeldigest-no-such-agent".into();
        let summarizer = Summarizer::from_config(&config, Duration::from_secs(5)).unwrap();
        assert!(matches!(summarizer, Summarizer::Local(_)));
    }
}
