//! Subscription-gated command-line agents used as summarization backends.
//!
//! Each call runs the agent once, non-interactively, inside an empty scratch
//! directory so it cannot pick up project context from the service's cwd.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reeldigest_media::{ToolError, run_tool};
use reeldigest_shared::{ReelDigestError, Result, StructuredSummary};
use tracing::{debug, instrument};

use crate::backend::{SummarizationBackend, SummaryRequest};
use crate::parse::parse_summary;
use crate::prompt::{RenderedPrompt, render_prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    /// Claude Code (`claude -p`), prompt on stdin.
    Claude,
    /// GitHub Copilot CLI (`copilot -p PROMPT -s`).
    Copilot,
}

#[derive(Debug, Clone)]
pub struct CliAgentBackend {
    kind: AgentKind,
    command: String,
    model: String,
}

impl CliAgentBackend {
    pub fn new(kind: AgentKind, command: &str, model: &str) -> Self {
        Self {
            kind,
            command: command.to_string(),
            model: model.to_string(),
        }
    }

    /// Whether the agent executable can be found.
    pub fn is_installed(&self) -> bool {
        find_executable(&self.command).is_some()
    }

    /// Arguments and stdin for one non-interactive run.
    fn invocation(&self, prompt: &RenderedPrompt) -> (Vec<String>, Option<String>) {
        match self.kind {
            AgentKind::Claude => (
                vec![
                    "-p".to_string(),
                    "--model".into(),
                    self.model.clone(),
                    "--output-format".into(),
                    "text".into(),
                ],
                Some(prompt.combined()),
            ),
            AgentKind::Copilot => (
                vec![
                    "-p".to_string(),
                    prompt.combined(),
                    "-s".into(),
                    "--model".into(),
                    self.model.clone(),
                ],
                None,
            ),
        }
    }
}

#[async_trait]
impl SummarizationBackend for CliAgentBackend {
    fn name(&self) -> &'static str {
        match self.kind {
            AgentKind::Claude => "claude",
            AgentKind::Copilot => "copilot",
        }
    }

    #[instrument(skip_all, fields(agent = self.name(), model = %self.model))]
    async fn summarize(&self, request: &SummaryRequest) -> Result<StructuredSummary> {
        let prompt = render_prompt(request);
        let scratch = tempfile::tempdir()
            .map_err(|e| ReelDigestError::Summarize(format!("no scratch directory: {e}")))?;

        let (args, stdin) = self.invocation(&prompt);
        let out = run_tool(&self.command, &args, Some(scratch.path()), stdin.as_deref())
            .await
            .map_err(|e| agent_error(self.name(), e))?;

        debug!(chars = out.stdout.len(), "agent responded");
        parse_summary(&out.stdout)
    }
}

fn agent_error(agent: &str, err: ToolError) -> ReelDigestError {
    let lower = err.stderr().to_lowercase();
    let auth = ["login", "log in", "authenticate", "unauthorized", "subscription"];
    if auth.iter().any(|m| lower.contains(m)) {
        ReelDigestError::Summarize(format!("{agent} authentication failed: {err}"))
    } else {
        ReelDigestError::Summarize(format!("{agent} failed: {err}"))
    }
}

/// Resolve `command` the way a shell would: paths as-is, bare names via PATH.
fn find_executable(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::InstructionTemplate;
    use reeldigest_shared::{ContentType, FrameDescription};

    fn request() -> SummaryRequest {
        SummaryRequest {
            content_type: ContentType::Reel,
            title: None,
            transcript: None,
            caption: None,
            frame_descriptions: vec![FrameDescription {
                offset_secs: 0.0,
                text: "A whiteboard with a diagram.".into(),
            }],
            template: InstructionTemplate::VisualOnly,
        }
    }

    #[test]
    fn claude_reads_prompt_from_stdin() {
        let agent = CliAgentBackend::new(AgentKind::Claude, "claude", "sonnet");
        let prompt = render_prompt(&request());
        let (args, stdin) = agent.invocation(&prompt);
        assert_eq!(args[0], "-p");
        assert!(args.contains(&"sonnet".to_string()));
        assert_eq!(stdin, Some(prompt.combined()));
    }

    #[test]
    fn copilot_takes_prompt_as_argument() {
        let agent = CliAgentBackend::new(AgentKind::Copilot, "copilot", "gpt-5");
        let prompt = render_prompt(&request());
        let (args, stdin) = agent.invocation(&prompt);
        assert_eq!(args[1], prompt.combined());
        assert!(args.contains(&"-s".to_string()));
        assert!(stdin.is_none());
    }

    #[test]
    fn auth_failures_are_labelled() {
        let err = agent_error(
            "claude",
            ToolError::Failed {
                program: "claude".into(),
                status: "exit status: 1".into(),
                stderr: "Invalid API key · Please run /login".into(),
            },
        );
        assert!(err.to_string().contains("authentication failed"));
        assert!(matches!(err, ReelDigestError::Summarize(_)));
    }

    #[test]
    fn missing_executable_is_not_installed() {
        let agent = CliAgentBackend::new(AgentKind::Claude, "reeldigest-no-such-agent", "m");
        assert!(!agent.is_installed());
        let agent = CliAgentBackend::new(AgentKind::Claude, "/nonexistent/bin/claude", "m");
        assert!(!agent.is_installed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_agent_and_parses_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\nprintf '## Summary\\nA lecture on graphs.\\n## Key Points\\n- Nodes and edges\\n'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let agent =
            CliAgentBackend::new(AgentKind::Claude, script.to_str().unwrap(), "sonnet");
        assert!(agent.is_installed());
        let summary = agent.summarize(&request()).await.unwrap();
        assert_eq!(summary.summary, "A lecture on graphs.");
        assert_eq!(summary.bullet_points, vec!["Nodes and edges"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_agent_is_summarize_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-copilot");
        std::fs::write(&script, "#!/bin/sh\necho 'rate limited' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let agent = CliAgentBackend::new(AgentKind::Copilot, script.to_str().unwrap(), "m");
        let err = agent.summarize(&request()).await.unwrap_err();
        assert!(matches!(err, ReelDigestError::Summarize(_)));
        assert!(err.to_string().contains("rate limited"));
    }
}
