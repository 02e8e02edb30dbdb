//! Error types for reeldigest.
//!
//! Library crates use [`ReelDigestError`] via `thiserror`.
//! The binary wraps this with `color-eyre` for rich diagnostics.
//!
//! Pipeline stages each have their own variant so the orchestrator can map a
//! failure to the stage recorded in the failure store without inspecting
//! messages.

use std::path::PathBuf;

use crate::types::Stage;

/// Why media acquisition failed. Only `Transient` is expected to clear on its
/// own, but every kind is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFailure {
    NotFound,
    AccessDenied,
    Transient,
}

impl std::fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::Transient => "transient",
        };
        f.write_str(s)
    }
}

/// Top-level error type for all reeldigest operations.
#[derive(Debug, thiserror::Error)]
pub enum ReelDigestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Unsupported or malformed submission. Never retried.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Media acquisition failed.
    #[error("download error ({kind}): {message}")]
    Download {
        kind: DownloadFailure,
        message: String,
    },

    /// Speech-to-text failed hard (no-speech is not an error).
    #[error("transcribe error: {0}")]
    Transcribe(String),

    /// Frame extraction failed or every frame description failed.
    #[error("analyze error: {0}")]
    Analyze(String),

    /// Any summarization backend failure, whichever variant raised it.
    #[error("summarize error: {0}")]
    Summarize(String),

    /// Writing the artifact or the processed-URL record failed.
    #[error("persist error: {0}")]
    Persist(String),

    /// Knowledge-base sync failed. Non-fatal to the job.
    #[error("sync error: {0}")]
    Sync(String),

    /// Notification delivery failed.
    #[error("notify error: {0}")]
    Notify(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ReelDigestError>;

impl ReelDigestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a download error of the given kind.
    pub fn download(kind: DownloadFailure, msg: impl Into<String>) -> Self {
        Self::Download {
            kind,
            message: msg.into(),
        }
    }

    /// Build the error variant belonging to `stage`.
    pub fn for_stage(stage: Stage, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match stage {
            Stage::Download => Self::download(DownloadFailure::Transient, msg),
            Stage::Transcribe => Self::Transcribe(msg),
            Stage::Analyze => Self::Analyze(msg),
            Stage::Summarize => Self::Summarize(msg),
            Stage::Persist => Self::Persist(msg),
            Stage::Sync => Self::Sync(msg),
        }
    }

    /// A collaborator call exceeded its budget.
    pub fn timed_out(stage: Stage, secs: u64) -> Self {
        Self::for_stage(stage, format!("timed out after {secs}s"))
    }

    /// The pipeline stage this error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Download { .. } => Some(Stage::Download),
            Self::Transcribe(_) => Some(Stage::Transcribe),
            Self::Analyze(_) => Some(Stage::Analyze),
            Self::Summarize(_) => Some(Stage::Summarize),
            Self::Persist(_) => Some(Stage::Persist),
            Self::Sync(_) => Some(Stage::Sync),
            _ => None,
        }
    }

    /// Whether a failure of this kind belongs in the failure store.
    pub fn is_retryable(&self) -> bool {
        matches!(self.stage(), Some(stage) if stage != Stage::Sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ReelDigestError::config("missing bot token");
        assert_eq!(err.to_string(), "config error: missing bot token");

        let err = ReelDigestError::download(DownloadFailure::AccessDenied, "private account");
        assert_eq!(
            err.to_string(),
            "download error (access denied): private account"
        );
    }

    #[test]
    fn stage_errors_map_back_to_their_stage() {
        for stage in [
            Stage::Download,
            Stage::Transcribe,
            Stage::Analyze,
            Stage::Summarize,
            Stage::Persist,
            Stage::Sync,
        ] {
            assert_eq!(ReelDigestError::for_stage(stage, "x").stage(), Some(stage));
        }
        assert_eq!(ReelDigestError::validation("bad").stage(), None);
    }

    #[test]
    fn sync_and_validation_are_not_retryable() {
        assert!(ReelDigestError::Summarize("boom".into()).is_retryable());
        assert!(ReelDigestError::timed_out(Stage::Download, 300).is_retryable());
        assert!(!ReelDigestError::Sync("down".into()).is_retryable());
        assert!(!ReelDigestError::validation("nope").is_retryable());
        assert!(!ReelDigestError::Storage("locked".into()).is_retryable());
    }

    #[test]
    fn timeout_message_names_budget() {
        let err = ReelDigestError::timed_out(Stage::Summarize, 180);
        assert_eq!(err.to_string(), "summarize error: timed out after 180s");
    }
}
