//! Shared types, error model, and configuration for reeldigest.
//!
//! This crate is the foundation depended on by all other reeldigest crates.
//! It provides:
//! - [`ReelDigestError`]: the unified error type and stage taxonomy
//! - Domain types ([`ProcessedUrl`], [`FailedJob`], [`DailySyncRecord`], [`StructuredSummary`])
//! - Configuration ([`AppConfig`] and config loading)
//! - Text helpers shared by the model-facing crates

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AcquisitionConfig, AgentCliConfig, AppConfig, BackendKind, FramesConfig, LocalModelConfig,
    RetryConfig, ServerConfig, StorageConfig, SummarizerConfig, SyncConfig, TelegramConfig,
    TimeoutsConfig, TranscriptionConfig, VisionConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, telegram_token,
};
pub use error::{DownloadFailure, ReelDigestError, Result};
pub use types::{
    ChatId, ContentType, DailySyncRecord, DedupEntry, DownloadLogEntry, FailedJob, FailureStatus,
    FrameDescription, JobId, JobStats, NewFailure, ProcessedUrl, Reservation, Stage,
    StructuredSummary, SyncIssue,
};
