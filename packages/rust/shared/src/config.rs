//! Application configuration for reeldigest.
//!
//! User config lives at `~/.reeldigest/reeldigest.toml`.
//! CLI flags override config file values, which override defaults.
//! The loaded value is immutable for the life of the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReelDigestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "reeldigest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".reeldigest";

// ---------------------------------------------------------------------------
// Config structs (matching reeldigest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub frames: FramesConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub vision: VisionConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP service binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".into()
}

/// `[storage]` section. Paths may start with `~/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Root directory for Markdown notes.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,

    /// Root for per-job scratch directories.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            artifact_dir: default_artifact_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

fn default_database_path() -> String {
    "~/.reeldigest/reeldigest.db".into()
}
fn default_artifact_dir() -> String {
    "~/.reeldigest/notes".into()
}
fn default_temp_dir() -> String {
    "~/.reeldigest/tmp".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Fixed period between retry sweeps.
    #[serde(default = "default_retry_interval")]
    pub interval_secs: u64,

    /// Failed retries allowed before a record is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_retry_interval(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_retry_interval() -> u64 {
    3600
}
fn default_max_retries() -> u32 {
    3
}

/// `[frames]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramesConfig {
    /// Concurrent vision calls per job.
    #[serde(default = "default_frame_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_min_frames")]
    pub min_frames: u32,

    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            concurrency: default_frame_concurrency(),
            min_frames: default_min_frames(),
            max_frames: default_max_frames(),
        }
    }
}

fn default_frame_concurrency() -> usize {
    2
}
fn default_min_frames() -> u32 {
    8
}
fn default_max_frames() -> u32 {
    10
}

/// `[timeouts]` section. One budget per external call, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_acquire_timeout")]
    pub acquire: u64,
    #[serde(default = "default_transcribe_timeout")]
    pub transcribe: u64,
    /// Budget for a single frame description.
    #[serde(default = "default_frame_timeout")]
    pub frame: u64,
    #[serde(default = "default_summarize_timeout")]
    pub summarize: u64,
    #[serde(default = "default_sync_timeout")]
    pub sync: u64,
    #[serde(default = "default_notify_timeout")]
    pub notify: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            acquire: default_acquire_timeout(),
            transcribe: default_transcribe_timeout(),
            frame: default_frame_timeout(),
            summarize: default_summarize_timeout(),
            sync: default_sync_timeout(),
            notify: default_notify_timeout(),
        }
    }
}

fn default_acquire_timeout() -> u64 {
    300
}
fn default_transcribe_timeout() -> u64 {
    600
}
fn default_frame_timeout() -> u64 {
    120
}
fn default_summarize_timeout() -> u64 {
    180
}
fn default_sync_timeout() -> u64 {
    300
}
fn default_notify_timeout() -> u64 {
    15
}

/// `[acquisition]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Downloader executable (yt-dlp compatible).
    #[serde(default = "default_acquisition_command")]
    pub command: String,

    /// Optional Netscape cookie file for logged-in downloads.
    #[serde(default)]
    pub cookies_file: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            command: default_acquisition_command(),
            cookies_file: String::new(),
        }
    }
}

fn default_acquisition_command() -> String {
    "yt-dlp".into()
}

/// `[transcription]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// whisper.cpp command line binary.
    #[serde(default = "default_whisper_command")]
    pub command: String,

    #[serde(default = "default_whisper_model")]
    pub model_path: String,

    /// Spoken language, or `auto` to detect.
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            command: default_whisper_command(),
            model_path: default_whisper_model(),
            language: default_language(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

fn default_whisper_command() -> String {
    "whisper-cli".into()
}
fn default_whisper_model() -> String {
    "~/.reeldigest/models/ggml-base.bin".into()
}
fn default_language() -> String {
    "auto".into()
}
fn default_ffmpeg() -> String {
    "ffmpeg".into()
}
fn default_ffprobe() -> String {
    "ffprobe".into()
}

/// `[vision]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,

    #[serde(default = "default_vision_model")]
    pub model: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_vision_model(),
        }
    }
}

fn default_ollama_host() -> String {
    "http://localhost:11434".into()
}
fn default_vision_model() -> String {
    "minicpm-v".into()
}

/// Which summarization backend the deployment uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Locally hosted model server (Ollama).
    #[default]
    Local,
    /// Claude Code command-line agent.
    Claude,
    /// GitHub Copilot command-line agent.
    Copilot,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Claude => "claude",
            Self::Copilot => "copilot",
        }
    }
}

/// `[summarizer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub local: LocalModelConfig,

    #[serde(default = "default_claude_cli")]
    pub claude: AgentCliConfig,

    #[serde(default = "default_copilot_cli")]
    pub copilot: AgentCliConfig,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            local: LocalModelConfig::default(),
            claude: default_claude_cli(),
            copilot: default_copilot_cli(),
        }
    }
}

/// `[summarizer.local]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,

    #[serde(default = "default_local_model")]
    pub model: String,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_local_model(),
        }
    }
}

fn default_local_model() -> String {
    "qwen2.5:7b".into()
}

/// `[summarizer.claude]` / `[summarizer.copilot]` sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCliConfig {
    pub command: String,
    pub model: String,
}

fn default_claude_cli() -> AgentCliConfig {
    AgentCliConfig {
        command: "claude".into(),
        model: "sonnet".into(),
    }
}
fn default_copilot_cli() -> AgentCliConfig {
    AgentCliConfig {
        command: "copilot".into(),
        model: "claude-sonnet-4.5".into(),
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Sync agent executable speaking the JSON-lines protocol.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Prefix for the per-day external resource title.
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: String::new(),
            args: Vec::new(),
            title_prefix: default_title_prefix(),
        }
    }
}

fn default_title_prefix() -> String {
    "IG Content".into()
}

/// `[telegram]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Name of the env var holding the bot token (never store the token itself).
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    #[serde(default = "default_telegram_api")]
    pub api_base: String,

    /// Chats allowed to submit. Empty allows every chat.
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            api_base: default_telegram_api(),
            allowed_chat_ids: Vec::new(),
        }
    }
}

impl TelegramConfig {
    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chat_ids.is_empty() || self.allowed_chat_ids.contains(&chat_id)
    }
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".into()
}
fn default_telegram_api() -> String {
    "https://api.telegram.org".into()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            return Err(ReelDigestError::config("retry.max_retries must be at least 1"));
        }
        if self.retry.interval_secs == 0 {
            return Err(ReelDigestError::config("retry.interval_secs must be at least 1"));
        }
        if self.frames.concurrency == 0 {
            return Err(ReelDigestError::config("frames.concurrency must be at least 1"));
        }
        if self.frames.min_frames == 0 || self.frames.min_frames > self.frames.max_frames {
            return Err(ReelDigestError::config(format!(
                "frames.min_frames ({}) must be between 1 and frames.max_frames ({})",
                self.frames.min_frames, self.frames.max_frames
            )));
        }
        let t = &self.timeouts;
        for (name, secs) in [
            ("acquire", t.acquire),
            ("transcribe", t.transcribe),
            ("frame", t.frame),
            ("summarize", t.summarize),
            ("sync", t.sync),
            ("notify", t.notify),
        ] {
            if secs == 0 {
                return Err(ReelDigestError::config(format!(
                    "timeouts.{name} must be greater than zero"
                )));
            }
        }
        if self.sync.enabled && self.sync.command.trim().is_empty() {
            return Err(ReelDigestError::config(
                "sync.enabled is set but sync.command is empty",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.reeldigest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ReelDigestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.reeldigest/reeldigest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ReelDigestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ReelDigestError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ReelDigestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ReelDigestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ReelDigestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the Telegram bot token from the env var named in config.
pub fn telegram_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.telegram.bot_token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ReelDigestError::config(format!(
            "Telegram bot token not found. Set the {var_name} environment variable."
        ))),
    }
}
