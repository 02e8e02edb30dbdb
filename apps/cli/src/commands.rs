//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reeldigest_core::notify::{format_completed, format_duplicate, format_in_progress};
use reeldigest_core::{Admission, Job, JobOutcome, JobState, LogNotifier, StageObserver};
use reeldigest_shared::{AppConfig, ChatId, init_config, load_config, load_config_from};

use crate::http::{ApiState, build_router};
use crate::wiring;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ReelDigest: turn Instagram and Threads links into Markdown notes.
#[derive(Parser)]
#[command(
    name = "reeldigest",
    version,
    about = "Turn Instagram reels, posts and Threads links into summarized Markdown notes.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.reeldigest/reeldigest.toml.
    #[arg(long, global = true, env = "REELDIGEST_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the HTTP service and the retry scheduler until Ctrl-C.
    Serve {
        /// Address to bind (overrides server.bind).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Process one link in the foreground and print the result.
    Submit {
        /// Instagram or Threads URL, or text containing one.
        url: String,

        /// Chat id recorded with the job.
        #[arg(long, default_value_t = 0)]
        chat_id: ChatId,
    },

    /// Run a single retry sweep over the failure queue.
    RetrySweep,

    /// Print job counts.
    Stats,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "warn,reeldigest=info",
        1 => "reeldigest=debug,info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    let load = || -> Result<AppConfig> {
        let config = match &config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        Ok(config)
    };

    match cli.command {
        Command::Serve { bind } => cmd_serve(load()?, bind).await,
        Command::Submit { url, chat_id } => cmd_submit(load()?, &url, chat_id).await,
        Command::RetrySweep => cmd_retry_sweep(load()?).await,
        Command::Stats => cmd_stats(load()?).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(load()?),
        },
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(config: AppConfig, bind: Option<String>) -> Result<()> {
    let sink = wiring::notification_sink(&config)?;
    let app = wiring::build(config, sink, None).await?;
    app.service.clear_stale_reservations().await?;

    let addr = bind.unwrap_or_else(|| app.config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;

    let cancel = CancellationToken::new();
    let scheduler = app.scheduler.clone();
    let scheduler_cancel = cancel.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

    let state = ApiState {
        service: app.service.clone(),
        storage: app.storage.clone(),
        telegram: app.config.telegram.clone(),
        retry_interval_secs: app.config.retry.interval_secs,
        max_retries: app.config.retry.max_retries,
    };
    info!(%addr, "listening");
    println!("ReelDigest listening on http://{addr}");

    let shutdown = cancel.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutting down");
            shutdown.cancel();
        })
        .await
        .wrap_err("HTTP server failed")?;

    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "retry scheduler task ended abnormally");
    }
    Ok(())
}

async fn cmd_submit(config: AppConfig, url: &str, chat_id: ChatId) -> Result<()> {
    let progress = Arc::new(CliProgress::new());
    let observer: Arc<dyn StageObserver> = progress.clone();
    let app = wiring::build(config, Arc::new(LogNotifier), Some(observer)).await?;

    let admission = app.service.submit(url, chat_id).await;
    let job = match admission {
        Ok(Admission::Accepted(job)) => job,
        Ok(Admission::AlreadyProcessed(record)) => {
            progress.clear();
            println!("{}", format_duplicate(&record));
            return Ok(());
        }
        Ok(Admission::InProgress(url)) => {
            progress.clear();
            println!("{}", format_in_progress(&url));
            return Ok(());
        }
        Err(e) => {
            progress.clear();
            return Err(e.into());
        }
    };

    let report = app.service.process(job).await;
    progress.clear();
    match report.outcome {
        JobOutcome::Completed(done) => {
            println!();
            println!("{}", format_completed(&done.record, &done.summary, &done.sync, false));
            println!();
            println!("  Note: {}", done.record.artifact_path.display());
            Ok(())
        }
        JobOutcome::Failed { stage, error } => Err(eyre!(
            "job failed during {stage}: {error}\nIt is queued and `reeldigest retry-sweep` will pick it up."
        )),
    }
}

async fn cmd_retry_sweep(config: AppConfig) -> Result<()> {
    let sink = wiring::notification_sink(&config)?;
    let app = wiring::build(config, sink, None).await?;
    let report = app.scheduler.sweep().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_stats(config: AppConfig) -> Result<()> {
    let storage = wiring::open_storage(&config).await?;
    let stats = storage.stats().await?;

    println!();
    println!("  Completed:    {}", stats.completed);
    println!("  Pending:      {}", stats.pending);
    println!("  Succeeded:    {}", stats.succeeded);
    println!("  Abandoned:    {}", stats.abandoned);
    println!("  Sync issues:  {}", stats.sync_issues);
    println!(
        "  Downloads:    {} ({} bytes)",
        stats.downloads, stats.downloaded_bytes
    );
    println!(
        "  Retry:        every {}s, up to {} times",
        config.retry.interval_secs, config.retry.max_retries
    );
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    let var = &config.telegram.bot_token_env;
    let token = match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => mask_secret(&v),
        _ => "(not set)".to_string(),
    };
    println!("# {var} = {token}");
    Ok(())
}

/// Keep the last four characters of a secret.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.trim().chars().collect();
    if chars.len() <= 8 {
        return "****".into();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Renders job state changes on an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner.set_message("Checking link");
        Self { spinner }
    }

    fn clear(&self) {
        self.spinner.finish_and_clear();
    }
}

impl StageObserver for CliProgress {
    fn state_changed(&self, job: &Job, state: JobState) {
        let message = match state {
            JobState::Acquiring => format!("Downloading {}", job.url),
            JobState::Transcribing => "Transcribing audio".to_string(),
            JobState::AnalyzingFrames => "Describing frames".to_string(),
            JobState::Summarizing => "Summarizing".to_string(),
            JobState::Persisting => "Writing note".to_string(),
            JobState::Syncing => "Syncing to knowledge base".to_string(),
            other => other.label(),
        };
        self.spinner.set_message(message);
    }
}
