//! ReelDigest CLI: turns Instagram and Threads links into Markdown notes.
//!
//! Runs the submission service (HTTP + retry scheduler) or single jobs in
//! the foreground.

mod commands;
mod http;
mod telegram;
mod wiring;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
