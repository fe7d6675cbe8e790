mod cli;
mod executor;
mod model;
mod orchestrator;
mod server;
mod storage;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Route logs to stderr, or to a file while the dashboard owns the terminal.
fn init_tracing(args: &cli::Cli) -> Result<()> {
    let default_level = match args.command {
        Some(cli::Command::Serve { .. }) => "info",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    if !args.is_tui() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let log_path = args.log_file.clone().unwrap_or_else(storage::default_log_file);
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = !args.is_tui();
    init_tracing(&args)?;

    let succeeded = cli::run(args).await?;
    // Explicit exit codes for non-TUI modes; a failed run exits 1.
    if !succeeded {
        std::process::exit(1);
    }
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
