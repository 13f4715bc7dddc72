mod cache;
mod commands;
mod config;
mod net;
mod serve;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "precache")]
#[command(about = "Offline-first asset cache for static web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/precache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset manifest into the current version's store
  Install,
  /// Promote the current version and delete stale cache stores
  Activate,
  /// Fetch one URL (or origin-relative path) cache-first
  Get {
    /// Absolute URL or path relative to the configured origin
    target: String,

    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache stores and entry counts
  Stores,
  /// Install, activate, then serve the app through the cache
  Run {
    /// Listen address (overrides the config file)
    #[arg(long)]
    addr: Option<SocketAddr>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = Arc::new(config::Config::load(args.config.as_deref())?);

  match args.command {
    Command::Install => commands::install(config).await,
    Command::Activate => commands::activate(config).await,
    Command::Get { target, output } => commands::get(config, &target, output).await,
    Command::Stores => commands::stores(config).await,
    Command::Run { addr } => commands::run(config, addr).await,
  }
}

/// Logs go to stderr so command output owns stdout; `--log-file` swaps in
/// a non-blocking file writer whose guard must outlive the process.
fn init_tracing(
  log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("precache=info"));

  match log_file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(file);

      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}
