//! CLI subcommand implementations.

use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::cache::StoreRegistry;
use crate::config::Config;
use crate::net::{FetchRequest, HttpNetwork};
use crate::serve;
use crate::worker::Worker;

fn build_worker(config: &Arc<Config>) -> Result<Worker<HttpNetwork>> {
  let registry = StoreRegistry::new(config.cache_root()?);
  Ok(Worker::new(Arc::clone(config), registry, HttpNetwork::new()?))
}

/// `precache install`: pre-cache the manifest into the current version's store.
pub async fn install(config: Arc<Config>) -> Result<()> {
  let worker = build_worker(&config)?;
  worker.install().await?;

  println!(
    "Installed {} ({} of {} assets cached)",
    config.version,
    worker.store_entries()?,
    config.manifest.len()
  );
  Ok(())
}

/// `precache activate`: promote the current version and evict stale stores.
pub async fn activate(config: Arc<Config>) -> Result<()> {
  let worker = build_worker(&config)?;
  worker.activate().await?;

  println!("Activated {}", config.version);
  Ok(())
}

/// `precache get`: run one request through the cache-first fetch path and
/// write the body to stdout or a file.
pub async fn get(config: Arc<Config>, target: &str, output: Option<PathBuf>) -> Result<()> {
  let worker = build_worker(&config)?;
  worker.resume()?;

  let url = resolve_target(&config, target)?;
  let outcome = worker.fetch(&FetchRequest::get(url)).await?;
  eprintln!("{} {} ({})", outcome.status(), target, outcome.source());

  let body = outcome.into_body();
  match output {
    Some(path) => {
      tokio::fs::write(&path, &body)
        .await
        .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
    }
    None => {
      std::io::stdout()
        .write_all(&body)
        .map_err(|e| eyre!("Failed to write body: {}", e))?;
    }
  }
  Ok(())
}

/// `precache stores`: list store versions and entry counts.
pub async fn stores(config: Arc<Config>) -> Result<()> {
  let registry = StoreRegistry::new(config.cache_root()?);
  let names = registry.store_names()?;

  if names.is_empty() {
    println!("No cache stores");
    return Ok(());
  }

  for name in names {
    let marker = if name == config.version { "*" } else { " " };
    let store = registry.open_store(&name)?;
    println!("{} {} ({} entries)", marker, store.name(), store.len()?);
  }
  Ok(())
}

/// `precache run`: install, activate, then serve through the cache.
pub async fn run(config: Arc<Config>, addr: Option<SocketAddr>) -> Result<()> {
  let worker = Arc::new(build_worker(&config)?);
  worker.install().await?;

  // Install signals readiness to supersede, so takeover is immediate.
  if worker.skip_waiting_signalled()? {
    worker.activate().await?;
  }

  let addr = match addr {
    Some(addr) => addr,
    None => config.serve_addr()?,
  };
  serve::run(worker, config, addr).await
}

/// Accept either an absolute URL or a path relative to the configured origin.
fn resolve_target(config: &Config, target: &str) -> Result<Url> {
  if let Ok(url) = Url::parse(target) {
    return Ok(url);
  }
  config
    .origin
    .join(target)
    .map_err(|e| eyre!("Invalid target '{}': {}", target, e))
}
