//! The cache worker: lifecycle, manifest pre-caching, and the cache-first
//! fetch path.
//!
//! One worker owns one version's store. Install pre-caches the manifest,
//! activate evicts every other version's store and takes over the fetch
//! path, and `fetch` serves same-origin GETs cache-first with network
//! fallback and best-effort dynamic population.

mod lifecycle;

pub use lifecycle::{Lifecycle, WorkerState};

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStore, StoreRegistry, StoredResponse};
use crate::config::Config;
use crate::net::{is_same_origin, FetchRequest, Network, NetworkResponse};

/// Control messages a worker accepts from its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
  /// Force this version to take over without waiting.
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

/// Outcome of routing one request through the worker.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Served from the store without touching the network.
  Hit(StoredResponse),
  /// Cache miss, served from the network (and captured if cacheable).
  Network(NetworkResponse),
  /// Not intercepted: forwarded untouched, never cached.
  PassThrough(NetworkResponse),
}

impl FetchOutcome {
  pub fn status(&self) -> u16 {
    match self {
      FetchOutcome::Hit(stored) => stored.status,
      FetchOutcome::Network(response) | FetchOutcome::PassThrough(response) => response.status,
    }
  }

  pub fn headers(&self) -> &[(String, String)] {
    match self {
      FetchOutcome::Hit(stored) => &stored.headers,
      FetchOutcome::Network(response) | FetchOutcome::PassThrough(response) => &response.headers,
    }
  }

  pub fn into_body(self) -> Vec<u8> {
    match self {
      FetchOutcome::Hit(stored) => stored.body,
      FetchOutcome::Network(response) | FetchOutcome::PassThrough(response) => response.body,
    }
  }

  /// Where the bytes came from, for logs and status lines.
  pub fn source(&self) -> &'static str {
    match self {
      FetchOutcome::Hit(_) => "cache",
      FetchOutcome::Network(_) => "network",
      FetchOutcome::PassThrough(_) => "pass-through",
    }
  }
}

/// One worker instance for the configured version, generic over the
/// network so the fetch strategy is testable without sockets.
pub struct Worker<N: Network> {
  config: Arc<Config>,
  registry: StoreRegistry,
  network: N,
  store: Mutex<Option<Arc<CacheStore>>>,
  lifecycle: Mutex<Lifecycle>,
}

impl<N: Network> Worker<N> {
  pub fn new(config: Arc<Config>, registry: StoreRegistry, network: N) -> Self {
    Self {
      config,
      registry,
      network,
      store: Mutex::new(None),
      lifecycle: Mutex::new(Lifecycle::new()),
    }
  }

  pub fn version(&self) -> &str {
    &self.config.version
  }

  pub fn state(&self) -> Result<WorkerState> {
    Ok(self.lifecycle()?.state())
  }

  /// True once this version has signalled readiness to supersede whatever
  /// version is currently active.
  pub fn skip_waiting_signalled(&self) -> Result<bool> {
    Ok(self.lifecycle()?.skip_waiting_requested())
  }

  /// Number of responses in the current store.
  pub fn store_entries(&self) -> Result<usize> {
    self.current_store()?.len()
  }

  fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
    self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn current_store(&self) -> Result<Arc<CacheStore>> {
    self
      .store
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .clone()
      .ok_or_else(|| eyre!("Cache store is not open"))
  }

  fn ensure_store_open(&self) -> Result<Arc<CacheStore>> {
    let mut guard = self
      .store
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(store) = guard.as_ref() {
      return Ok(Arc::clone(store));
    }

    let store = Arc::new(self.registry.open_store(&self.config.version)?);
    *guard = Some(Arc::clone(&store));
    Ok(store)
  }

  /// Install: open the current version's store and pre-cache the manifest.
  ///
  /// A store that cannot be opened is fatal. A manifest entry that cannot
  /// be fetched is logged and skipped; the install still succeeds and ends
  /// ready to supersede whatever version is active.
  pub async fn install(&self) -> Result<()> {
    let urls = self.config.asset_urls()?;

    self.lifecycle()?.begin_install()?;
    info!(version = %self.config.version, "Installing");

    let store = match self.ensure_store_open() {
      Ok(store) => store,
      Err(e) => {
        self.lifecycle()?.fail();
        return Err(e.wrap_err("Install failed: could not open cache store"));
      }
    };

    let attempts = urls.into_iter().map(|url| {
      let store = Arc::clone(&store);
      async move {
        match self.precache_asset(&store, url.clone()).await {
          Ok(()) => debug!(%url, "Pre-cached"),
          Err(e) => warn!(%url, "Failed to pre-cache asset: {:#}", e),
        }
      }
    });
    join_all(attempts).await;

    self.lifecycle()?.finish_install()?;
    info!(
      version = %self.config.version,
      entries = store.len().unwrap_or(0),
      "Install complete, ready to take over"
    );
    Ok(())
  }

  async fn precache_asset(&self, store: &CacheStore, url: url::Url) -> Result<()> {
    let request = FetchRequest::get(url);
    let response = self.network.fetch(&request).await?;
    if !response.is_cacheable() {
      return Err(eyre!("Unexpected status {}", response.status));
    }
    store.put(&request.key(), &to_stored(&response))?;
    Ok(())
  }

  /// Activate: evict every stale store version and take over the fetch
  /// path immediately. Cleanup failures are logged, not fatal.
  pub async fn activate(&self) -> Result<()> {
    self.lifecycle()?.begin_activate()?;
    info!(version = %self.config.version, "Activating");

    self.ensure_store_open()?;

    match self.registry.delete_stale(&self.config.version) {
      Ok(deleted) if deleted.is_empty() => debug!("No stale stores to delete"),
      Ok(deleted) => info!(?deleted, "Deleted stale stores"),
      Err(e) => warn!("Stale store cleanup failed: {:#}", e),
    }

    self.lifecycle()?.finish_activate()?;
    info!(version = %self.config.version, "Activated, now controlling all requests");
    Ok(())
  }

  /// Reattach to an already-installed version without re-installing, the
  /// way a restarted worker resumes control of its clients.
  pub fn resume(&self) -> Result<()> {
    self.ensure_store_open()?;
    self.lifecycle()?.resume()?;
    debug!(version = %self.config.version, "Resumed");
    Ok(())
  }

  /// Route one request: cache-first for same-origin GETs while activated,
  /// pass-through for everything else.
  pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
    let interceptable = request.is_get()
      && is_same_origin(&request.url, &self.config.origin)
      && self.state()?.can_intercept_fetch();

    if !interceptable {
      debug!(request = %request.key().description(), "Passing through");
      let response = self.network.fetch(request).await?;
      return Ok(FetchOutcome::PassThrough(response));
    }

    let store = self.current_store()?;
    let key = request.key();

    if let Some(stored) = store.get(&key)? {
      debug!(request = %key.description(), stored_at = %stored.stored_at, "Cache hit");
      return Ok(FetchOutcome::Hit(stored));
    }

    debug!(request = %key.description(), "Cache miss, fetching");
    let response = match self.network.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        error!(request = %key.description(), "Network fetch failed: {:#}", e);
        return Err(e);
      }
    };

    if response.is_cacheable() {
      // One copy goes to the caller, the other is captured without
      // holding up the response.
      let stored = to_stored(&response);
      let store = Arc::clone(&store);
      tokio::spawn(async move {
        if let Err(e) = store.put(&key, &stored) {
          warn!(request = %key.description(), "Failed to cache response: {:#}", e);
        }
      });
    }

    Ok(FetchOutcome::Network(response))
  }

  /// Handle a control message from the host.
  pub async fn handle_message(&self, message: WorkerMessage) -> Result<()> {
    match message {
      WorkerMessage::SkipWaiting => {
        let waiting = {
          let mut lifecycle = self.lifecycle()?;
          lifecycle.request_skip_waiting();
          lifecycle.state() == WorkerState::Installed
        };

        if waiting {
          info!("Skip-waiting requested, activating now");
          self.activate().await
        } else {
          debug!(state = %self.state()?, "Skip-waiting requested but nothing is waiting");
          Ok(())
        }
      }
    }
  }
}

fn to_stored(response: &NetworkResponse) -> StoredResponse {
  StoredResponse {
    status: response.status,
    headers: response.headers.clone(),
    body: response.body.clone(),
    stored_at: Utc::now(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ServeConfig;
  use crate::net::testing::FakeNetwork;
  use std::sync::atomic::Ordering;
  use std::time::Duration;
  use url::Url;

  fn test_config(manifest: &[&str]) -> Arc<Config> {
    Arc::new(Config {
      version: "fit-v2".to_string(),
      origin: Url::parse("https://app.example").unwrap(),
      manifest: manifest.iter().map(|s| s.to_string()).collect(),
      cache_dir: None,
      serve: ServeConfig::default(),
    })
  }

  fn manifest_network() -> FakeNetwork {
    FakeNetwork::new()
      .with_body("https://app.example/", b"<html>")
      .with_body("https://app.example/index.html", b"<html>")
      .with_body("https://app.example/animations/squats.gif", b"GIF89a")
  }

  fn worker_in(
    dir: &tempfile::TempDir,
    network: FakeNetwork,
    manifest: &[&str],
  ) -> Worker<FakeNetwork> {
    let registry = StoreRegistry::new(dir.path().to_path_buf());
    Worker::new(test_config(manifest), registry, network)
  }

  fn get_request(url: &str) -> FetchRequest {
    FetchRequest::get(Url::parse(url).unwrap())
  }

  async fn wait_until_stored(worker: &Worker<FakeNetwork>, request: &FetchRequest) -> bool {
    let store = worker.current_store().unwrap();
    for _ in 0..100 {
      if store.get(&request.key()).unwrap().is_some() {
        return true;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
  }

  const MANIFEST: [&str; 3] = ["./", "index.html", "animations/squats.gif"];

  #[tokio::test]
  async fn install_precaches_every_manifest_entry() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker_in(&dir, manifest_network(), &MANIFEST);

    worker.install().await.unwrap();

    assert_eq!(worker.state().unwrap(), WorkerState::Installed);
    assert!(worker.skip_waiting_signalled().unwrap());
    assert_eq!(worker.store_entries().unwrap(), 3);
  }

  #[tokio::test]
  async fn reinstall_by_a_fresh_worker_does_not_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker_in(&dir, manifest_network(), &MANIFEST);
    worker.install().await.unwrap();

    let again = worker_in(&dir, manifest_network(), &MANIFEST);
    again.install().await.unwrap();

    assert_eq!(again.store_entries().unwrap(), 3);
  }

  #[tokio::test]
  async fn install_tolerates_individual_asset_failures() {
    let dir = tempfile::tempdir().unwrap();
    let network = manifest_network().with_failure("https://app.example/index.html");
    let worker = worker_in(&dir, network, &MANIFEST);

    worker.install().await.unwrap();

    assert_eq!(worker.state().unwrap(), WorkerState::Installed);
    assert_eq!(worker.store_entries().unwrap(), 2);
  }

  #[tokio::test]
  async fn install_skips_non_200_manifest_responses() {
    let dir = tempfile::tempdir().unwrap();
    let network = manifest_network().with_status("https://app.example/animations/squats.gif", 404);
    let worker = worker_in(&dir, network, &MANIFEST);

    worker.install().await.unwrap();

    assert_eq!(worker.store_entries().unwrap(), 2);
  }

  #[tokio::test]
  async fn install_fails_fatally_when_store_cannot_open() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"occupied").unwrap();

    let registry = StoreRegistry::new(blocker);
    let worker = Worker::new(test_config(&MANIFEST), registry, manifest_network());

    assert!(worker.install().await.is_err());
    assert_eq!(worker.state().unwrap(), WorkerState::Redundant);
  }

  #[tokio::test]
  async fn activate_leaves_only_the_current_store() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(dir.path().to_path_buf());
    registry.open_store("fit-v1").unwrap();

    let worker = worker_in(&dir, manifest_network(), &MANIFEST);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    assert_eq!(worker.state().unwrap(), WorkerState::Activated);
    let registry = StoreRegistry::new(dir.path().to_path_buf());
    assert_eq!(registry.store_names().unwrap(), vec!["fit-v2"]);
  }

  #[tokio::test]
  async fn fetch_hit_serves_from_store_with_zero_network_calls() {
    let dir = tempfile::tempdir().unwrap();
    let network = manifest_network();
    let calls = network.counter();
    let worker = worker_in(&dir, network, &MANIFEST);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let before = calls.load(Ordering::SeqCst);
    let outcome = worker
      .fetch(&get_request("https://app.example/index.html"))
      .await
      .unwrap();

    assert!(matches!(outcome, FetchOutcome::Hit(_)));
    assert_eq!(outcome.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), before);
  }

  #[tokio::test]
  async fn fetch_miss_uses_network_once_and_populates_store() {
    let dir = tempfile::tempdir().unwrap();
    let network = manifest_network().with_body("https://app.example/extra.css", b"body{}");
    let calls = network.counter();
    let worker = worker_in(&dir, network, &MANIFEST);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let request = get_request("https://app.example/extra.css");
    let before = calls.load(Ordering::SeqCst);
    let outcome = worker.fetch(&request).await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Network(_)));
    assert_eq!(outcome.into_body(), b"body{}");
    assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    assert!(wait_until_stored(&worker, &request).await);
  }

  #[tokio::test]
  async fn fetch_does_not_cache_non_200_responses() {
    let dir = tempfile::tempdir().unwrap();
    let network = manifest_network().with_status("https://app.example/gone", 404);
    let worker = worker_in(&dir, network, &MANIFEST);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let request = get_request("https://app.example/gone");
    let outcome = worker.fetch(&request).await.unwrap();

    assert_eq!(outcome.status(), 404);
    tokio::task::yield_now().await;
    let store = worker.current_store().unwrap();
    assert!(store.get(&request.key()).unwrap().is_none());
  }

  #[tokio::test]
  async fn fetch_propagates_network_failure_on_miss() {
    let dir = tempfile::tempdir().unwrap();
    let network = manifest_network().with_failure("https://app.example/offline.js");
    let worker = worker_in(&dir, network, &MANIFEST);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let result = worker.fetch(&get_request("https://app.example/offline.js")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn non_get_and_cross_origin_requests_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let network = manifest_network()
      .with_body("https://app.example/api/stats", b"{}")
      .with_body("https://cdn.example/lib.js", b"lib");
    let worker = worker_in(&dir, network, &MANIFEST);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    let entries = worker.store_entries().unwrap();

    let post = FetchRequest::new("POST", Url::parse("https://app.example/api/stats").unwrap());
    let outcome = worker.fetch(&post).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::PassThrough(_)));

    let cross = get_request("https://cdn.example/lib.js");
    let outcome = worker.fetch(&cross).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::PassThrough(_)));

    tokio::task::yield_now().await;
    assert_eq!(worker.store_entries().unwrap(), entries);
  }

  #[tokio::test]
  async fn skip_waiting_message_activates_a_waiting_worker() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(dir.path().to_path_buf());
    registry.open_store("fit-v1").unwrap();

    let worker = worker_in(&dir, manifest_network(), &MANIFEST);
    worker.install().await.unwrap();
    assert_eq!(worker.state().unwrap(), WorkerState::Installed);

    worker.handle_message(WorkerMessage::SkipWaiting).await.unwrap();

    assert_eq!(worker.state().unwrap(), WorkerState::Activated);
    let registry = StoreRegistry::new(dir.path().to_path_buf());
    assert_eq!(registry.store_names().unwrap(), vec!["fit-v2"]);
  }

  #[tokio::test]
  async fn skip_waiting_message_is_a_noop_when_already_active() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker_in(&dir, manifest_network(), &MANIFEST);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    worker.handle_message(WorkerMessage::SkipWaiting).await.unwrap();
    assert_eq!(worker.state().unwrap(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn resume_reattaches_to_an_installed_store() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker_in(&dir, manifest_network(), &MANIFEST);
    worker.install().await.unwrap();

    let revived = worker_in(&dir, manifest_network(), &MANIFEST);
    revived.resume().unwrap();

    assert_eq!(revived.state().unwrap(), WorkerState::Activated);
    assert_eq!(revived.store_entries().unwrap(), 3);
  }

  #[test]
  fn skip_waiting_message_parses_from_the_wire_format() {
    let message: WorkerMessage = serde_json::from_str(r#"{"type": "SKIP_WAITING"}"#).unwrap();
    assert_eq!(message, WorkerMessage::SkipWaiting);
    assert!(serde_json::from_str::<WorkerMessage>(r#"{"type": "REFRESH"}"#).is_err());
  }
}
