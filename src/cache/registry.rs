//! The cache directory as a namespace of version-named stores.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::warn;

use super::store::CacheStore;

/// Enumerates, opens and deletes version-named stores.
///
/// Each store is a single SQLite file `<root>/<name>.db`, so stores
/// survive restarts and enumeration is a directory listing.
pub struct StoreRegistry {
  root: PathBuf,
}

impl StoreRegistry {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }

  /// Default store directory under the platform data dir.
  pub fn default_root() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("precache"))
  }

  fn store_path(&self, name: &str) -> PathBuf {
    self.root.join(format!("{}.db", name))
  }

  /// Open (create-if-absent) the store with the given name.
  pub fn open_store(&self, name: &str) -> Result<CacheStore> {
    CacheStore::open(name, &self.store_path(name))
  }

  /// All store names currently on disk, sorted.
  pub fn store_names(&self) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => {
        return Err(eyre!(
          "Failed to read cache directory {}: {}",
          self.root.display(),
          e
        ))
      }
    };

    let mut names = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|e| eyre!("Failed to read cache directory entry: {}", e))?;
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("db") {
        continue;
      }
      if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        names.push(stem.to_string());
      }
    }
    names.sort();

    Ok(names)
  }

  /// Delete one store by name.
  pub fn delete_store(&self, name: &str) -> Result<()> {
    let path = self.store_path(name);
    std::fs::remove_file(&path)
      .map_err(|e| eyre!("Failed to delete store {}: {}", path.display(), e))?;

    // A leftover rollback journal is harmless but pointless to keep.
    let _ = std::fs::remove_file(path.with_extension("db-journal"));

    Ok(())
  }

  /// Delete every store whose name differs from `current`.
  ///
  /// Individual deletion failures are logged and skipped; returns the
  /// names that were actually deleted.
  pub fn delete_stale(&self, current: &str) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.store_names()? {
      if name == current {
        continue;
      }
      match self.delete_store(&name) {
        Ok(()) => deleted.push(name),
        Err(e) => warn!(store = %name, "Failed to delete stale store: {:#}", e),
      }
    }

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn store_names_is_empty_for_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(dir.path().join("does-not-exist"));
    assert!(registry.store_names().unwrap().is_empty());
  }

  #[test]
  fn open_store_creates_a_named_file() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(dir.path().to_path_buf());

    registry.open_store("app-v1").unwrap();
    registry.open_store("app-v2").unwrap();

    assert_eq!(registry.store_names().unwrap(), vec!["app-v1", "app-v2"]);
  }

  #[test]
  fn delete_stale_keeps_only_the_current_store() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(dir.path().to_path_buf());

    registry.open_store("app-v1").unwrap();
    registry.open_store("app-v2").unwrap();
    registry.open_store("app-v3").unwrap();

    let mut deleted = registry.delete_stale("app-v3").unwrap();
    deleted.sort();

    assert_eq!(deleted, vec!["app-v1", "app-v2"]);
    assert_eq!(registry.store_names().unwrap(), vec!["app-v3"]);
  }

  #[test]
  fn delete_stale_is_a_noop_when_only_current_exists() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(dir.path().to_path_buf());

    registry.open_store("app-v1").unwrap();

    assert!(registry.delete_stale("app-v1").unwrap().is_empty());
    assert_eq!(registry.store_names().unwrap(), vec!["app-v1"]);
  }

  #[test]
  fn delete_store_fails_for_unknown_name() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new(dir.path().to_path_buf());
    assert!(registry.delete_store("nope").is_err());
  }
}
