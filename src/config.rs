use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::StoreRegistry;

/// Run configuration: the version tag, origin and asset manifest.
///
/// Loaded once at startup and read-only afterwards. The version tag names
/// the current cache store; bumping it (and activating) is the only cache
/// invalidation mechanism.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Version tag naming the current cache store
  pub version: String,
  /// Origin the app's assets live on; only GETs to this origin are cached
  pub origin: Url,
  /// Paths pre-cached at install time, relative to the origin
  pub manifest: Vec<String>,
  /// Override for the cache store directory (default: platform data dir)
  pub cache_dir: Option<PathBuf>,
  #[serde(default)]
  pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServeConfig {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
}

impl Default for ServeConfig {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
    }
  }
}

fn default_host() -> String {
  "127.0.0.1".to_string()
}

fn default_port() -> u16 {
  8787
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./precache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/precache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/precache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("precache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("precache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config.validate()?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let safe_tag = !self.version.is_empty()
      && !self.version.starts_with('.')
      && self
        .version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !safe_tag {
      return Err(eyre!(
        "Invalid version tag '{}': use letters, digits, '.', '_' or '-'",
        self.version
      ));
    }

    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be an http(s) URL, got '{}'", self.origin));
    }

    if self.manifest.is_empty() {
      return Err(eyre!("Manifest must list at least one asset path"));
    }

    Ok(())
  }

  /// Manifest entries resolved against the origin.
  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    self
      .manifest
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", path, e))
      })
      .collect()
  }

  /// Directory the version stores live in.
  pub fn cache_root(&self) -> Result<PathBuf> {
    match &self.cache_dir {
      Some(dir) => Ok(dir.clone()),
      None => StoreRegistry::default_root(),
    }
  }

  pub fn serve_addr(&self) -> Result<SocketAddr> {
    format!("{}:{}", self.serve.host, self.serve.port)
      .parse()
      .map_err(|e| {
        eyre!(
          "Invalid serve address {}:{}: {}",
          self.serve.host,
          self.serve.port,
          e
        )
      })
  }
}
