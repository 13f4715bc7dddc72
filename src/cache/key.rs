//! Request identity used as the store lookup key.

use sha2::{Digest, Sha256};
use url::Url;

/// Identity of a cacheable request: method plus absolute URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable fixed-length key for the store's primary key column.
  pub fn store_hash(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b":");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable form for logs.
  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn hash_is_stable_and_hex_encoded() {
    let a = RequestKey::new("GET", &url("https://app.example/index.html"));
    let b = RequestKey::new("GET", &url("https://app.example/index.html"));
    assert_eq!(a.store_hash(), b.store_hash());
    assert_eq!(a.store_hash().len(), 64);
  }

  #[test]
  fn method_is_uppercased() {
    let a = RequestKey::new("get", &url("https://app.example/"));
    let b = RequestKey::new("GET", &url("https://app.example/"));
    assert_eq!(a, b);
    assert_eq!(a.method(), "GET");
  }

  #[test]
  fn different_requests_hash_differently() {
    let base = url("https://app.example/app.js");
    let get = RequestKey::new("GET", &base);
    let head = RequestKey::new("HEAD", &base);
    let other = RequestKey::new("GET", &url("https://app.example/app.css"));
    assert_ne!(get.store_hash(), head.store_hash());
    assert_ne!(get.store_hash(), other.store_hash());
  }
}
