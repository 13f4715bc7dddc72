//! Network access behind a trait so the fetch path is testable.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::cache::RequestKey;

/// An outgoing request as seen by the worker.
#[derive(Clone, Debug)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
}

impl FetchRequest {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// A response as it came off the wire.
#[derive(Clone, Debug)]
pub struct NetworkResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl NetworkResponse {
  /// Only plain 200 responses are captured into the store.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }
}

/// True when two URLs share scheme, host and effective port.
pub fn is_same_origin(url: &Url, origin: &Url) -> bool {
  url.scheme() == origin.scheme()
    && url.host_str() == origin.host_str()
    && url.port_or_known_default() == origin.port_or_known_default()
}

/// The worker's view of the network: one request in, one response out.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &FetchRequest) -> Result<NetworkResponse>;
}

/// reqwest-backed network implementation.
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("precache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &FetchRequest) -> Result<NetworkResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
      .to_vec();

    Ok(NetworkResponse {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  use super::*;

  /// In-memory network that counts calls and can simulate failures.
  pub struct FakeNetwork {
    responses: HashMap<String, NetworkResponse>,
    failing: Vec<String>,
    calls: Arc<AtomicUsize>,
  }

  impl FakeNetwork {
    pub fn new() -> Self {
      Self {
        responses: HashMap::new(),
        failing: Vec::new(),
        calls: Arc::new(AtomicUsize::new(0)),
      }
    }

    fn normalize(url: &str) -> String {
      Url::parse(url).unwrap().to_string()
    }

    pub fn with_body(mut self, url: &str, body: &[u8]) -> Self {
      self.responses.insert(
        Self::normalize(url),
        NetworkResponse {
          status: 200,
          headers: vec![(
            "content-type".to_string(),
            "application/octet-stream".to_string(),
          )],
          body: body.to_vec(),
        },
      );
      self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
      self.responses.insert(
        Self::normalize(url),
        NetworkResponse {
          status,
          headers: Vec::new(),
          body: Vec::new(),
        },
      );
      self
    }

    pub fn with_failure(mut self, url: &str) -> Self {
      self.failing.push(Self::normalize(url));
      self
    }

    /// Shared call counter, usable after the fake is moved into a worker.
    pub fn counter(&self) -> Arc<AtomicUsize> {
      Arc::clone(&self.calls)
    }
  }

  #[async_trait]
  impl Network for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<NetworkResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);

      let url = request.url.to_string();
      if self.failing.contains(&url) {
        return Err(eyre!("connection refused: {}", url));
      }
      self
        .responses
        .get(&url)
        .cloned()
        .ok_or_else(|| eyre!("no route for {}", url))
    }
  }
}
