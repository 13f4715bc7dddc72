//! A single versioned response store backed by SQLite.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::key::RequestKey;

/// A response captured into the store, with everything needed to replay it.
#[derive(Clone, Debug)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// When the response was written to the store
  pub stored_at: DateTime<Utc>,
}

/// One version's cache store: a persistent map from request key to response.
///
/// The store is identified by its version name; the file it lives in is
/// managed by the registry. Opening creates the schema if absent, so a
/// store exists from first open until its file is deleted.
pub struct CacheStore {
  name: String,
  conn: Mutex<Connection>,
}

/// Schema for the response table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS responses (
    key_hash TEXT PRIMARY KEY,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_responses_url ON responses(url);
"#;

impl CacheStore {
  /// Open (create-if-absent) a store at the given path.
  pub fn open(name: &str, path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache store at {}: {}", path.display(), e))?;

    let store = Self {
      name: name.to_string(),
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory store; nothing persists.
  #[cfg(test)]
  pub fn open_in_memory(name: &str) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let store = Self {
      name: name.to_string(),
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Insert or overwrite the response for a key. Re-inserting the same key
  /// replaces the row, so repeated installs never duplicate entries.
  pub fn put(&self, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO responses (key_hash, method, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          key.store_hash(),
          key.method(),
          key.url(),
          response.status,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  /// Look up the stored response for a key.
  pub fn get(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM responses WHERE key_hash = ?",
        params![key.store_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query store: {}", e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(StoredResponse {
          status,
          headers,
          body,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  /// Number of responses currently stored.
  pub fn len(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM responses", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count store entries: {}", e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
