//! Cache store backends: SQLite for persistence, in-memory for ephemeral runs.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

use super::traits::CacheStore;
use crate::http::{RequestKey, StoredResponse};

/// SQLite-backed cache store.
///
/// All generations share one database; the store name column separates them,
/// so deleting a stale generation is a pair of DELETE statements.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory cache database. Used by tests.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("dinar-sw").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache store generation
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by (store, request)
CREATE TABLE IF NOT EXISTS response_cache (
    store_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (store_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_store ON response_cache(store_name);
"#;

impl CacheStore for SqliteStore {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;

    Ok(())
  }

  fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
         (store_name, request_key, method, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          store,
          key.cache_hash(),
          key.method,
          key.url,
          response.status,
          headers,
          response.body,
          response.stored_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store response for {}: {}", key, e))?;

    Ok(())
  }

  fn match_request(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM response_cache
         WHERE store_name = ? AND request_key = ?",
        params![store, key.cache_hash()],
        |row| {
          Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up response for {}: {}", key, e))?;

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

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare store listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE store_name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete entries of store {}: {}", name, e))?;

    let deleted = conn
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    Ok(deleted > 0)
  }
}

/// Parse an RFC 3339 timestamp written by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// In-memory cache store. No persistence; used for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryStore {
  stores: Mutex<HashMap<String, HashMap<String, StoredResponse>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn open_store(&self, name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores.entry(name.to_string()).or_default();
    Ok(())
  }

  fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores
      .entry(store.to_string())
      .or_default()
      .insert(key.cache_hash(), response.clone());
    Ok(())
  }

  fn match_request(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .get(store)
        .and_then(|entries| entries.get(&key.cache_hash()))
        .cloned(),
    )
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut names: Vec<String> = stores.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.remove(name).is_some())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Request;
  use url::Url;

  fn key(url: &str) -> RequestKey {
    Request::get(Url::parse(url).unwrap()).key()
  }

  fn response(body: &str) -> StoredResponse {
    StoredResponse {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.as_bytes().to_vec(),
      stored_at: Utc::now(),
    }
  }

  fn backends() -> Vec<Box<dyn CacheStore>> {
    vec![
      Box::new(SqliteStore::open_in_memory().unwrap()),
      Box::new(MemoryStore::new()),
    ]
  }

  #[test]
  fn test_put_then_match_roundtrip() {
    for store in backends() {
      store.open_store("change-dinar-v1").unwrap();
      let k = key("https://changedinar.com/style.css");
      let r = response("body { color: green }");

      store.put("change-dinar-v1", &k, &r).unwrap();

      let found = store.match_request("change-dinar-v1", &k).unwrap().unwrap();
      assert_eq!(found.status, 200);
      assert_eq!(found.body, r.body);
      assert_eq!(found.headers, r.headers);
    }
  }

  #[test]
  fn test_match_misses_for_unknown_key() {
    for store in backends() {
      store.open_store("change-dinar-v1").unwrap();
      let found = store
        .match_request("change-dinar-v1", &key("https://changedinar.com/missing.js"))
        .unwrap();
      assert!(found.is_none());
    }
  }

  #[test]
  fn test_put_overwrites_previous_entry() {
    for store in backends() {
      store.open_store("change-dinar-v1").unwrap();
      let k = key("https://changedinar.com/");

      store.put("change-dinar-v1", &k, &response("old")).unwrap();
      store.put("change-dinar-v1", &k, &response("new")).unwrap();

      let found = store.match_request("change-dinar-v1", &k).unwrap().unwrap();
      assert_eq!(found.body, b"new");
    }
  }

  #[test]
  fn test_stores_are_isolated_by_name() {
    for store in backends() {
      store.open_store("change-dinar-v0").unwrap();
      store.open_store("change-dinar-v1").unwrap();
      let k = key("https://changedinar.com/");

      store.put("change-dinar-v0", &k, &response("v0")).unwrap();

      assert!(store.match_request("change-dinar-v1", &k).unwrap().is_none());
    }
  }

  #[test]
  fn test_delete_store_removes_entries() {
    for store in backends() {
      store.open_store("change-dinar-v0").unwrap();
      store.open_store("change-dinar-v1").unwrap();
      let k = key("https://changedinar.com/");
      store.put("change-dinar-v0", &k, &response("stale")).unwrap();

      assert!(store.delete_store("change-dinar-v0").unwrap());
      assert!(!store.delete_store("change-dinar-v0").unwrap());

      assert_eq!(store.store_names().unwrap(), vec!["change-dinar-v1"]);
      assert!(store.match_request("change-dinar-v0", &k).unwrap().is_none());
    }
  }

  #[test]
  fn test_open_store_is_idempotent() {
    for store in backends() {
      store.open_store("change-dinar-v1").unwrap();
      let k = key("https://changedinar.com/");
      store.put("change-dinar-v1", &k, &response("kept")).unwrap();

      // Re-opening must not clear existing entries
      store.open_store("change-dinar-v1").unwrap();
      assert!(store.match_request("change-dinar-v1", &k).unwrap().is_some());
      assert_eq!(store.store_names().unwrap().len(), 1);
    }
  }

  #[test]
  fn test_stored_at_survives_roundtrip() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.open_store("change-dinar-v1").unwrap();
    let k = key("https://changedinar.com/");
    let r = response("timestamped");

    store.put("change-dinar-v1", &k, &r).unwrap();

    let found = store.match_request("change-dinar-v1", &k).unwrap().unwrap();
    // RFC 3339 keeps sub-second precision, so the stamp is preserved
    assert_eq!(found.stored_at, r.stored_at);
  }
}
