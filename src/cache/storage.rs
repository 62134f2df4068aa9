//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

use super::traits::{entry_key, CachedResponse};
use crate::net::{Response, ResponseType};

/// Named cache stores holding request URL to response entries.
///
/// Stores are kept in creation order; `lookup_any` searches them in that order.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Names of all stores, oldest first.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and every entry in it. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Store a response, replacing any entry for the same URL.
  fn put(&self, name: &str, url: &Url, response: &Response) -> Result<()>;

  /// Look up a URL in one store.
  fn lookup(&self, name: &str, url: &Url) -> Result<Option<CachedResponse>>;

  /// Look up a URL across all stores.
  fn lookup_any(&self, url: &Url) -> Result<Option<CachedResponse>>;

  /// URLs stored in a store.
  fn entry_urls(&self, name: &str) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pwa-gate").join("cache.db"))
  }

  /// Run database migrations for cache tables.
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
-- One row per named cache store; rowid gives creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(entry_key);
"#;

/// Raw column values of a `cache_entries` row.
type EntryRow = (String, u16, String, String, String, Vec<u8>, String);

const ENTRY_COLUMNS: &str =
  "e.url, e.status, e.status_text, e.response_type, e.headers, e.body, e.cached_at";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
    row.get(6)?,
  ))
}

fn into_cached(row: EntryRow) -> Result<CachedResponse> {
  let (url, status, status_text, response_type, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;
  let response_type: ResponseType = response_type
    .parse()
    .map_err(|e| eyre!("Bad cache entry for {}: {}", url, e))?;

  Ok(CachedResponse {
    response: Response {
      status,
      status_text,
      headers,
      body,
      response_type,
    },
    cached_at: parse_datetime(&cached_at)?,
    url,
  })
}

impl CacheStorage for SqliteStorage {
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
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, name: &str, url: &Url, response: &Response) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, entry_key, url, status, status_text, response_type, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        entry_key(url),
        url.as_str(),
        response.status,
        response.status_text,
        response.response_type.as_str(),
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", url, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, name: &str, url: &Url) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(
      "SELECT {} FROM cache_entries e WHERE e.cache_name = ? AND e.entry_key = ?",
      ENTRY_COLUMNS
    );
    let row = conn
      .query_row(&sql, params![name, entry_key(url)], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", url, e))?;

    row.map(into_cached).transpose()
  }

  fn lookup_any(&self, url: &Url) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(
      "SELECT {} FROM cache_entries e
       INNER JOIN cache_stores s ON s.name = e.cache_name
       WHERE e.entry_key = ?
       ORDER BY s.rowid
       LIMIT 1",
      ENTRY_COLUMNS
    );
    let row = conn
      .query_row(&sql, params![entry_key(url)], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", url, e))?;

    row.map(into_cached).transpose()
  }

  fn entry_urls(&self, name: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry url: {}", e))?;

    Ok(urls)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<Vec<MemoryStore>>,
}

struct MemoryStore {
  name: String,
  entries: HashMap<String, CachedResponse>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !stores.iter().any(|s| s.name == name) {
      stores.push(MemoryStore {
        name: name.to_string(),
        entries: HashMap::new(),
      });
    }
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(stores.iter().map(|s| s.name.clone()).collect())
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let before = stores.len();
    stores.retain(|s| s.name != name);
    Ok(stores.len() != before)
  }

  fn put(&self, name: &str, url: &Url, response: &Response) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let index = match stores.iter().position(|s| s.name == name) {
      Some(index) => index,
      None => {
        stores.push(MemoryStore {
          name: name.to_string(),
          entries: HashMap::new(),
        });
        stores.len() - 1
      }
    };

    stores[index].entries.insert(
      entry_key(url),
      CachedResponse {
        url: url.to_string(),
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn lookup(&self, name: &str, url: &Url) -> Result<Option<CachedResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key = entry_key(url);
    Ok(
      stores
        .iter()
        .find(|s| s.name == name)
        .and_then(|s| s.entries.get(&key).cloned()),
    )
  }

  fn lookup_any(&self, url: &Url) -> Result<Option<CachedResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key = entry_key(url);
    Ok(stores.iter().find_map(|s| s.entries.get(&key).cloned()))
  }

  fn entry_urls(&self, name: &str) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut urls: Vec<String> = stores
      .iter()
      .find(|s| s.name == name)
      .map(|s| s.entries.values().map(|e| e.url.clone()).collect())
      .unwrap_or_default();
    urls.sort();
    Ok(urls)
  }
}
