//! Core types for cache lookups and the provenance of served responses.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::Response;

/// A response retrieved from a cache store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// URL the entry was stored under
  pub url: String,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Stable key for a request URL within a store.
///
/// Fragments never reach the server, so `/page#a` and `/page#b` share an entry.
pub fn entry_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// Data handed back to the page, together with where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Live data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cached entry for the requested URL, served because the network failed.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Cached root document served in place of an uncached URL.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::OfflineFallback,
      cached_at: Some(cached_at),
    }
  }

  /// Built by the worker itself (error payloads).
  pub fn synthesized(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthesized,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  /// Exact cache hit while offline
  Cache,
  /// Offline page substituted for a cache miss
  OfflineFallback,
  Synthesized,
}

impl CacheSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::OfflineFallback => "offline-fallback",
      Self::Synthesized => "synthesized",
    }
  }
}
