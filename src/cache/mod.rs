//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named cache stores, one per cache generation
//! - URL-keyed response entries with last-writer-wins replacement
//! - Provenance tags for responses handed back to the page

mod storage;
mod traits;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, CachedResponse};
