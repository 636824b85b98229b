//! Versioned response cache for offline support.
//!
//! This module provides the storage side of the worker:
//! - Named cache stores, one generation per version tag
//! - Responses keyed by request (method + URL)
//! - Atomic per-key put/match semantics; last writer wins
//! - Whole-store deletion for purging stale generations

mod storage;
mod traits;

pub use storage::{MemoryStore, SqliteStore};
pub use traits::CacheStore;
