//! Core trait for cache store backends.

use color_eyre::Result;

use crate::http::{RequestKey, StoredResponse};

/// Trait for versioned cache store backends.
///
/// A backend holds any number of named stores. The worker keeps exactly one
/// store "current" (the one matching its version tag); the rest exist only
/// until the next activation deletes them.
///
/// Implementations must provide atomic put/match per key: a read racing a
/// concurrent write for the same key returns either the old or the new
/// response, never a partial value.
pub trait CacheStore: Send + Sync + 'static {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Store a response under the request key, replacing any previous entry.
  fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()>;

  /// Look up the stored response for a request key.
  fn match_request(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Names of all existing stores, current and stale alike.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and every entry in it. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;
}
