//! Request and response types shared by the cache store and the worker.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// How a request was initiated by the page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level navigation (the user loading a page)
  Navigate,
  /// Any sub-resource load (stylesheet, script, image, API call)
  SubResource,
}

/// An intercepted outgoing request.
#[derive(Clone, Debug)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  /// A plain GET sub-resource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::SubResource,
    }
  }

  /// A top-level navigation request.
  #[allow(dead_code)]
  pub fn navigate(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Navigate,
    }
  }

  /// The cache key identifying this request (method + URL).
  pub fn key(&self) -> RequestKey {
    RequestKey {
      method: self.method.clone(),
      url: self.url.to_string(),
    }
  }
}

/// Cache key for a stored response: method plus full URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A response freshly read from the network.
#[derive(Clone, Debug)]
pub struct FetchedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchedResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Stamp the response for cache storage.
  pub fn into_stored(self) -> StoredResponse {
    StoredResponse {
      status: self.status,
      headers: self.headers,
      body: self.body,
      stored_at: Utc::now(),
    }
  }
}

/// A response as it lives in a cache store. The body is immutable once
/// written; it is only ever replaced whole by a newer fetch for the same key.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Routing class of an intercepted request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestClass {
  /// Same origin as the site: cache-first with background revalidation
  SameOrigin,
  /// The rates-API origin: network-first with cache fallback
  RatesApi,
  /// Any other cross-origin request: not intercepted
  CrossOrigin,
}

/// Classify a request URL against the site and API origins.
pub fn classify(url: &Url, site: &Url, api: &Url) -> RequestClass {
  if url.origin() == site.origin() {
    RequestClass::SameOrigin
  } else if url.origin() == api.origin() {
    RequestClass::RatesApi
  } else {
    RequestClass::CrossOrigin
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_is_method_plus_url() {
    let request = Request::get(url("https://changedinar.com/style.css"));
    let key = request.key();
    assert_eq!(key.to_string(), "GET https://changedinar.com/style.css");
  }

  #[test]
  fn test_cache_hash_is_stable_and_distinct() {
    let a = Request::get(url("https://changedinar.com/")).key();
    let b = Request::get(url("https://changedinar.com/")).key();
    let c = Request::get(url("https://changedinar.com/index.html")).key();

    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_ne!(a.cache_hash(), c.cache_hash());
    // Fixed-length hex
    assert_eq!(a.cache_hash().len(), 64);
  }

  #[test]
  fn test_navigation_and_subresource_share_a_key() {
    let nav = Request::navigate(url("https://changedinar.com/"));
    let sub = Request::get(url("https://changedinar.com/"));
    assert_eq!(nav.key(), sub.key());
  }

  #[test]
  fn test_classify_origins() {
    let site = url("https://changedinar.com");
    let api = url("https://changedinaradmin-main-ufzenb.laravel.cloud");

    assert_eq!(
      classify(&url("https://changedinar.com/script.js"), &site, &api),
      RequestClass::SameOrigin
    );
    assert_eq!(
      classify(
        &url("https://changedinaradmin-main-ufzenb.laravel.cloud/api/v1/today"),
        &site,
        &api
      ),
      RequestClass::RatesApi
    );
    assert_eq!(
      classify(&url("https://fonts.googleapis.com/css"), &site, &api),
      RequestClass::CrossOrigin
    );
    // Same host, different scheme is a different origin
    assert_eq!(
      classify(&url("http://changedinar.com/"), &site, &api),
      RequestClass::CrossOrigin
    );
  }

  #[test]
  fn test_success_status_range() {
    let response = FetchedResponse {
      status: 204,
      headers: vec![],
      body: vec![],
    };
    assert!(response.is_success());

    let stored = FetchedResponse {
      status: 404,
      headers: vec![],
      body: vec![],
    }
    .into_stored();
    assert!(!stored.is_success());
  }
}
