//! The offline cache worker.
//!
//! One instance mediates all intercepted requests through a versioned cache
//! store. Lifecycle mirrors the hosting platform's worker lifecycle:
//! install (precache), activate (purge stale generations, claim clients),
//! then per-event dispatch for fetches, background sync, and push.
//!
//! Routing policy:
//! - same-origin: cache-first, revalidated in the background
//! - rates-API origin: network-first, cache as fallback
//! - any other origin: passthrough, never cached

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::{ClientHandle, ClientId, ClientMessage, ClientRegistry};
use crate::config::Config;
use crate::http::{
  classify, Request, RequestClass, RequestKey, RequestMode, StoredResponse,
};
use crate::net::Fetcher;
use crate::notify::{Notification, ACTION_DISMISS};

/// Sync tag the worker reacts to; all other tags are ignored.
pub const SYNC_RATES_TAG: &str = "sync-rates";

/// Worker lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
  /// Not installed; a failed install returns here
  Idle,
  Installing,
  /// Precache complete, waiting for activation
  Installed,
  Activating,
  /// Handling requests until superseded
  Active,
}

/// Result of routing one intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// A response was served, from cache or network
  Response(StoredResponse),
  /// Not intercepted; the caller talks to the network directly
  Passthrough,
  /// Both network and cache failed; the caller observes a network error
  NoResponse,
}

/// Result of a notification interaction.
#[derive(Debug)]
pub enum ClickOutcome {
  /// The dismiss action; nothing further happens
  Dismissed,
  /// An existing client at the target URL was focused
  Focused(ClientId),
  /// A new client window was opened at the target URL
  Opened(ClientHandle),
}

/// Platform events delivered to the worker's event loop.
#[derive(Debug)]
pub enum WorkerEvent {
  /// Intercepted network request; the outcome goes back over the reply
  /// channel to whoever issued the request
  Fetch {
    request: Request,
    reply: oneshot::Sender<FetchOutcome>,
  },
  /// Connectivity restored with a pending sync registration
  Sync { tag: String },
  /// Push message received
  Push { payload: Vec<u8> },
  /// The user interacted with a displayed notification
  NotificationClick {
    notification: Notification,
    action: Option<String>,
  },
  /// Shut the worker down
  Close,
}

pub struct Worker<S: CacheStore, F: Fetcher> {
  store: Arc<S>,
  fetcher: Arc<F>,
  clients: Arc<ClientRegistry>,
  site_origin: Url,
  api_origin: Url,
  rates_url: Url,
  cache_name: String,
  precache: Vec<Url>,
  state: WorkerState,
  /// Extended background tasks (revalidations); allowed to finish even
  /// after their triggering request was answered
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStore, F: Fetcher> Worker<S, F> {
  pub fn new(
    config: &Config,
    store: S,
    fetcher: F,
    clients: Arc<ClientRegistry>,
  ) -> Result<Self> {
    let site_origin = Url::parse(&config.site.origin)
      .map_err(|e| eyre!("Invalid site origin {}: {}", config.site.origin, e))?;
    let api_origin = Url::parse(&config.api.origin)
      .map_err(|e| eyre!("Invalid API origin {}: {}", config.api.origin, e))?;
    let rates_url = api_origin
      .join(&config.api.rates_endpoint)
      .map_err(|e| eyre!("Invalid rates endpoint {}: {}", config.api.rates_endpoint, e))?;

    let precache = config
      .site
      .precache
      .iter()
      .map(|path| {
        site_origin
          .join(path)
          .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))
      })
      .collect::<Result<Vec<Url>>>()?;

    Ok(Self {
      store: Arc::new(store),
      fetcher: Arc::new(fetcher),
      clients,
      site_origin,
      api_origin,
      rates_url,
      cache_name: config.cache.version.clone(),
      precache,
      state: WorkerState::Idle,
      tasks: Mutex::new(Vec::new()),
    })
  }

  #[allow(dead_code)]
  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Install: open the current store and precache the manifest.
  ///
  /// All-or-nothing: every asset is fetched first, and only when all of
  /// them succeeded is anything written. A failed install leaves the worker
  /// in `Idle` so the caller can retry; the previous generation keeps
  /// serving untouched.
  pub async fn install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;

    match self.precache_all().await {
      Ok(count) => {
        // Skip waiting: no pause for the previous generation's clients
        self.state = WorkerState::Installed;
        info!(assets = count, store = %self.cache_name, "install complete");
        Ok(())
      }
      Err(err) => {
        self.state = WorkerState::Idle;
        Err(err)
      }
    }
  }

  async fn precache_all(&self) -> Result<usize> {
    self.store.open_store(&self.cache_name)?;

    let fetches = self.precache.iter().map(|url| {
      let request = Request::get(url.clone());
      async move {
        let response = self.fetcher.fetch(&request).await?;
        if !response.is_success() {
          return Err(eyre!(
            "Precache fetch for {} returned status {}",
            request.url,
            response.status
          ));
        }
        Ok((request, response))
      }
    });

    let fetched = try_join_all(fetches).await?;
    for (request, response) in fetched {
      self
        .store
        .put(&self.cache_name, &request.key(), &response.into_stored())?;
    }

    Ok(self.precache.len())
  }

  /// Activate: delete every stale store generation and claim open clients.
  pub async fn activate(&mut self) -> Result<()> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate from {:?} state", self.state));
    }
    self.state = WorkerState::Activating;

    for name in self.store.store_names()? {
      if name != self.cache_name {
        self.store.delete_store(&name)?;
        info!(store = %name, "deleted stale cache store");
      }
    }

    self.clients.claim_all();
    self.state = WorkerState::Active;
    info!(store = %self.cache_name, clients = self.clients.controlled_count(), "worker active");
    Ok(())
  }

  /// Route one intercepted request.
  ///
  /// Never fails: cache errors degrade to misses, network errors to cache
  /// fallbacks or `NoResponse`.
  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    match classify(&request.url, &self.site_origin, &self.api_origin) {
      RequestClass::CrossOrigin => FetchOutcome::Passthrough,
      RequestClass::RatesApi => self.network_first(request).await,
      RequestClass::SameOrigin => self.cache_first(request).await,
    }
  }

  /// Network-first for the rates API: live response wins, cache is the
  /// offline fallback for the exact request key.
  async fn network_first(&self, request: &Request) -> FetchOutcome {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        let stored = response.into_stored();
        self.put_best_effort(&request.key(), &stored);
        FetchOutcome::Response(stored)
      }
      Err(err) => {
        debug!(url = %request.url, "API fetch failed, trying cache: {err:#}");
        match self.lookup(&request.key()) {
          Some(cached) => FetchOutcome::Response(cached),
          None => FetchOutcome::NoResponse,
        }
      }
    }
  }

  /// Cache-first for same-origin requests, with background revalidation on
  /// a hit and a root-shell fallback for failed navigations.
  async fn cache_first(&self, request: &Request) -> FetchOutcome {
    if let Some(cached) = self.lookup(&request.key()) {
      // Serve the cached copy immediately; refresh it off the response path
      self.spawn_revalidation(request.clone());
      return FetchOutcome::Response(cached);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        let stored = response.into_stored();
        if stored.is_success() {
          self.put_best_effort(&request.key(), &stored);
        }
        FetchOutcome::Response(stored)
      }
      Err(err) => {
        debug!(url = %request.url, "fetch failed with empty cache: {err:#}");
        if request.mode == RequestMode::Navigate {
          // Serve the cached shell so the user sees the app, not an error
          match self.lookup(&self.shell_key()) {
            Some(shell) => FetchOutcome::Response(shell),
            None => FetchOutcome::NoResponse,
          }
        } else {
          FetchOutcome::NoResponse
        }
      }
    }
  }

  /// Cache key of the root shell page.
  fn shell_key(&self) -> RequestKey {
    // site_origin parses to the root URL, so this is "GET <origin>/"
    Request::get(self.site_origin.clone()).key()
  }

  fn lookup(&self, key: &RequestKey) -> Option<StoredResponse> {
    match self.store.match_request(&self.cache_name, key) {
      Ok(found) => found,
      Err(err) => {
        // A broken cache read is a miss, never a failed request
        warn!(key = %key, "cache lookup failed: {err:#}");
        None
      }
    }
  }

  fn put_best_effort(&self, key: &RequestKey, response: &StoredResponse) {
    if let Err(err) = self.store.put(&self.cache_name, key, response) {
      warn!(key = %key, "cache write failed: {err:#}");
    }
  }

  /// Refresh a cache entry without blocking the already-returned response.
  /// Every failure in here is swallowed; last writer wins on the entry.
  fn spawn_revalidation(&self, request: Request) {
    let fetcher = Arc::clone(&self.fetcher);
    let store = Arc::clone(&self.store);
    let cache_name = self.cache_name.clone();

    let handle = tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          if let Err(err) = store.put(&cache_name, &request.key(), &response.into_stored()) {
            debug!(url = %request.url, "revalidation write failed: {err:#}");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "revalidation kept stale entry");
        }
        Err(err) => {
          debug!(url = %request.url, "revalidation fetch failed: {err:#}");
        }
      }
    });

    if let Ok(mut tasks) = self.tasks.lock() {
      tasks.push(handle);
    }
  }

  /// Let in-flight background tasks finish ("waitUntil" semantics).
  pub async fn drain_background_tasks(&self) {
    let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
      Ok(mut tasks) => tasks.drain(..).collect(),
      Err(_) => return,
    };
    for handle in handles {
      let _ = handle.await;
    }
  }

  /// React to a connectivity-restored signal. Only the rates tag does
  /// anything; failures are logged and never retried here.
  pub async fn handle_sync(&self, tag: &str) {
    if tag != SYNC_RATES_TAG {
      debug!(tag, "ignoring sync with unknown tag");
      return;
    }

    match self.sync_rates().await {
      Ok(delivered) => info!(clients = delivered, "rates sync broadcast"),
      Err(err) => error!("Background sync failed: {err:#}"),
    }
  }

  async fn sync_rates(&self) -> Result<usize> {
    let request = Request::get(self.rates_url.clone());
    let response = self.fetcher.fetch(&request).await?;

    let data: serde_json::Value = serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Failed to parse rates payload: {}", e))?;

    Ok(self.clients.broadcast(&ClientMessage::RatesUpdated { data }))
  }

  /// Build the notification for a push payload.
  pub fn handle_push(&self, payload: &[u8]) -> Result<Notification> {
    Notification::from_push(payload)
  }

  /// Resolve a notification interaction. Dismiss does nothing; anything
  /// else focuses an existing client at the target URL or opens a new one.
  pub fn handle_notification_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> ClickOutcome {
    if action == Some(ACTION_DISMISS) {
      return ClickOutcome::Dismissed;
    }

    if let Some(id) = self.clients.find_by_url(&notification.url) {
      self.clients.focus(id);
      return ClickOutcome::Focused(id);
    }

    ClickOutcome::Opened(self.clients.open_window(&notification.url))
  }

  /// Event loop: dispatch platform events until the channel closes or a
  /// `Close` event arrives, then let background tasks drain.
  pub async fn run(&self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
      match event {
        WorkerEvent::Fetch { request, reply } => {
          let outcome = self.handle_fetch(&request).await;
          let _ = reply.send(outcome);
        }
        WorkerEvent::Sync { tag } => self.handle_sync(&tag).await,
        WorkerEvent::Push { payload } => match self.handle_push(&payload) {
          Ok(notification) => {
            info!(title = %notification.title, url = %notification.url, "push notification displayed");
          }
          Err(err) => warn!("push dropped: {err:#}"),
        },
        WorkerEvent::NotificationClick {
          notification,
          action,
        } => match self.handle_notification_click(&notification, action.as_deref()) {
          ClickOutcome::Dismissed => {}
          ClickOutcome::Focused(id) => info!(client = id, "focused existing client"),
          ClickOutcome::Opened(handle) => {
            info!(client = handle.id, url = %handle.url, "opened new client window");
          }
        },
        WorkerEvent::Close => break,
      }
    }

    self.drain_background_tasks().await;
  }
}
