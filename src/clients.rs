//! Registry of connected page instances (clients).
//!
//! The worker broadcasts messages here after a background sync, claims
//! clients on activation, and focuses or opens windows from notification
//! clicks. Each client receives messages over its own unbounded channel.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub type ClientId = u64;

/// Message broadcast from the worker to every open client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// Fresh rates payload arrived via background sync.
  #[serde(rename = "RATES_UPDATED")]
  RatesUpdated { data: Value },
}

/// Receiving end held by a page instance.
#[derive(Debug)]
pub struct ClientHandle {
  pub id: ClientId,
  pub url: String,
  rx: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ClientHandle {
  /// Wait for the next message from the worker.
  #[allow(dead_code)]
  pub async fn next_message(&mut self) -> Option<ClientMessage> {
    self.rx.recv().await
  }

  /// Take an already-delivered message, if any.
  #[allow(dead_code)]
  pub fn try_next_message(&mut self) -> Option<ClientMessage> {
    self.rx.try_recv().ok()
  }
}

struct ClientEntry {
  id: ClientId,
  url: String,
  tx: mpsc::UnboundedSender<ClientMessage>,
  /// Whether this worker instance controls the client (set on activation)
  controlled: bool,
  focused: bool,
}

/// Registry shared between the worker and the hosting platform glue.
#[derive(Default)]
pub struct ClientRegistry {
  entries: Mutex<Vec<ClientEntry>>,
  next_id: AtomicU64,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a newly opened page at the given URL.
  pub fn connect(&self, url: &str) -> ClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);

    if let Ok(mut entries) = self.entries.lock() {
      entries.push(ClientEntry {
        id,
        url: url.to_string(),
        tx,
        controlled: false,
        focused: false,
      });
    }

    ClientHandle {
      id,
      url: url.to_string(),
      rx,
    }
  }

  /// Remove a client (page closed).
  #[allow(dead_code)]
  pub fn disconnect(&self, id: ClientId) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.retain(|entry| entry.id != id);
    }
  }

  /// Take control of every connected client. Called on worker activation so
  /// subsequent requests are handled by the new instance.
  pub fn claim_all(&self) {
    if let Ok(mut entries) = self.entries.lock() {
      for entry in entries.iter_mut() {
        entry.controlled = true;
      }
    }
  }

  /// Number of clients controlled by the active worker.
  pub fn controlled_count(&self) -> usize {
    self
      .entries
      .lock()
      .map(|entries| entries.iter().filter(|e| e.controlled).count())
      .unwrap_or(0)
  }

  /// Send a message to every connected client. Clients whose receiving end
  /// is gone are dropped from the registry. Returns the delivery count.
  pub fn broadcast(&self, message: &ClientMessage) -> usize {
    let Ok(mut entries) = self.entries.lock() else {
      return 0;
    };

    entries.retain(|entry| entry.tx.send(message.clone()).is_ok());
    entries.len()
  }

  /// First client currently displaying the given URL.
  pub fn find_by_url(&self, url: &str) -> Option<ClientId> {
    self
      .entries
      .lock()
      .ok()?
      .iter()
      .find(|entry| entry.url == url)
      .map(|entry| entry.id)
  }

  /// Bring a client to the foreground. Returns false if it is gone.
  pub fn focus(&self, id: ClientId) -> bool {
    let Ok(mut entries) = self.entries.lock() else {
      return false;
    };

    let mut found = false;
    for entry in entries.iter_mut() {
      entry.focused = entry.id == id;
      found |= entry.focused;
    }
    found
  }

  /// Currently focused client, if any.
  #[allow(dead_code)]
  pub fn focused(&self) -> Option<ClientId> {
    self
      .entries
      .lock()
      .ok()?
      .iter()
      .find(|entry| entry.focused)
      .map(|entry| entry.id)
  }

  /// Open a new client window at the given URL and focus it.
  pub fn open_window(&self, url: &str) -> ClientHandle {
    let handle = self.connect(url);
    self.focus(handle.id);
    handle
  }

  #[allow(dead_code)]
  pub fn len(&self) -> usize {
    self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_broadcast_reaches_every_client() {
    let registry = ClientRegistry::new();
    let mut a = registry.connect("/");
    let mut b = registry.connect("/crypto");

    let message = ClientMessage::RatesUpdated {
      data: json!({"EUR": {"buy": 243.0, "sell": 245.5}}),
    };
    let delivered = registry.broadcast(&message);

    assert_eq!(delivered, 2);
    assert_eq!(a.try_next_message(), Some(message.clone()));
    assert_eq!(b.try_next_message(), Some(message));
  }

  #[test]
  fn test_broadcast_prunes_closed_clients() {
    let registry = ClientRegistry::new();
    let a = registry.connect("/");
    let _b = registry.connect("/crypto");
    drop(a);

    let delivered = registry.broadcast(&ClientMessage::RatesUpdated {
      data: json!(null),
    });

    assert_eq!(delivered, 1);
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_claim_all_controls_connected_clients() {
    let registry = ClientRegistry::new();
    let _a = registry.connect("/");
    let _b = registry.connect("/");

    assert_eq!(registry.controlled_count(), 0);
    registry.claim_all();
    assert_eq!(registry.controlled_count(), 2);
  }

  #[test]
  fn test_find_by_url_and_focus() {
    let registry = ClientRegistry::new();
    let a = registry.connect("/");
    let b = registry.connect("/crypto");

    let found = registry.find_by_url("/crypto").unwrap();
    assert_eq!(found, b.id);

    assert!(registry.focus(found));
    assert_eq!(registry.focused(), Some(b.id));

    // Focusing another client moves focus
    assert!(registry.focus(a.id));
    assert_eq!(registry.focused(), Some(a.id));
  }

  #[test]
  fn test_focus_missing_client_returns_false() {
    let registry = ClientRegistry::new();
    let a = registry.connect("/");
    registry.disconnect(a.id);

    assert!(!registry.focus(a.id));
    assert!(registry.is_empty());
  }

  #[test]
  fn test_open_window_connects_and_focuses() {
    let registry = ClientRegistry::new();
    let handle = registry.open_window("/unofficial");

    assert_eq!(registry.find_by_url("/unofficial"), Some(handle.id));
    assert_eq!(registry.focused(), Some(handle.id));
  }

  #[test]
  fn test_message_wire_format() {
    let message = ClientMessage::RatesUpdated {
      data: json!({"USD": 238.0}),
    };
    let wire = serde_json::to_value(&message).unwrap();
    assert_eq!(
      wire,
      json!({"type": "RATES_UPDATED", "data": {"USD": 238.0}})
    );
  }
}
