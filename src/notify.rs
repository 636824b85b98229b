//! Push notification payloads and the notifications built from them.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

/// Notification title used when the push payload carries none.
pub const DEFAULT_TITLE: &str = "Change Dinar";
/// Localized default body text.
pub const DEFAULT_BODY: &str = "Neue Wechselkurse verfügbar";
/// Target URL used when the push payload carries none.
pub const DEFAULT_URL: &str = "/";

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

/// Raw push payload. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  url: Option<String>,
}

/// One button on a displayed notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// A system notification ready for display by the platform.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// URL opened or focused when the notification is clicked
  pub url: String,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Build a notification from a raw push payload.
  ///
  /// The payload must be non-empty JSON; absent fields fall back to the
  /// fixed defaults.
  pub fn from_push(payload: &[u8]) -> Result<Self> {
    if payload.is_empty() {
      return Err(eyre!("Push event carried no payload"));
    }

    let payload: PushPayload = serde_json::from_slice(payload)
      .map_err(|e| eyre!("Failed to parse push payload: {}", e))?;

    Ok(Self {
      title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: payload.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
      icon: "/images/logo.png".to_string(),
      badge: "/images/icons/badge.png".to_string(),
      vibrate: vec![100, 50, 100],
      url: payload.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
      actions: vec![
        NotificationAction {
          action: ACTION_OPEN.to_string(),
          title: "Öffnen".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Schließen".to_string(),
        },
      ],
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_full_payload() {
    let notification = Notification::from_push(
      r#"{"title": "Kursalarm", "body": "EUR über 250", "url": "/unofficial"}"#.as_bytes(),
    )
    .unwrap();

    assert_eq!(notification.title, "Kursalarm");
    assert_eq!(notification.body, "EUR über 250");
    assert_eq!(notification.url, "/unofficial");
  }

  #[test]
  fn test_defaults_apply_field_by_field() {
    let notification = Notification::from_push(br#"{"url": "/crypto"}"#).unwrap();

    assert_eq!(notification.title, DEFAULT_TITLE);
    assert_eq!(notification.body, DEFAULT_BODY);
    assert_eq!(notification.url, "/crypto");

    let notification = Notification::from_push(b"{}").unwrap();
    assert_eq!(notification.title, DEFAULT_TITLE);
    assert_eq!(notification.body, DEFAULT_BODY);
    assert_eq!(notification.url, DEFAULT_URL);
  }

  #[test]
  fn test_actions_and_presentation_are_fixed() {
    let notification = Notification::from_push(b"{}").unwrap();

    assert_eq!(notification.icon, "/images/logo.png");
    assert_eq!(notification.badge, "/images/icons/badge.png");
    assert_eq!(notification.vibrate, vec![100, 50, 100]);
    assert_eq!(notification.actions.len(), 2);
    assert_eq!(notification.actions[0].action, ACTION_OPEN);
    assert_eq!(notification.actions[1].action, ACTION_DISMISS);
  }

  #[test]
  fn test_empty_payload_is_an_error() {
    assert!(Notification::from_push(b"").is_err());
  }

  #[test]
  fn test_malformed_payload_is_an_error() {
    assert!(Notification::from_push(b"not json").is_err());
  }
}
