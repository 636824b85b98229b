use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub site: SiteConfig,
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
  /// Origin the worker serves; same-origin requests go through the cache.
  pub origin: String,
  /// Absolute paths fetched and stored at install time.
  pub precache: Vec<String>,
}

impl Default for SiteConfig {
  fn default() -> Self {
    Self {
      origin: "https://changedinar.com".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/style.css".to_string(),
        "/script.js".to_string(),
        "/manifest.json".to_string(),
        "/images/logo.png".to_string(),
        "/images/flags/algeria.png".to_string(),
        "/images/flags/euro.png".to_string(),
        "/images/flags/usa.png".to_string(),
        "/images/flags/uk.png".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Origin of the rates API; requests here are network-first.
  pub origin: String,
  /// Path of the primary rates endpoint, fetched on background sync.
  pub rates_endpoint: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      origin: "https://changedinaradmin-main-ufzenb.laravel.cloud".to_string(),
      rates_endpoint: "/api/v1/today".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache store version tag. Bump it to trigger a full precache and
  /// deletion of the previous generation on the next activation.
  pub version: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "change-dinar-v1".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Seconds between periodic rates syncs in daemon mode.
  pub interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { interval_secs: 300 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dinar-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dinar-sw/config.yaml
  ///
  /// Every field has a default matching the production deployment, so a
  /// missing config file yields a working configuration.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("dinar-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dinar-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_deployment() {
    let config = Config::default();
    assert_eq!(config.cache.version, "change-dinar-v1");
    assert_eq!(config.api.rates_endpoint, "/api/v1/today");
    assert_eq!(config.sync.interval_secs, 300);
    assert!(config.site.precache.contains(&"/".to_string()));
    assert!(config.site.precache.contains(&"/style.css".to_string()));
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let yaml = r#"
site:
  origin: "https://staging.changedinar.com"
cache:
  version: "change-dinar-v2"
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.site.origin, "https://staging.changedinar.com");
    assert_eq!(config.cache.version, "change-dinar-v2");
    // Untouched sections keep their defaults
    assert_eq!(config.api.rates_endpoint, "/api/v1/today");
    assert_eq!(config.site.precache.len(), 10);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let result = Config::load(Some(Path::new("/nonexistent/dinar-sw.yaml")));
    assert!(result.is_err());
  }
}
