use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::{Notification, NotificationOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub gate: GateConfig,
  pub storage: StorageConfig,
  pub api: ApiConfig,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

/// Worker-scoped settings, fixed for the lifetime of one gatekeeper.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
  /// Origin the worker is registered for; shell paths resolve against it
  pub origin: Url,
  /// Cache generation. Bump it to evict everything on next activation.
  pub cache_name: String,
  pub shell_urls: Vec<String>,
  /// Path segment marking API calls (never cached)
  pub api_marker: String,
  /// Page served for uncached URLs while offline
  pub offline_fallback: String,
  /// Sync tag with a registered handler
  pub sync_tag: String,
  /// Page focused or opened when a notification is clicked
  pub open_url: String,
  pub notification: NotificationConfig,
}

impl Default for GateConfig {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:8080/").expect("valid default origin"),
      cache_name: "pwa-shell-v1".to_string(),
      shell_urls: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/app.html".to_string(),
        "/pricing.html".to_string(),
      ],
      api_marker: "/api/".to_string(),
      offline_fallback: "/index.html".to_string(),
      sync_tag: "sync-responses".to_string(),
      open_url: "/".to_string(),
      notification: NotificationConfig::default(),
    }
  }
}

impl GateConfig {
  /// Resolve a root-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}' for origin {}: {}", path, self.origin, e))
  }

  pub fn is_api_path(&self, path: &str) -> bool {
    !self.api_marker.is_empty() && path.contains(&self.api_marker)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push carries no payload
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds, alternating on/off
  pub vibrate: Vec<u32>,
  /// Notifications sharing a tag replace each other
  pub tag: String,
  pub require_interaction: bool,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "PWA".to_string(),
      default_body: "New update available!".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-192x192.png".to_string(),
      vibrate: vec![200, 100, 200],
      tag: "pwa-notification".to_string(),
      require_interaction: false,
    }
  }
}

impl NotificationConfig {
  pub fn build(&self, body: String) -> Notification {
    Notification {
      title: self.title.clone(),
      options: NotificationOptions {
        body,
        icon: self.icon.clone(),
        badge: self.badge.clone(),
        vibrate: self.vibrate.clone(),
        tag: self.tag.clone(),
        require_interaction: self.require_interaction,
      },
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// Process-local, gone on exit
  Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: StorageBackend,
  /// Database path (default: $XDG_DATA_HOME/pwa-gate/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub login_path: String,
  /// Where signed-in users land by default
  pub portal_path: String,
  /// Session token file (default: $XDG_DATA_HOME/pwa-gate/token)
  pub token_file: Option<PathBuf>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api".to_string(),
      login_path: "/login.html".to_string(),
      portal_path: "/portal.html".to_string(),
      token_file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pwa-gate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pwa-gate/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
    let local = PathBuf::from("pwa-gate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pwa-gate").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.gate.cache_name.trim().is_empty() {
      return Err(eyre!("gate.cache_name must not be empty"));
    }
    Ok(config)
  }

  /// Get the backend API bearer token from environment variables.
  ///
  /// Checks PWA_GATE_TOKEN first, then API_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PWA_GATE_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}
