//! The worker's view of its host: registration, clients and notifications.

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use tracing::info;
use url::Url;

use super::notification::Notification;

/// Host capabilities the gatekeeper calls into.
pub trait WorkerScope: Send + Sync {
  /// Ask to activate without waiting for older workers to go away.
  fn skip_waiting(&self) -> Result<()>;

  /// Take control of every open page in scope.
  fn claim_clients(&self) -> Result<()>;

  fn show_notification(&self, notification: &Notification) -> Result<()>;

  fn close_notification(&self, tag: &str) -> Result<()>;

  /// Focus an open page showing `url`. Returns false when none is open.
  fn focus_client(&self, url: &Url) -> Result<bool>;

  fn open_window(&self, url: &Url) -> Result<()>;
}

/// Scope for the command-line host: notifications and window requests go to stdout.
#[derive(Default)]
pub struct ConsoleScope {
  /// Tag of the notification currently on screen
  shown: Mutex<Option<String>>,
}

impl ConsoleScope {
  pub fn new() -> Self {
    Self::default()
  }
}

impl WorkerScope for ConsoleScope {
  fn skip_waiting(&self) -> Result<()> {
    info!("Skipping wait for previous worker");
    Ok(())
  }

  fn claim_clients(&self) -> Result<()> {
    info!("Claiming clients");
    Ok(())
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    let mut shown = self
      .shown
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if shown.as_deref() == Some(notification.options.tag.as_str()) {
      info!(tag = %notification.options.tag, "Replacing notification");
    }
    *shown = Some(notification.options.tag.clone());

    let json = serde_json::to_string_pretty(notification)
      .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
    println!("{}", json);
    Ok(())
  }

  fn close_notification(&self, tag: &str) -> Result<()> {
    let mut shown = self
      .shown
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if shown.as_deref() == Some(tag) {
      *shown = None;
    }
    info!(tag, "Notification closed");
    Ok(())
  }

  fn focus_client(&self, _url: &Url) -> Result<bool> {
    // No pages are attached to a terminal
    Ok(false)
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    println!("open {}", url);
    Ok(())
  }
}
