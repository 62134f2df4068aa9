//! Fakes shared by unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, MemoryStorage};
use crate::config::GateConfig;
use crate::net::{Network, Request, Response};
use crate::worker::{Notification, WorkerScope};

pub fn gate_config() -> GateConfig {
  GateConfig {
    origin: Url::parse("https://app.test/").unwrap(),
    cache_name: "shell-test".to_string(),
    ..GateConfig::default()
  }
}

/// Network answering from a route table; unrouted paths get a 404.
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  online: AtomicBool,
  requests: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      requests: Mutex::new(Vec::new()),
    }
  }

  /// Serve `response` for a path under the test origin.
  pub fn route(&self, path: &str, response: Response) {
    let url = gate_config().resolve(path).unwrap();
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// URLs requested while online.
  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

impl Network for FakeNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    let result = if self.online.load(Ordering::SeqCst) {
      self.requests.lock().unwrap().push(request.url.to_string());
      Ok(
        self
          .routes
          .lock()
          .unwrap()
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::text(404, "Not Found")),
      )
    } else {
      Err(eyre!("network unreachable"))
    };
    async move { result }
  }
}

/// Scope that records every call.
#[derive(Default)]
pub struct RecordingScope {
  skip_waiting: AtomicUsize,
  claims: AtomicUsize,
  notifications: Mutex<Vec<Notification>>,
  closed: Mutex<Vec<String>>,
  opened: Mutex<Vec<Url>>,
  open_client: Mutex<Option<Url>>,
}

impl RecordingScope {
  pub fn skip_waiting_calls(&self) -> usize {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn claim_calls(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }

  pub fn notifications(&self) -> Vec<Notification> {
    self.notifications.lock().unwrap().clone()
  }

  pub fn closed(&self) -> Vec<String> {
    self.closed.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<Url> {
    self.opened.lock().unwrap().clone()
  }

  /// Pretend a page showing `url` is open.
  pub fn set_open_client(&self, url: Url) {
    *self.open_client.lock().unwrap() = Some(url);
  }
}

impl WorkerScope for RecordingScope {
  fn skip_waiting(&self) -> Result<()> {
    self.skip_waiting.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn claim_clients(&self) -> Result<()> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.notifications.lock().unwrap().push(notification.clone());
    Ok(())
  }

  fn close_notification(&self, tag: &str) -> Result<()> {
    self.closed.lock().unwrap().push(tag.to_string());
    Ok(())
  }

  fn focus_client(&self, url: &Url) -> Result<bool> {
    Ok(self.open_client.lock().unwrap().as_ref() == Some(url))
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }
}

/// In-memory storage with switchable failures.
#[derive(Default)]
pub struct FailingStorage {
  inner: MemoryStorage,
  fail_open: AtomicBool,
  fail_listing: AtomicBool,
  fail_puts: AtomicBool,
}

impl FailingStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_open(&self, fail: bool) {
    self.fail_open.store(fail, Ordering::SeqCst);
  }

  pub fn fail_listing(&self, fail: bool) {
    self.fail_listing.store(fail, Ordering::SeqCst);
  }

  pub fn fail_puts(&self, fail: bool) {
    self.fail_puts.store(fail, Ordering::SeqCst);
  }
}

impl CacheStorage for FailingStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    if self.fail_open.load(Ordering::SeqCst) {
      return Err(eyre!("disk full"));
    }
    self.inner.open_store(name)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    if self.fail_listing.load(Ordering::SeqCst) {
      return Err(eyre!("database locked"));
    }
    self.inner.store_names()
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    self.inner.delete_store(name)
  }

  fn put(&self, name: &str, url: &Url, response: &Response) -> Result<()> {
    if self.fail_puts.load(Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    self.inner.put(name, url, response)
  }

  fn lookup(&self, name: &str, url: &Url) -> Result<Option<CachedResponse>> {
    self.inner.lookup(name, url)
  }

  fn lookup_any(&self, url: &Url) -> Result<Option<CachedResponse>> {
    self.inner.lookup_any(url)
  }

  fn entry_urls(&self, name: &str) -> Result<Vec<String>> {
    self.inner.entry_urls(name)
  }
}
