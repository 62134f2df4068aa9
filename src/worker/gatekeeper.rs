//! Offline cache gatekeeper: the request-handling policy of the worker.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStorage};
use crate::config::GateConfig;
use crate::net::{is_http, Network, Request, Response};

use super::notification::Notification;
use super::scope::WorkerScope;

/// Outcome of the install phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  /// Shell paths now in the current cache
  pub cached: Vec<String>,
  /// Shell paths that could not be cached, with the reason
  pub failed: Vec<(String, String)>,
  pub skipped_waiting: bool,
}

/// Outcome of the activate phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  /// Stale cache generations removed
  pub deleted: Vec<String>,
  pub claimed: bool,
}

/// How a fetch event was answered.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not intercepted; the page's own request proceeds untouched.
  Passthrough,
  Respond(CacheResult<Response>),
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&Response> {
    match self {
      Self::Passthrough => None,
      Self::Respond(result) => Some(&result.data),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open page was brought to front
  Focused,
  /// A new window was opened
  Opened,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Registered tag; nothing is queued for replay
  Idle,
  /// No handler for this tag
  Ignored,
}

/// Service worker policy over a cache, a network and the host scope.
///
/// One method per lifecycle event. None of them fail: every cache or
/// network problem degrades to a logged warning and a fallback response.
pub struct Gatekeeper<S: CacheStorage, N: Network, W: WorkerScope> {
  config: Arc<GateConfig>,
  storage: Arc<S>,
  network: Arc<N>,
  scope: Arc<W>,
  /// Cache writes running behind already-returned responses
  pending: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage, N: Network, W: WorkerScope> Gatekeeper<S, N, W> {
  pub fn new(config: GateConfig, storage: Arc<S>, network: Arc<N>, scope: Arc<W>) -> Self {
    Self {
      config: Arc::new(config),
      storage,
      network,
      scope,
      pending: Mutex::new(JoinSet::new()),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Install: precache the shell, then ask to activate right away.
  pub async fn install(&self) -> InstallReport {
    info!(cache = %self.config.cache_name, "Installing");
    let mut report = InstallReport::default();

    if let Err(e) = self.storage.open_store(&self.config.cache_name) {
      error!("Installation failed: {}", e);
      return report;
    }

    info!("Caching app shell");
    let attempts = self
      .config
      .shell_urls
      .iter()
      .map(|path| async move { (path.clone(), self.add_shell_url(path).await) });

    for (path, result) in join_all(attempts).await {
      match result {
        Ok(()) => report.cached.push(path),
        Err(e) => {
          warn!("Failed to cache {}: {}", path, e);
          report.failed.push((path, e.to_string()));
        }
      }
    }
    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "All available files cached"
    );

    match self.scope.skip_waiting() {
      Ok(()) => report.skipped_waiting = true,
      Err(e) => warn!("skip_waiting failed: {}", e),
    }
    report
  }

  async fn add_shell_url(&self, path: &str) -> Result<()> {
    let url = self.config.resolve(path)?;
    let response = self.network.fetch(&Request::get(url.clone())).await?;
    if !response.is_ok() {
      return Err(eyre!("Request for {} failed with status {}", url, response.status));
    }
    self.storage.put(&self.config.cache_name, &url, &response)
  }

  /// Activate: drop every other cache generation, then take over open pages.
  pub async fn activate(&self) -> ActivateReport {
    info!("Activating");
    let mut report = ActivateReport::default();

    match self.storage.store_names() {
      Ok(names) => {
        for name in names.into_iter().filter(|n| *n != self.config.cache_name) {
          info!(cache = %name, "Deleting old cache");
          match self.storage.delete_store(&name) {
            Ok(_) => report.deleted.push(name),
            Err(e) => warn!("Failed to delete cache {}: {}", name, e),
          }
        }
      }
      Err(e) => error!("Failed to list caches: {}", e),
    }

    match self.scope.claim_clients() {
      Ok(()) => {
        report.claimed = true;
        info!("Activated successfully");
      }
      Err(e) => warn!("Failed to claim clients: {}", e),
    }
    report
  }

  /// Fetch: decide whether and how to answer an outgoing request.
  pub async fn fetch(&self, request: &Request) -> FetchOutcome {
    if request.method != Method::GET || !request.is_http() {
      debug!(method = %request.method, url = %request.url, "Not intercepting");
      return FetchOutcome::Passthrough;
    }

    let result = if self.config.is_api_path(request.url.path()) {
      self.fetch_api(request).await
    } else {
      self.network_first(request).await
    };
    debug!(url = %request.url, source = result.source.as_str(), "Responding");
    FetchOutcome::Respond(result)
  }

  /// API calls always go to the network and are never cached.
  async fn fetch_api(&self, request: &Request) -> CacheResult<Response> {
    match self.network.fetch(request).await {
      Ok(response) => CacheResult::from_network(response),
      Err(e) => {
        warn!("API request {} failed: {}", request.url, e);
        CacheResult::synthesized(Response::json(
          503,
          &json!({ "error": "Network unavailable" }),
        ))
      }
    }
  }

  async fn network_first(&self, request: &Request) -> CacheResult<Response> {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.status == 200 && !response.is_opaque() {
          self
            .cache_in_background(request.url.clone(), response.clone())
            .await;
        }
        CacheResult::from_network(response)
      }
      Err(e) => {
        debug!("Network failed for {}, trying cache: {}", request.url, e);
        self.offline_response(&request.url)
      }
    }
  }

  /// Store a copy without holding up the response.
  async fn cache_in_background(&self, url: Url, response: Response) {
    if !is_http(&url) {
      return;
    }

    let storage = Arc::clone(&self.storage);
    let cache_name = self.config.cache_name.clone();
    let mut pending = self.pending.lock().await;
    // Reap writes that already finished so the set only holds live ones
    while let Some(joined) = pending.try_join_next() {
      if let Err(e) = joined {
        warn!("Background cache write did not finish: {}", e);
      }
    }
    pending.spawn_blocking(move || {
      if let Err(e) = storage.put(&cache_name, &url, &response) {
        warn!("Failed to cache {}: {}", url, e);
      }
    });
  }

  fn offline_response(&self, url: &Url) -> CacheResult<Response> {
    match self.storage.lookup_any(url) {
      Ok(Some(cached)) => {
        debug!(url = %cached.url, "Serving cached copy");
        return CacheResult::from_cache(cached.response, cached.cached_at);
      }
      Ok(None) => {}
      Err(e) => warn!("Cache lookup for {} failed: {}", url, e),
    }

    let fallback = self
      .config
      .resolve(&self.config.offline_fallback)
      .and_then(|fallback| self.storage.lookup_any(&fallback));

    match fallback {
      Ok(Some(cached)) => CacheResult::offline(cached.response, cached.cached_at),
      Ok(None) => {
        warn!("Offline and no fallback page cached for {}", url);
        CacheResult::synthesized(Response::text(503, "Offline"))
      }
      Err(e) => {
        warn!("Offline fallback lookup failed: {}", e);
        CacheResult::synthesized(Response::text(503, "Offline"))
      }
    }
  }

  /// Wait for background cache writes started so far.
  pub async fn settle(&self) {
    let mut pending = self.pending.lock().await;
    while let Some(joined) = pending.join_next().await {
      if let Err(e) = joined {
        warn!("Background cache write did not finish: {}", e);
      }
    }
  }

  /// Push: show a notification carrying the payload text.
  pub async fn push(&self, payload: Option<&[u8]>) -> Notification {
    info!("Push received");
    let body = match payload {
      Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
      None => self.config.notification.default_body.clone(),
    };

    let notification = self.config.notification.build(body);
    if let Err(e) = self.scope.show_notification(&notification) {
      warn!("Failed to show notification: {}", e);
    }
    notification
  }

  /// Notification click: dismiss it and bring the site root up.
  pub async fn notification_click(&self, notification: &Notification) -> ClickOutcome {
    info!("Notification clicked");
    if let Err(e) = self.scope.close_notification(&notification.options.tag) {
      warn!("Failed to close notification: {}", e);
    }

    let target = match self.config.resolve(&self.config.open_url) {
      Ok(url) => url,
      Err(e) => {
        warn!("{}", e);
        return ClickOutcome::Failed;
      }
    };

    match self.scope.focus_client(&target) {
      Ok(true) => return ClickOutcome::Focused,
      Ok(false) => {}
      Err(e) => debug!("Focus failed, opening a window instead: {}", e),
    }

    match self.scope.open_window(&target) {
      Ok(()) => ClickOutcome::Opened,
      Err(e) => {
        warn!("Failed to open {}: {}", target, e);
        ClickOutcome::Failed
      }
    }
  }

  /// Background sync. The registered tag has nothing queued to replay.
  pub async fn sync(&self, tag: &str) -> SyncOutcome {
    info!(tag, "Background sync");
    if tag == self.config.sync_tag {
      debug!("No queued actions to replay");
      SyncOutcome::Idle
    } else {
      SyncOutcome::Ignored
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::net::{RequestMode, ResponseType};
  use crate::testing::{gate_config, FailingStorage, FakeNetwork, RecordingScope};

  type TestGate<S> = Gatekeeper<S, FakeNetwork, RecordingScope>;

  fn gate<S: CacheStorage>(storage: S) -> (TestGate<S>, Arc<FakeNetwork>, Arc<RecordingScope>) {
    let network = Arc::new(FakeNetwork::new());
    let scope = Arc::new(RecordingScope::default());
    let gate = Gatekeeper::new(
      gate_config(),
      Arc::new(storage),
      Arc::clone(&network),
      Arc::clone(&scope),
    );
    (gate, network, scope)
  }

  fn url(path: &str) -> Url {
    gate_config().resolve(path).unwrap()
  }

  fn html(body: &str) -> Response {
    Response::new(200, body).with_header("Content-Type", "text/html")
  }

  #[tokio::test]
  async fn test_install_caches_reachable_shell_urls() {
    let (gate, network, scope) = gate(MemoryStorage::new());
    network.route("/", html("root"));
    network.route("/index.html", html("index"));
    network.route("/app.html", Response::text(500, "boom"));
    // /pricing.html is unrouted and answers 404

    let report = gate.install().await;

    assert_eq!(report.cached, vec!["/", "/index.html"]);
    let failed: Vec<&str> = report.failed.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(failed, vec!["/app.html", "/pricing.html"]);
    assert!(report.skipped_waiting);
    assert_eq!(scope.skip_waiting_calls(), 1);

    let storage = gate.storage();
    for path in ["/", "/index.html"] {
      assert!(storage.lookup("shell-test", &url(path)).unwrap().is_some());
    }
    assert!(storage.lookup("shell-test", &url("/app.html")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_install_survives_network_outage() {
    let (gate, network, scope) = gate(MemoryStorage::new());
    network.set_online(false);

    let report = gate.install().await;

    assert!(report.cached.is_empty());
    assert_eq!(report.failed.len(), 4);
    assert_eq!(scope.skip_waiting_calls(), 1);
    assert_eq!(gate.storage().store_names().unwrap(), vec!["shell-test"]);
  }

  #[tokio::test]
  async fn test_install_store_open_failure_is_swallowed() {
    let storage = FailingStorage::new();
    storage.fail_open(true);
    let (gate, _network, scope) = gate(storage);

    let report = gate.install().await;

    assert_eq!(report, InstallReport::default());
    assert_eq!(scope.skip_waiting_calls(), 0);
  }

  #[tokio::test]
  async fn test_activate_removes_other_generations() {
    let (gate, _network, scope) = gate(MemoryStorage::new());
    let storage = gate.storage();
    storage.open_store("shell-old").unwrap();
    storage.put("shell-older", &url("/a.js"), &html("a")).unwrap();
    storage.open_store("shell-test").unwrap();

    let report = gate.activate().await;

    assert_eq!(report.deleted, vec!["shell-old", "shell-older"]);
    assert!(report.claimed);
    assert_eq!(scope.claim_calls(), 1);
    assert_eq!(storage.store_names().unwrap(), vec!["shell-test"]);
  }

  #[tokio::test]
  async fn test_activate_claims_even_when_listing_fails() {
    let storage = FailingStorage::new();
    storage.fail_listing(true);
    let (gate, _network, scope) = gate(storage);

    let report = gate.activate().await;

    assert!(report.deleted.is_empty());
    assert!(report.claimed);
    assert_eq!(scope.claim_calls(), 1);
  }

  #[tokio::test]
  async fn test_api_offline_returns_json_503_and_caches_nothing() {
    let (gate, network, _scope) = gate(MemoryStorage::new());
    network.set_online(false);

    let outcome = gate.fetch(&Request::get(url("/api/user/profile"))).await;
    gate.settle().await;

    let FetchOutcome::Respond(result) = outcome else {
      panic!("API request was not intercepted");
    };
    assert_eq!(result.source, CacheSource::Synthesized);
    assert_eq!(result.data.status, 503);
    assert_eq!(result.data.header("Content-Type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&result.data.body).unwrap();
    assert!(body.get("error").is_some());
    assert!(gate.storage().store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_api_online_is_never_cached() {
    let (gate, network, _scope) = gate(MemoryStorage::new());
    network.route("/api/items", Response::json(200, &json!({ "items": [] })));

    let outcome = gate.fetch(&Request::get(url("/api/items"))).await;
    gate.settle().await;

    assert_eq!(outcome.response().unwrap().status, 200);
    assert!(gate.storage().lookup_any(&url("/api/items")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_asset_cached_online_then_served_offline() {
    let (gate, network, _scope) = gate(MemoryStorage::new());
    let live = Response::new(200, vec![0x89, b'P', b'N', b'G']).with_header("Content-Type", "image/png");
    network.route("/logo.png", live.clone());
    let request = Request::get(url("/logo.png"));

    let first = gate.fetch(&request).await;
    gate.settle().await;

    let FetchOutcome::Respond(first) = first else {
      panic!("asset request was not intercepted");
    };
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.data, live);
    assert!(gate.storage().lookup("shell-test", &url("/logo.png")).unwrap().is_some());

    network.set_online(false);
    let FetchOutcome::Respond(second) = gate.fetch(&request).await else {
      panic!("asset request was not intercepted");
    };
    assert_eq!(second.source, CacheSource::Cache);
    assert!(second.cached_at.is_some());
    assert_eq!(second.data.body, live.body);
    assert_eq!(second.data.headers, live.headers);
  }

  #[tokio::test]
  async fn test_finished_background_writes_are_reaped() {
    let (gate, network, _scope) = gate(MemoryStorage::new());
    network.route("/a.css", Response::new(200, "a{}"));
    let request = Request::get(url("/a.css"));

    for _ in 0..200 {
      gate.fetch(&request).await;
    }
    // Let every write spawned so far complete
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    gate.fetch(&request).await;

    assert_eq!(gate.pending.lock().await.len(), 1);
    gate.settle().await;
    assert!(gate.pending.lock().await.is_empty());
    assert!(gate.storage().lookup("shell-test", &url("/a.css")).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_uncached_asset_offline_gets_root_document() {
    let (gate, network, _scope) = gate(MemoryStorage::new());
    network.route("/index.html", html("<h1>offline shell</h1>"));
    gate.install().await;
    network.set_online(false);

    let FetchOutcome::Respond(result) = gate.fetch(&Request::get(url("/reports/7.html"))).await else {
      panic!("asset request was not intercepted");
    };

    let root = gate.storage().lookup_any(&url("/index.html")).unwrap().unwrap();
    assert_eq!(result.source, CacheSource::OfflineFallback);
    assert_eq!(result.data, root.response);
  }

  #[tokio::test]
  async fn test_offline_without_fallback_synthesizes_response() {
    let (gate, network, _scope) = gate(MemoryStorage::new());
    network.set_online(false);

    let FetchOutcome::Respond(result) = gate.fetch(&Request::get(url("/x.css"))).await else {
      panic!("asset request was not intercepted");
    };
    assert_eq!(result.source, CacheSource::Synthesized);
    assert_eq!(result.data.status, 503);
  }

  #[tokio::test]
  async fn test_non_get_and_non_http_pass_through() {
    let (gate, network, _scope) = gate(MemoryStorage::new());

    let post = Request::new(Method::POST, url("/form"));
    let ext = Request::get(Url::parse("chrome-extension://abcdef/popup.html").unwrap());

    assert!(matches!(gate.fetch(&post).await, FetchOutcome::Passthrough));
    assert!(matches!(gate.fetch(&ext).await, FetchOutcome::Passthrough));
    gate.settle().await;

    assert!(network.requests().is_empty());
    assert!(gate.storage().store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_non_200_and_opaque_responses_are_not_cached() {
    let (gate, network, _scope) = gate(MemoryStorage::new());
    network.route("/missing.html", Response::text(404, "nope"));
    network.route("/partial.mp4", Response::new(206, "part"));
    network.route("/cdn.js", Response::opaque());

    let missing = gate.fetch(&Request::get(url("/missing.html"))).await;
    let partial = gate.fetch(&Request::get(url("/partial.mp4"))).await;
    let opaque = gate
      .fetch(&Request::get(url("/cdn.js")).with_mode(RequestMode::NoCors))
      .await;
    gate.settle().await;

    assert_eq!(missing.response().unwrap().status, 404);
    assert_eq!(partial.response().unwrap().status, 206);
    assert_eq!(opaque.response().unwrap().response_type, ResponseType::Opaque);
    assert!(gate.storage().store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_write_failure_still_returns_response() {
    let storage = FailingStorage::new();
    storage.fail_puts(true);
    let (gate, network, _scope) = gate(storage);
    network.route("/style.css", Response::new(200, "body{}"));

    let outcome = gate.fetch(&Request::get(url("/style.css"))).await;
    gate.settle().await;

    assert_eq!(outcome.response().unwrap().text_body(), "body{}");
    assert!(gate.storage().lookup_any(&url("/style.css")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_push_uses_payload_or_default_body() {
    let (gate, _network, scope) = gate(MemoryStorage::new());

    let hello = gate.push(Some(b"Hello")).await;
    let empty = gate.push(None).await;

    assert_eq!(hello.options.body, "Hello");
    assert_eq!(empty.options.body, "New update available!");

    let shown = scope.notifications();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].options.body, "Hello");
    assert_eq!(shown[1].options.tag, shown[0].options.tag);
    assert_eq!(shown[1].options.vibrate, vec![200, 100, 200]);
    assert!(!shown[1].options.require_interaction);
  }

  #[tokio::test]
  async fn test_click_opens_root_when_no_page_is_open() {
    let (gate, _network, scope) = gate(MemoryStorage::new());
    let notification = gate.push(None).await;

    let outcome = gate.notification_click(&notification).await;

    assert_eq!(outcome, ClickOutcome::Opened);
    assert_eq!(scope.closed(), vec![notification.options.tag.clone()]);
    assert_eq!(scope.opened(), vec![url("/")]);
  }

  #[tokio::test]
  async fn test_click_focuses_open_root_page() {
    let (gate, _network, scope) = gate(MemoryStorage::new());
    scope.set_open_client(url("/"));
    let notification = gate.push(None).await;

    let outcome = gate.notification_click(&notification).await;

    assert_eq!(outcome, ClickOutcome::Focused);
    assert!(scope.opened().is_empty());
  }

  #[tokio::test]
  async fn test_sync_only_handles_registered_tag() {
    let (gate, _network, _scope) = gate(MemoryStorage::new());
    assert_eq!(gate.sync("sync-responses").await, SyncOutcome::Idle);
    assert_eq!(gate.sync("other").await, SyncOutcome::Ignored);
  }
}
