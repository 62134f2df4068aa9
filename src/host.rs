//! Host side of the worker: lifecycle state and event routing.

use tracing::debug;

use crate::cache::CacheStorage;
use crate::net::{Network, Request};
use crate::worker::{
  ActivateReport, ClickOutcome, FetchOutcome, Gatekeeper, InstallReport, Notification,
  SyncOutcome, WorkerScope,
};

/// Lifecycle state of one worker instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
  /// Script loaded, no event handled yet
  #[default]
  Parsed,
  Installing,
  Installed,
  Activating,
  /// Controlling pages and receiving functional events
  Activated,
  /// Replaced by a newer worker
  Redundant,
}

/// Events delivered to the worker, one at a time.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Push message with its optional payload
  Push(Option<Vec<u8>>),
  NotificationClick(Notification),
  /// Background sync with its tag
  Sync(String),
}

/// What handling an event produced.
#[derive(Debug, Clone)]
pub enum Dispatched {
  Installed(InstallReport),
  Activated(ActivateReport),
  Fetched(FetchOutcome),
  Notified(Notification),
  Clicked(ClickOutcome),
  Synced(SyncOutcome),
  /// Event not valid in the current state
  Ignored,
}

/// Drives a gatekeeper through its lifecycle.
pub struct Host<S: CacheStorage, N: Network, W: WorkerScope> {
  gate: Gatekeeper<S, N, W>,
  state: WorkerState,
}

impl<S: CacheStorage, N: Network, W: WorkerScope> Host<S, N, W> {
  /// Host for a freshly registered worker.
  pub fn new(gate: Gatekeeper<S, N, W>) -> Self {
    Self::with_state(gate, WorkerState::Parsed)
  }

  /// Host for a worker that reached `state` in an earlier run.
  pub fn with_state(gate: Gatekeeper<S, N, W>, state: WorkerState) -> Self {
    Self { gate, state }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn gate(&self) -> &Gatekeeper<S, N, W> {
    &self.gate
  }

  /// A newer worker took over; this one stops handling events.
  pub fn supersede(&mut self) {
    debug!(from = ?self.state, "Worker superseded");
    self.state = WorkerState::Redundant;
  }

  /// Handle one event. Completes only after the handler's work has finished.
  pub async fn dispatch(&mut self, event: Event) -> Dispatched {
    match (self.state, event) {
      (WorkerState::Parsed, Event::Install) => {
        self.state = WorkerState::Installing;
        let report = self.gate.install().await;
        self.state = WorkerState::Installed;
        Dispatched::Installed(report)
      }
      (WorkerState::Installed, Event::Activate) => {
        self.state = WorkerState::Activating;
        let report = self.gate.activate().await;
        self.state = WorkerState::Activated;
        Dispatched::Activated(report)
      }
      (WorkerState::Activated, Event::Fetch(request)) => {
        Dispatched::Fetched(self.gate.fetch(&request).await)
      }
      // Pages are not controlled yet (or any more)
      (_, Event::Fetch(_)) => Dispatched::Fetched(FetchOutcome::Passthrough),
      (WorkerState::Activated, Event::Push(payload)) => {
        Dispatched::Notified(self.gate.push(payload.as_deref()).await)
      }
      (WorkerState::Activated, Event::NotificationClick(notification)) => {
        Dispatched::Clicked(self.gate.notification_click(&notification).await)
      }
      (WorkerState::Activated, Event::Sync(tag)) => Dispatched::Synced(self.gate.sync(&tag).await),
      (state, event) => {
        debug!(?state, ?event, "Ignoring event");
        Dispatched::Ignored
      }
    }
  }
}
