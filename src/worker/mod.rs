//! The service worker: lifecycle handlers and the host capabilities they use.

mod gatekeeper;
mod notification;
mod scope;

pub use gatekeeper::{
  ActivateReport, ClickOutcome, FetchOutcome, Gatekeeper, InstallReport, SyncOutcome,
};
pub use notification::{Notification, NotificationOptions};
pub use scope::{ConsoleScope, WorkerScope};
