mod api;
mod cache;
mod config;
mod host;
mod net;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::api::access::{self, Access};
use crate::api::{ApiClient, TokenStore};
use crate::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use crate::config::{Config, StorageBackend};
use crate::host::{Dispatched, Event, Host, WorkerState};
use crate::net::{HttpNetwork, Request, RequestMode};
use crate::worker::{ConsoleScope, FetchOutcome, Gatekeeper};

#[derive(Parser, Debug)]
#[command(name = "pwa-gate")]
#[command(about = "Offline cache gatekeeper for Progressive Web Apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pwa-gate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache generation to use instead of the configured one
  #[arg(long)]
  cache_name: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell into the current cache generation
  Install,
  /// Delete every other cache generation
  Activate,
  /// Install, then activate
  Update,
  /// Run a request through the fetch policy
  Fetch {
    /// Absolute URL, or a path under the configured origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Issue the request in no-cors mode
    #[arg(long, conflicts_with = "navigate")]
    no_cors: bool,
    /// Issue the request as a top-level page load
    #[arg(long)]
    navigate: bool,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Deliver a push message
  Push { payload: Option<String> },
  /// Click the current notification
  Click,
  /// Fire a background sync
  Sync { tag: String },
  /// List cache generations and their entries
  Caches,
  /// Call the backend API
  Api {
    path: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Check the stored token and print where the visitor should go
  Verify {
    #[arg(long)]
    return_to: Option<String>,
    /// Check as the login page: signed-in visitors go to the portal
    #[arg(long)]
    login_page: bool,
  },
  /// Sign in and store the session token
  Login {
    email: String,
    /// Read from stdin when omitted
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    return_to: Option<String>,
  },
  /// Create an account and store the session token
  Register {
    email: String,
    /// Read from stdin when omitted
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    return_to: Option<String>,
  },
  /// Forget the stored session token
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override cache generation if specified on command line
  if let Some(cache_name) = args.cache_name {
    config.gate.cache_name = cache_name;
  }

  let _log_guard = init_tracing(config.log_file.as_deref())?;

  match args.command {
    Command::Api {
      path,
      method,
      data,
    } => call_api(&config, &path, &method, data.as_deref()).await,
    Command::Verify {
      return_to,
      login_page,
    } => verify(&config, return_to.as_deref(), login_page).await,
    Command::Login {
      email,
      password,
      return_to,
    } => {
      let client = api_client(&config)?;
      let password = password_or_stdin(password)?;
      client.login(&email, &password).await?;
      print_return(&config, return_to.as_deref());
      Ok(())
    }
    Command::Register {
      email,
      password,
      first_name,
      last_name,
      return_to,
    } => {
      let client = api_client(&config)?;
      let password = password_or_stdin(password)?;
      client
        .register(&email, &password, first_name.as_deref(), last_name.as_deref())
        .await?;
      print_return(&config, return_to.as_deref());
      Ok(())
    }
    Command::Logout => {
      let store = TokenStore::open(config.api.token_file.as_deref())?;
      if store.clear()? {
        println!("signed out");
      } else {
        println!("not signed in");
      }
      Ok(())
    }
    command => match config.storage.backend {
      StorageBackend::Sqlite => {
        let storage = match &config.storage.path {
          Some(path) => SqliteStorage::open_at(path)?,
          None => SqliteStorage::open()?,
        };
        run_worker(&config, storage, command).await
      }
      StorageBackend::Memory => run_worker(&config, MemoryStorage::new(), command).await,
    },
  }
}

/// Log to stderr, or to `log_file` through a background writer.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_env("PWA_GATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  match log_file {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

fn parse_method(method: &str) -> Result<Method> {
  Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid HTTP method '{}': {}", method, e))
}

async fn run_worker<S: CacheStorage>(config: &Config, storage: S, command: Command) -> Result<()> {
  let network = HttpNetwork::new(config.gate.origin.clone())?;
  let gate = Gatekeeper::new(
    config.gate.clone(),
    Arc::new(storage),
    Arc::new(network),
    Arc::new(ConsoleScope::new()),
  );

  match command {
    Command::Install => {
      let mut host = Host::new(gate);
      if let Dispatched::Installed(report) = host.dispatch(Event::Install).await {
        for path in &report.cached {
          println!("cached  {}", path);
        }
        for (path, reason) in &report.failed {
          println!("failed  {} ({})", path, reason);
        }
      }
    }
    Command::Activate => {
      let mut host = Host::with_state(gate, WorkerState::Installed);
      if let Dispatched::Activated(report) = host.dispatch(Event::Activate).await {
        for name in &report.deleted {
          println!("deleted {}", name);
        }
      }
    }
    Command::Update => {
      let mut host = Host::new(gate);
      host.dispatch(Event::Install).await;
      host.dispatch(Event::Activate).await;
      println!("{} active", config.gate.cache_name);
    }
    Command::Fetch {
      url,
      method,
      no_cors,
      navigate,
      output,
    } => {
      let url = Url::parse(&url).or_else(|_| config.gate.resolve(&url))?;
      let mode = RequestMode::for_target(&config.gate.origin, &url, navigate, no_cors);
      let request = Request::new(parse_method(&method)?, url).with_mode(mode);

      let mut host = Host::with_state(gate, WorkerState::Activated);
      if let Dispatched::Fetched(outcome) = host.dispatch(Event::Fetch(request)).await {
        print_fetch(&outcome, output.as_deref())?;
      }
      host.gate().settle().await;
    }
    Command::Push { payload } => {
      let mut host = Host::with_state(gate, WorkerState::Activated);
      host
        .dispatch(Event::Push(payload.map(String::into_bytes)))
        .await;
    }
    Command::Click => {
      let notification = config
        .gate
        .notification
        .build(config.gate.notification.default_body.clone());
      let mut host = Host::with_state(gate, WorkerState::Activated);
      if let Dispatched::Clicked(outcome) =
        host.dispatch(Event::NotificationClick(notification)).await
      {
        println!("{:?}", outcome);
      }
    }
    Command::Sync { tag } => {
      let mut host = Host::with_state(gate, WorkerState::Activated);
      if let Dispatched::Synced(outcome) = host.dispatch(Event::Sync(tag)).await {
        println!("{:?}", outcome);
      }
    }
    Command::Caches => {
      let storage = gate.storage();
      for name in storage.store_names()? {
        let marker = if name == config.gate.cache_name { "*" } else { " " };
        println!("{} {}", marker, name);
        for url in storage.entry_urls(&name)? {
          println!("    {}", url);
        }
      }
    }
    Command::Api { .. }
    | Command::Verify { .. }
    | Command::Login { .. }
    | Command::Register { .. }
    | Command::Logout => {
      return Err(eyre!("not a worker command"));
    }
  }

  Ok(())
}

fn print_fetch(outcome: &FetchOutcome, output: Option<&Path>) -> Result<()> {
  let FetchOutcome::Respond(result) = outcome else {
    println!("passthrough (not intercepted)");
    return Ok(());
  };

  let response = &result.data;
  eprintln!(
    "{} {} [{}] via {}",
    response.status,
    response.status_text,
    response.response_type,
    result.source.as_str()
  );
  if let Some(cached_at) = result.cached_at {
    eprintln!("cached at {}", cached_at.to_rfc3339());
  }
  for (name, value) in &response.headers {
    eprintln!("{}: {}", name, value);
  }

  match output {
    Some(path) => std::fs::write(path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&response.body)
      .map_err(|e| eyre!("Failed to write body: {}", e))?,
  }
  Ok(())
}

fn api_client(config: &Config) -> Result<ApiClient> {
  let store = TokenStore::open(config.api.token_file.as_deref())?;
  ApiClient::with_store(&config.api, store)
}

fn password_or_stdin(password: Option<String>) -> Result<String> {
  if let Some(password) = password {
    return Ok(password);
  }
  eprint!("Password: ");
  std::io::stderr().flush()?;
  let mut line = String::new();
  std::io::stdin()
    .read_line(&mut line)
    .map_err(|e| eyre!("Failed to read password: {}", e))?;
  Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Where the visitor lands after signing in.
fn print_return(config: &Config, return_to: Option<&str>) {
  let target = access::sanitize_return_to(return_to, &config.api.portal_path);
  println!("redirect {}", target);
}

async fn call_api(config: &Config, path: &str, method: &str, data: Option<&str>) -> Result<()> {
  let client = api_client(config)?;
  let body = data
    .map(serde_json::from_str::<serde_json::Value>)
    .transpose()
    .map_err(|e| eyre!("Request body is not valid JSON: {}", e))?;

  let path = access::site_path(path);
  let value = client.call(parse_method(method)?, &path, body.as_ref()).await?;
  println!("{}", serde_json::to_string_pretty(&value)?);
  Ok(())
}

async fn verify(config: &Config, return_to: Option<&str>, login_page: bool) -> Result<()> {
  let client = api_client(config)?;
  let verified = client.verify_token().await;
  let return_to = access::sanitize_return_to(return_to, &config.api.portal_path);

  let decision = if login_page {
    access::redirect_if_logged_in(verified, &config.api.portal_path)
  } else {
    access::guard(verified, &return_to, &config.api.login_path)
  };
  match decision {
    Access::Granted => println!("granted {}", return_to),
    Access::Redirect(path) => println!("redirect {}", path),
  }
  Ok(())
}
