use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::token::TokenStore;
use crate::config::{ApiConfig, Config};

/// Backend API client with bearer-token authentication.
#[derive(Clone)]
pub struct ApiClient {
  client: reqwest::Client,
  base_url: String,
  token: Option<String>,
  /// Where sign-in results are saved and rejected tokens cleared
  store: Option<TokenStore>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create API client: {}", e))?;

    Ok(Self::build(client, config, token, None))
  }

  /// Client bound to a token store.
  ///
  /// A token in the environment takes precedence over the stored one.
  pub fn with_store(config: &ApiConfig, store: TokenStore) -> Result<Self> {
    let token = match Config::get_api_token() {
      Some(token) => Some(token),
      None => store.get()?,
    };
    let mut client = Self::new(config, token)?;
    client.store = Some(store);
    Ok(client)
  }

  fn build(
    client: reqwest::Client,
    config: &ApiConfig,
    token: Option<String>,
    store: Option<TokenStore>,
  ) -> Self {
    Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      token,
      store,
    }
  }

  pub fn has_token(&self) -> bool {
    self.token.is_some()
  }

  /// Call an endpoint and return its decoded body.
  ///
  /// Bodies that are not JSON come back as `{"raw": <text>}`. Non-2xx
  /// statuses become errors carrying the server's message.
  pub async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
    let url = format!("{}{}", self.base_url, path);
    debug!(%method, %url, "API call");

    let mut request = self
      .client
      .request(method, &url)
      .header(reqwest::header::CONTENT_TYPE, "application/json");
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.body(body.to_string());
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", url, e))?;
    let status = response.status();
    let text = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

    let data = parse_body(&text);
    if !status.is_success() {
      return Err(eyre!("{}", error_message(status.as_u16(), &data)));
    }
    Ok(data)
  }

  /// Sign in and save the returned token.
  pub async fn login(&self, email: &str, password: &str) -> Result<Option<String>> {
    let email = check_credentials(email, password)?;
    let body = json!({ "email": email, "password": password });
    let data = self.call(Method::POST, "/user/login", Some(&body)).await?;
    self.keep_token(&data)
  }

  /// Create an account and save the returned token, if the backend sent one.
  pub async fn register(
    &self,
    email: &str,
    password: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
  ) -> Result<Option<String>> {
    let email = check_credentials(email, password)?;
    let body = json!({
      "email": email,
      "password": password,
      "first_name": name_part(first_name),
      "last_name": name_part(last_name),
    });
    let data = self.call(Method::POST, "/user/register", Some(&body)).await?;
    self.keep_token(&data)
  }

  fn keep_token(&self, data: &Value) -> Result<Option<String>> {
    let Some(token) = data.get("token").and_then(Value::as_str) else {
      return Ok(None);
    };
    if let Some(store) = &self.store {
      store.set(token)?;
    }
    info!("Signed in");
    Ok(Some(token.to_string()))
  }

  /// Whether the current token is still accepted by the backend.
  ///
  /// A rejected token is removed from the token store.
  pub async fn verify_token(&self) -> bool {
    if !self.has_token() {
      return false;
    }
    match self.call(Method::GET, "/user/profile", None).await {
      Ok(_) => true,
      Err(e) => {
        debug!("Token rejected: {}", e);
        if let Some(store) = &self.store {
          if let Err(e) = store.clear() {
            warn!("Failed to clear rejected token: {}", e);
          }
        }
        false
      }
    }
  }
}

/// Trimmed email, or the message shown for a missing field.
fn check_credentials<'a>(email: &'a str, password: &str) -> Result<&'a str> {
  let email = email.trim();
  if email.is_empty() {
    return Err(eyre!("Please enter your email."));
  }
  if password.is_empty() {
    return Err(eyre!("Please enter your password."));
  }
  Ok(email)
}

/// Optional name field; blank counts as absent.
fn name_part(part: Option<&str>) -> Option<&str> {
  part.map(str::trim).filter(|p| !p.is_empty())
}

fn parse_body(text: &str) -> Value {
  serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

/// Message for a failed call: `error`, then `message`, then the status.
fn error_message(status: u16, data: &Value) -> String {
  ["error", "message"]
    .iter()
    .filter_map(|field| data.get(field))
    .find_map(|value| match value {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Null | Value::Bool(false) | Value::String(_) => None,
      other => Some(other.to_string()),
    })
    .unwrap_or_else(|| format!("HTTP {}", status))
}
