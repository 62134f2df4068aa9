//! Request and response values exchanged between the host, the network and the cache.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// How the page issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level navigation
  Navigate,
  SameOrigin,
  #[default]
  Cors,
  /// Cross-origin request whose response the page may not inspect
  NoCors,
}

impl RequestMode {
  /// Mode a page served from `origin` would use to request `url`.
  pub fn for_target(origin: &Url, url: &Url, navigate: bool, no_cors: bool) -> Self {
    if navigate {
      Self::Navigate
    } else if no_cors {
      Self::NoCors
    } else if url.origin() == origin.origin() {
      Self::SameOrigin
    } else {
      Self::Cors
    }
  }
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::default(),
      headers: Vec::new(),
      body: None,
    }
  }

  /// Plain GET request.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  /// Whether the URL uses a scheme the gatekeeper handles.
  pub fn is_http(&self) -> bool {
    is_http(&self.url)
  }
}

pub fn is_http(url: &Url) -> bool {
  matches!(url.scheme(), "http" | "https")
}

/// Visibility class of a response, as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response allowed by CORS
  Cors,
  /// Cross-origin no-cors response; status and body are hidden
  Opaque,
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }
}

impl fmt::Display for ResponseType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResponseType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "error" => Ok(Self::Error),
      other => Err(format!("unknown response type '{}'", other)),
    }
  }
}

/// A complete response with its body buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reason_phrase(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
    }
  }

  /// JSON response with the matching content type.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("Content-Type", "application/json")
  }

  pub fn text(status: u16, body: &str) -> Self {
    Self::new(status, body).with_header("Content-Type", "text/plain; charset=utf-8")
  }

  /// Opaque response: status 0, no headers, empty body.
  pub fn opaque() -> Self {
    Self {
      status: 0,
      status_text: String::new(),
      headers: Vec::new(),
      body: Vec::new(),
      response_type: ResponseType::Opaque,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..=299).contains(&self.status)
  }

  pub fn is_opaque(&self) -> bool {
    self.response_type == ResponseType::Opaque
  }

  pub fn text_body(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn reason_phrase(status: u16) -> &'static str {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_http_schemes_are_handled() {
    let http = Request::get(Url::parse("http://example.com/a").unwrap());
    let https = Request::get(Url::parse("https://example.com/a").unwrap());
    let ext = Request::get(Url::parse("chrome-extension://abc/page.html").unwrap());
    let data = Request::get(Url::parse("data:text/plain,hi").unwrap());

    assert!(http.is_http());
    assert!(https.is_http());
    assert!(!ext.is_http());
    assert!(!data.is_http());
  }

  #[test]
  fn test_json_response_sets_content_type() {
    let response = Response::json(503, &serde_json::json!({ "error": "down" }));
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.text_body(), r#"{"error":"down"}"#);
  }

  #[test]
  fn test_request_mode_for_target() {
    let origin = Url::parse("https://app.test/").unwrap();
    let own = Url::parse("https://app.test/pricing.html").unwrap();
    let cdn = Url::parse("https://cdn.test/lib.js").unwrap();

    assert_eq!(RequestMode::for_target(&origin, &own, true, false), RequestMode::Navigate);
    assert_eq!(RequestMode::for_target(&origin, &cdn, false, true), RequestMode::NoCors);
    assert_eq!(RequestMode::for_target(&origin, &own, false, false), RequestMode::SameOrigin);
    assert_eq!(RequestMode::for_target(&origin, &cdn, false, false), RequestMode::Cors);
  }

  #[test]
  fn test_opaque_response_hides_status() {
    let response = Response::opaque();
    assert!(response.is_opaque());
    assert!(!response.is_ok());
    assert!(response.body.is_empty());
  }

  #[test]
  fn test_response_type_parses_its_own_names() {
    for ty in [
      ResponseType::Basic,
      ResponseType::Cors,
      ResponseType::Opaque,
      ResponseType::Error,
    ] {
      assert_eq!(ty.as_str().parse::<ResponseType>(), Ok(ty));
    }
    assert!("weird".parse::<ResponseType>().is_err());
  }
}
