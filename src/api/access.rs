//! Redirect rules for protected pages.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

/// Decision for a request to a protected page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
  Granted,
  /// Send the visitor to this same-site path
  Redirect(String),
}

/// Make a path root-relative.
pub fn site_path(path: &str) -> String {
  if path.starts_with('/') {
    path.to_string()
  } else {
    format!("/{}", path)
  }
}

/// Clean a `returnTo` value taken from a query string.
///
/// Only same-site paths are allowed; anything that looks like an absolute
/// URL falls back to `fallback`.
pub fn sanitize_return_to(raw: Option<&str>, fallback: &str) -> String {
  match raw {
    None | Some("") => fallback.to_string(),
    Some(rt) if rt.starts_with("http") || rt.starts_with("//") => fallback.to_string(),
    Some(rt) => site_path(rt),
  }
}

/// Gate a protected page on a verified session.
pub fn guard(verified: bool, return_to: &str, login_path: &str) -> Access {
  if verified {
    return Access::Granted;
  }
  let encoded = utf8_percent_encode(return_to, COMPONENT);
  Access::Redirect(format!("{}?returnTo={}", site_path(login_path), encoded))
}

/// Gate the login page: a visitor with a verified session goes to the portal.
pub fn redirect_if_logged_in(verified: bool, portal_path: &str) -> Access {
  if verified {
    Access::Redirect(site_path(portal_path))
  } else {
    Access::Granted
  }
}
