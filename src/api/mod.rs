//! Page-side helpers for the backend API: authenticated calls, the session
//! token and access rules.

pub mod access;
mod client;
mod token;

pub use client::ApiClient;
pub use token::TokenStore;
