//! Request/response model and the network seam.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{is_http, Request, RequestMode, Response, ResponseType};
