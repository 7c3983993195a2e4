//! HTTP access to the upstream feed.
//!
//! [`HttpClient`] is the seam over `reqwest`, [`FeedTransport`] is what the
//! feed client talks to: one GET in, one normalized node tree out.

mod basic;
mod client;
mod transport;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use transport::{FeedTransport, HttpTransport};

use bytes::Bytes;
use tracing::trace;

use crate::error::FeedError;

/// Performs a GET and returns the body, failing on any non-2xx status.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<Bytes, FeedError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FeedError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client.execute(req).await?.error_for_status()?;
    let body = resp.bytes().await?;
    trace!(url, bytes = body.len(), "Feed responded");
    Ok(body)
}
