use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use super::{HttpClient, fetch_bytes};
use crate::error::FeedError;
use crate::parser::{NodeTree, parse_document};

/// One GET against the feed, normalized into a [`NodeTree`].
///
/// Implementations do not retry; the feed client owns retry and timeout
/// policy.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<NodeTree, FeedError>;
}

pub struct HttpTransport<C> {
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: HttpClient> FeedTransport for HttpTransport<C> {
    async fn fetch(&self, url: &Url) -> Result<NodeTree, FeedError> {
        debug!(url = %url, "Fetching feed document");
        let body = fetch_bytes(&self.client, url.as_str()).await?;
        parse_document(&body)
    }
}
