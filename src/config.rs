//! Feed settings, read from flags or the environment.

use std::time::Duration;

use clap::Args;

use crate::client::{ClientOptions, DEFAULT_FEED_URL};
use crate::fanout::JoinPolicy;
use crate::loader::AgencyFilter;

#[derive(Debug, Clone, Args)]
pub struct FeedSettings {
    /// Base URL of the XML feed
    #[arg(long = "feed-url", env = "FEED_BASE_URL", default_value = DEFAULT_FEED_URL)]
    pub base_url: String,

    /// Agencies to load reference data for (comma separated)
    #[arg(
        long = "agency",
        env = "FEED_AGENCIES",
        value_delimiter = ',',
        default_value = "sf-muni"
    )]
    pub agencies: Vec<String>,

    /// Timeout for each individual feed request, in seconds
    #[arg(long, env = "FEED_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Connect timeout for feed requests, in seconds
    #[arg(long, env = "FEED_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Maximum number of concurrent feed requests
    #[arg(long, env = "FEED_MAX_IN_FLIGHT", default_value_t = 8)]
    pub max_in_flight: usize,

    /// What to do when one of several concurrent feed requests fails
    #[arg(long, env = "FEED_JOIN_POLICY", value_enum, default_value_t = JoinPolicy::FailFast)]
    pub join_policy: JoinPolicy,

    /// Extra attempts for a feed request after a transient failure
    #[arg(long, env = "FEED_RETRIES", default_value_t = 0)]
    pub retries: u32,

    /// Initial retry delay in milliseconds, doubled on every attempt
    #[arg(long, env = "FEED_RETRY_BACKOFF_MS", default_value_t = 250)]
    pub retry_backoff_ms: u64,
}

impl FeedSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.base_url.clone(),
            request_timeout: self.request_timeout(),
            max_in_flight: self.max_in_flight,
            join_policy: self.join_policy,
            retries: self.retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn agency_filter(&self) -> AgencyFilter {
        AgencyFilter::new(self.agencies.iter().map(|a| a.trim()).filter(|a| !a.is_empty()))
    }
}
