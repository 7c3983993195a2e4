//! Client for the NextBus-style public XML feed.
//!
//! Owns every concurrency and batching decision made against the feed: one
//! call per agency for routes, one call per route for stops, and predictions
//! grouped by agency and split into chunks of at most
//! [`MAX_STOPS_PER_REQUEST`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::extract::{extract_agencies, extract_predictions, extract_routes, extract_stops};
use crate::fanout::{JoinPolicy, fan_out};
use crate::fetch::FeedTransport;
use crate::model::{Agency, Prediction, PredictionOutcome, Route, Stop};
use crate::parser::NodeTree;

/// Upper bound the feed accepts for `predictionsForMultiStops`.
pub const MAX_STOPS_PER_REQUEST: usize = 150;

/// Ceiling for a single backoff sleep between retries.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

pub const DEFAULT_FEED_URL: &str = "http://webservices.nextbus.com/service/publicXMLFeed";

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    /// Applied to each individual call to the feed.
    pub request_timeout: Duration,
    pub max_in_flight: usize,
    pub join_policy: JoinPolicy,
    /// Extra attempts after a retryable failure. Zero disables retrying.
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FEED_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            max_in_flight: 8,
            join_policy: JoinPolicy::FailFast,
            retries: 0,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

pub struct FeedClient<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    transport: T,
    base_url: Url,
    options: ClientOptions,
}

impl<T> Clone for FeedClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: FeedTransport + 'static> FeedClient<T> {
    /// # Errors
    ///
    /// Fails when `options.base_url` is not an absolute URL.
    pub fn new(transport: T, options: ClientOptions) -> Result<Self, FeedError> {
        let base_url = Url::parse(&options.base_url).map_err(|e| FeedError::Transport {
            url: options.base_url.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                base_url,
                options,
            }),
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_agencies(&self) -> Result<Vec<Agency>, FeedError> {
        let url = self.inner.command_url("agencyList", &[]);
        let tree = self.inner.fetch(&url).await?;
        let agencies = extract_agencies(&tree)?;
        info!(count = agencies.len(), "Fetched agencies");
        Ok(agencies)
    }

    /// Routes for every agency, one call per agency.
    ///
    /// Reference data is always fetched fail-fast: a skipped agency would
    /// leave the store silently incomplete after a reload.
    #[tracing::instrument(skip_all, fields(agencies = agencies.len()))]
    pub async fn get_routes(&self, agencies: &[Agency]) -> Result<Vec<Route>, FeedError> {
        let tags: Vec<String> = agencies.iter().map(|a| a.tag.clone()).collect();
        let routes = self
            .fan_out(tags, JoinPolicy::FailFast, |inner, agency_tag| async move {
                inner.routes_for_agency(&agency_tag).await
            })
            .await?;
        info!(count = routes.len(), "Fetched routes");
        Ok(routes)
    }

    /// Stops for every route, one call per route. Always fail-fast, like
    /// [`Self::get_routes`].
    #[tracing::instrument(skip_all, fields(routes = routes.len()))]
    pub async fn get_stops(&self, routes: &[Route]) -> Result<Vec<Stop>, FeedError> {
        let stops = self
            .fan_out(routes.to_vec(), JoinPolicy::FailFast, |inner, route| async move {
                inner.stops_for_route(&route).await
            })
            .await?;
        info!(count = stops.len(), "Fetched stops");
        Ok(stops)
    }

    /// Predictions for exactly `stops`, one feed call per agency chunk.
    ///
    /// An empty stop set returns immediately without touching the feed. A
    /// failed chunk is handled by the configured [`JoinPolicy`].
    #[tracing::instrument(skip_all, fields(stops = stops.len()))]
    pub async fn get_predictions(&self, stops: &[Stop]) -> Result<Vec<Prediction>, FeedError> {
        if stops.is_empty() {
            return Ok(Vec::new());
        }

        let batches = prediction_batches(stops);
        debug!(batches = batches.len(), "Fetching predictions");

        let policy = self.inner.options.join_policy;
        let predictions = self
            .fan_out(batches, policy, |inner, batch| async move {
                inner.predictions_for_batch(&batch).await
            })
            .await?;

        info!(count = predictions.len(), stops = stops.len(), "Fetched predictions");
        Ok(predictions)
    }

    async fn fan_out<I, R, F, Fut>(
        &self,
        items: Vec<I>,
        policy: JoinPolicy,
        task: F,
    ) -> Result<Vec<R>, FeedError>
    where
        I: Send + 'static,
        R: Send + 'static,
        F: Fn(Arc<Inner<T>>, I) -> Fut,
        Fut: Future<Output = Result<Vec<R>, FeedError>> + Send + 'static,
    {
        fan_out(items, policy, self.inner.options.max_in_flight, |item| {
            task(Arc::clone(&self.inner), item)
        })
        .await
    }
}

impl<T: FeedTransport> Inner<T> {
    async fn routes_for_agency(&self, agency_tag: &str) -> Result<Vec<Route>, FeedError> {
        let url = self.command_url("routeList", &[("a", agency_tag)]);
        let tree = self.fetch(&url).await?;
        let routes = extract_routes(&tree, agency_tag)?;
        debug!(agency = agency_tag, count = routes.len(), "Fetched routes");
        Ok(routes)
    }

    async fn stops_for_route(&self, route: &Route) -> Result<Vec<Stop>, FeedError> {
        let url = self.command_url(
            "routeConfig",
            &[("a", route.agency_tag.as_str()), ("r", route.tag.as_str()), ("terse", "")],
        );
        let tree = self.fetch(&url).await?;
        let stops = extract_stops(&tree, &route.agency_tag, &route.tag)?;
        debug!(route = %route.tag, count = stops.len(), "Fetched stops");
        Ok(stops)
    }

    async fn predictions_for_batch(
        &self,
        batch: &PredictionBatch,
    ) -> Result<Vec<Prediction>, FeedError> {
        let url = self.predictions_url(batch);
        let tree = self.fetch(&url).await?;
        let outcomes = extract_predictions(&tree)?;
        let total = outcomes.len();
        let found: Vec<Prediction> = outcomes
            .into_iter()
            .filter_map(PredictionOutcome::into_prediction)
            .collect();
        debug!(
            agency = %batch.agency_tag,
            stops = batch.stops.len(),
            found = found.len(),
            without_departures = total - found.len(),
            "Fetched prediction batch"
        );
        Ok(found)
    }

    fn command_url(&self, command: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("command", command);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    fn predictions_url(&self, batch: &PredictionBatch) -> Url {
        let mut url =
            self.command_url("predictionsForMultiStops", &[("a", batch.agency_tag.as_str())]);
        {
            let mut query = url.query_pairs_mut();
            for (route_tag, stop_tag) in &batch.stops {
                query.append_pair("stops", &format!("{route_tag}|{stop_tag}"));
            }
        }
        url
    }

    /// One feed call under the per-request timeout, retried with exponential
    /// backoff while the failure is retryable and attempts remain.
    async fn fetch(&self, url: &Url) -> Result<NodeTree, FeedError> {
        let timeout = self.options.request_timeout;
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(timeout, self.transport.fetch(url)).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout {
                    url: url.to_string(),
                    after: timeout,
                }),
            };

            match result {
                Err(err) if err.is_retryable() && attempt < self.options.retries => {
                    let delay = retry_delay(self.options.retry_backoff, attempt);
                    attempt += 1;
                    warn!(
                        url = %url,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying feed request"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// `base * 2^attempt`, capped at [`MAX_RETRY_DELAY`].
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

/// Stops for one agency, at most [`MAX_STOPS_PER_REQUEST`] of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionBatch {
    pub agency_tag: String,
    /// `(route_tag, stop_tag)` pairs.
    pub stops: Vec<(String, String)>,
}

/// Groups stops by agency, then chunks each group.
pub fn prediction_batches(stops: &[Stop]) -> Vec<PredictionBatch> {
    let mut by_agency: BTreeMap<&str, Vec<(String, String)>> = BTreeMap::new();
    for stop in stops {
        by_agency
            .entry(stop.agency_tag.as_str())
            .or_default()
            .push((stop.route_tag.clone(), stop.tag.clone()));
    }

    by_agency
        .into_iter()
        .flat_map(|(agency_tag, pairs)| {
            pairs
                .chunks(MAX_STOPS_PER_REQUEST)
                .map(|chunk| PredictionBatch {
                    agency_tag: agency_tag.to_string(),
                    stops: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
