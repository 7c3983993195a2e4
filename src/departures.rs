//! Request-time entry point: nearby stops plus their live predictions.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::client::FeedClient;
use crate::error::Error;
use crate::fetch::FeedTransport;
use crate::model::DepartureInfo;
use crate::store::GeoStore;

pub struct DepartureAggregator<T, S> {
    client: FeedClient<T>,
    store: Arc<S>,
}

impl<T, S> DepartureAggregator<T, S>
where
    T: FeedTransport + 'static,
    S: GeoStore,
{
    pub fn new(client: FeedClient<T>, store: Arc<S>) -> Self {
        Self { client, store }
    }

    /// Stops within `max_distance` meters of the point, nearest first, and
    /// the predictions the feed has for exactly those stops.
    ///
    /// No nearby stops is an empty answer, not an error, and the feed is not
    /// called. Predictions whose stop title does not belong to a returned stop
    /// are dropped.
    #[tracing::instrument(skip(self))]
    pub async fn get_nearby_departure_info(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance: f64,
        limit: usize,
    ) -> Result<DepartureInfo, Error> {
        let stops = self
            .store
            .find_nearby(latitude, longitude, max_distance, limit)
            .await?;
        if stops.is_empty() {
            debug!("No stops nearby");
            return Ok(DepartureInfo::empty());
        }

        let titles: HashSet<&str> = stops.iter().map(|s| s.title.as_str()).collect();
        let fetched = self.client.get_predictions(&stops).await?;
        let total = fetched.len();
        let predictions: Vec<_> = fetched
            .into_iter()
            .filter(|p| titles.contains(p.stop_title.as_str()))
            .collect();

        if predictions.len() < total {
            debug!(
                dropped = total - predictions.len(),
                "Dropped predictions for unknown stops"
            );
        }

        Ok(DepartureInfo::new(stops, predictions))
    }
}
