//! Bootstraps the geo store from the feed.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::client::FeedClient;
use crate::error::Error;
use crate::fetch::FeedTransport;
use crate::model::Agency;
use crate::store::GeoStore;

/// Which agencies to load. An empty filter keeps every agency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgencyFilter {
    tags: Vec<String>,
}

impl AgencyFilter {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, agency: &Agency) -> bool {
        self.tags.is_empty() || self.tags.iter().any(|t| *t == agency.tag)
    }
}

/// Counts of what a reload put into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub agencies: usize,
    pub routes: usize,
    pub stops: usize,
}

pub struct ReferenceLoader<T, S> {
    client: FeedClient<T>,
    store: Arc<S>,
    filter: AgencyFilter,
    running: Mutex<()>,
}

impl<T, S> ReferenceLoader<T, S>
where
    T: FeedTransport + 'static,
    S: GeoStore,
{
    pub fn new(client: FeedClient<T>, store: Arc<S>, filter: AgencyFilter) -> Self {
        Self {
            client,
            store,
            filter,
            running: Mutex::new(()),
        }
    }

    /// Fetches agencies matching the loader's filter, their routes and stops,
    /// and replaces the store's dataset.
    ///
    /// Every fetch must succeed before the store is touched; a failed reload
    /// leaves the previous dataset in place. Overlapping calls on the same
    /// loader run one after the other. Nothing stops `find_nearby` from
    /// reading while `load_all` is in progress.
    #[tracing::instrument(skip(self), fields(filter = ?self.filter))]
    pub async fn reload(&self) -> Result<LoadSummary, Error> {
        let _running = self.running.lock().await;

        let agencies: Vec<Agency> = self
            .client
            .get_agencies()
            .await?
            .into_iter()
            .filter(|a| self.filter.matches(a))
            .collect();
        info!(count = agencies.len(), "Agencies selected for loading");

        let routes = self.client.get_routes(&agencies).await?;
        let stops = self.client.get_stops(&routes).await?;

        self.store.load_all(&agencies, &routes, &stops).await?;

        let summary = LoadSummary {
            agencies: agencies.len(),
            routes: routes.len(),
            stops: stops.len(),
        };
        info!(?summary, "Reference data loaded");
        Ok(summary)
    }

    /// Reloads when `force` is set or the
    /// store has no stops yet.
    pub async fn ensure_loaded(&self, force: bool) -> Result<Option<LoadSummary>, Error> {
        let empty = self.store.is_empty().await?;
        if force || empty {
            info!(force, empty, "Loading reference data");
            return self.reload().await.map(Some);
        }
        Ok(None)
    }
}
