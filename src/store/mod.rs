//! Persistence for reference data and the nearby-stop query.
//!
//! The public contract always speaks (latitude, longitude). Backends that
//! store coordinates in a different axis order translate inside their own
//! module and nowhere else.

mod memory;
pub mod spatial;

pub use memory::MemoryGeoStore;

use async_trait::async_trait;
use tracing::info;

use crate::error::StoreError;
use crate::model::{Agency, Route, Stop};

#[async_trait]
pub trait GeoStore: Send + Sync {
    /// Drops every agency, route and stop and (re)creates the geo index on
    /// stop positions.
    async fn init(&self) -> Result<(), StoreError>;

    async fn insert_agencies(&self, agencies: &[Agency]) -> Result<(), StoreError>;

    async fn insert_routes(&self, routes: &[Route]) -> Result<(), StoreError>;

    async fn insert_stops(&self, stops: &[Stop]) -> Result<(), StoreError>;

    /// `true` when no stops are loaded.
    async fn is_empty(&self) -> Result<bool, StoreError>;

    /// Stops within `max_distance_m` meters (great-circle) of the point,
    /// nearest first, at most `limit` of them.
    async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance_m: f64,
        limit: usize,
    ) -> Result<Vec<Stop>, StoreError>;

    /// Replaces the whole dataset: drop, index, then insert agencies, routes
    /// and stops in that order.
    ///
    /// A failure part way through leaves the store partially loaded. Readers
    /// running concurrently may observe the empty or partial dataset.
    async fn load_all(
        &self,
        agencies: &[Agency],
        routes: &[Route],
        stops: &[Stop],
    ) -> Result<(), StoreError> {
        self.init().await?;

        info!(count = agencies.len(), "Inserting agencies");
        self.insert_agencies(agencies).await?;

        info!(count = routes.len(), "Inserting routes");
        self.insert_routes(routes).await?;

        info!(count = stops.len(), "Inserting stops");
        self.insert_stops(stops).await?;

        Ok(())
    }
}
