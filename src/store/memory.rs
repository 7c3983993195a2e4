//! In-process [`GeoStore`] backed by an R-tree.
//!
//! Stop points are indexed as `[longitude, latitude]`, the x/y order `geo`
//! and `rstar` work in. Conversion to and from [`Position`] happens only in
//! this file.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};
use tracing::{debug, info};

use super::GeoStore;
use super::spatial::{bounding_ranges, haversine_distance};
use crate::error::StoreError;
use crate::model::{Agency, Position, Route, Stop};

/// Index entry: `[lon, lat]` plus the stop's non-spatial fields.
type StopNode = GeomWithData<[f64; 2], StoredStop>;

#[derive(Debug, Clone, PartialEq)]
struct StoredStop {
    tag: String,
    agency_tag: String,
    route_tag: String,
    title: String,
}

fn to_store_point(position: Position) -> [f64; 2] {
    [position.longitude, position.latitude]
}

fn from_store_point(point: &[f64; 2]) -> Position {
    Position::new(point[1], point[0])
}

fn to_node(stop: &Stop) -> StopNode {
    GeomWithData::new(
        to_store_point(stop.position),
        StoredStop {
            tag: stop.tag.clone(),
            agency_tag: stop.agency_tag.clone(),
            route_tag: stop.route_tag.clone(),
            title: stop.title.clone(),
        },
    )
}

fn to_stop(node: &StopNode) -> Stop {
    let data = &node.data;
    Stop {
        tag: data.tag.clone(),
        agency_tag: data.agency_tag.clone(),
        route_tag: data.route_tag.clone(),
        title: data.title.clone(),
        position: from_store_point(node.geom()),
    }
}

#[derive(Default)]
struct State {
    agencies: BTreeMap<String, Agency>,
    routes: BTreeMap<(String, String), Route>,
    stop_ids: HashSet<String>,
    /// `None` until [`GeoStore::init`] creates it.
    index: Option<RTree<StopNode>>,
}

#[derive(Default)]
pub struct MemoryGeoStore {
    state: RwLock<State>,
}

impl MemoryGeoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub fn agencies(&self) -> Result<Vec<Agency>, StoreError> {
        Ok(self.read()?.agencies.values().cloned().collect())
    }

    pub fn routes(&self) -> Result<Vec<Route>, StoreError> {
        Ok(self.read()?.routes.values().cloned().collect())
    }

    /// Every loaded stop, ordered by identity.
    pub fn stops(&self) -> Result<Vec<Stop>, StoreError> {
        let state = self.read()?;
        let mut stops: Vec<Stop> = state
            .index
            .iter()
            .flat_map(|index| index.iter())
            .map(to_stop)
            .collect();
        stops.sort_by_key(Stop::id);
        Ok(stops)
    }

    pub fn has_index(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.index.is_some())
    }
}

#[async_trait]
impl GeoStore for MemoryGeoStore {
    async fn init(&self) -> Result<(), StoreError> {
        let mut state = self.write()?;
        *state = State {
            index: Some(RTree::new()),
            ..State::default()
        };
        debug!("Dropped reference data and created stop index");
        Ok(())
    }

    async fn insert_agencies(&self, agencies: &[Agency]) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let mut seen = HashSet::new();
        for agency in agencies {
            if state.agencies.contains_key(&agency.tag) || !seen.insert(agency.tag.as_str()) {
                return Err(StoreError::Duplicate {
                    kind: "agency",
                    id: agency.tag.clone(),
                });
            }
        }
        for agency in agencies {
            state.agencies.insert(agency.tag.clone(), agency.clone());
        }
        Ok(())
    }

    async fn insert_routes(&self, routes: &[Route]) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let mut seen = HashSet::new();
        for route in routes {
            let key = (route.agency_tag.clone(), route.tag.clone());
            if state.routes.contains_key(&key) || !seen.insert(key) {
                return Err(StoreError::Duplicate {
                    kind: "route",
                    id: format!("{}|{}", route.agency_tag, route.tag),
                });
            }
        }
        for route in routes {
            state
                .routes
                .insert((route.agency_tag.clone(), route.tag.clone()), route.clone());
        }
        Ok(())
    }

    async fn insert_stops(&self, stops: &[Stop]) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.index.is_none() {
            return Err(StoreError::IndexMissing);
        }

        let mut seen = HashSet::new();
        for stop in stops {
            let id = stop.id();
            if state.stop_ids.contains(&id) || !seen.insert(id.clone()) {
                return Err(StoreError::Duplicate { kind: "stop", id });
            }
        }

        let State {
            stop_ids, index, ..
        } = &mut *state;
        let index = index.as_mut().ok_or(StoreError::IndexMissing)?;
        if index.size() == 0 {
            *index = RTree::bulk_load(stops.iter().map(to_node).collect());
        } else {
            for stop in stops {
                index.insert(to_node(stop));
            }
        }
        stop_ids.extend(seen);

        info!(inserted = stops.len(), total = index.size(), "Indexed stops");
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.stop_ids.is_empty())
    }

    async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance_m: f64,
        limit: usize,
    ) -> Result<Vec<Stop>, StoreError> {
        let state = self.read()?;
        let index = state.index.as_ref().ok_or(StoreError::IndexMissing)?;

        let center = Position::new(latitude, longitude);
        if limit == 0 || !center.is_valid() || !max_distance_m.is_finite() || max_distance_m < 0.0
        {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(f64, &StopNode)> = bounding_ranges(center, max_distance_m)
            .into_iter()
            .flat_map(|range| {
                let envelope = AABB::from_corners(
                    to_store_point(Position::new(range.min_lat, range.min_lon)),
                    to_store_point(Position::new(range.max_lat, range.max_lon)),
                );
                index
                    .locate_in_envelope_intersecting(&envelope)
                    .collect::<Vec<_>>()
            })
            .map(|node| (haversine_distance(center, from_store_point(node.geom())), node))
            .filter(|(distance, _)| *distance <= max_distance_m)
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.truncate(limit);

        debug!(
            latitude,
            longitude,
            max_distance_m,
            limit,
            found = hits.len(),
            "Nearby stop query"
        );
        Ok(hits.into_iter().map(|(_, node)| to_stop(node)).collect())
    }
}
