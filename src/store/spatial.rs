//! Great-circle helpers for the nearby query.
//!
//! Distances use the Haversine formula on the mean Earth radius, the same
//! metric the store filters and orders by.

use geo::{HaversineDistance, Point};

use crate::model::Position;

/// Mean Earth radius in meters, as used by `geo`'s Haversine implementation.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two positions in meters.
pub fn haversine_distance(a: Position, b: Position) -> f64 {
    let a = Point::new(a.longitude, a.latitude);
    let b = Point::new(b.longitude, b.latitude);
    a.haversine_distance(&b)
}

/// Latitude/longitude ranges, in degrees, that contain every point within
/// `radius_m` of `center`.
///
/// Returns one range in the common case and two when the circle crosses the
/// antimeridian. Near a pole the longitude range covers the whole globe.
pub fn bounding_ranges(center: Position, radius_m: f64) -> Vec<BoundingRange> {
    let angular = radius_m / EARTH_RADIUS_M;
    let lat = center.latitude.to_radians();
    let lon = center.longitude.to_radians();

    let min_lat = lat - angular;
    let max_lat = lat + angular;
    let half_pi = std::f64::consts::FRAC_PI_2;

    if min_lat <= -half_pi || max_lat >= half_pi || angular >= half_pi {
        return vec![BoundingRange {
            min_lat: min_lat.to_degrees().max(-90.0),
            max_lat: max_lat.to_degrees().min(90.0),
            min_lon: -180.0,
            max_lon: 180.0,
        }];
    }

    let ratio = angular.sin() / lat.cos();
    if ratio >= 1.0 {
        return vec![BoundingRange {
            min_lat: min_lat.to_degrees(),
            max_lat: max_lat.to_degrees(),
            min_lon: -180.0,
            max_lon: 180.0,
        }];
    }

    let delta_lon = ratio.asin();
    let min_lon = (lon - delta_lon).to_degrees();
    let max_lon = (lon + delta_lon).to_degrees();
    let (min_lat, max_lat) = (min_lat.to_degrees(), max_lat.to_degrees());

    let range = |min_lon: f64, max_lon: f64| BoundingRange {
        min_lat,
        max_lat,
        min_lon,
        max_lon,
    };

    if min_lon < -180.0 {
        vec![range(min_lon + 360.0, 180.0), range(-180.0, max_lon)]
    } else if max_lon > 180.0 {
        vec![range(min_lon, 180.0), range(-180.0, max_lon - 360.0)]
    } else {
        vec![range(min_lon, max_lon)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRange {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[cfg(test)]
impl BoundingRange {
    fn contains(&self, position: Position) -> bool {
        (self.min_lat..=self.max_lat).contains(&position.latitude)
            && (self.min_lon..=self.max_lon).contains(&position.longitude)
    }
}
