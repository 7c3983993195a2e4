//! Transit records shared by the feed client, the geo store and the
//! departure aggregator.
//!
//! Field names serialize in camelCase, matching what the HTTP layer hands to
//! its consumers.

use serde::{Deserialize, Serialize};

/// A transit operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agency {
    pub tag: String,
    pub title: String,
}

/// A route, unique by tag within its agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub tag: String,
    pub agency_tag: String,
    pub title: String,
}

/// WGS84 coordinate, always (latitude, longitude) outside the geo store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` when both axes are finite and inside their WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A stop as served by one route. The same physical stop appears once per
/// route that serves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub tag: String,
    pub agency_tag: String,
    pub route_tag: String,
    pub title: String,
    pub position: Position,
}

impl Stop {
    /// Composite identity `agencyTag|routeTag|tag`.
    pub fn id(&self) -> String {
        format!("{}|{}|{}", self.agency_tag, self.route_tag, self.tag)
    }
}

/// Live predictions for one direction of travel at a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Direction {
    pub title: String,
    /// Seconds until departure, in feed order.
    pub seconds: Vec<i64>,
}

impl Direction {
    /// The first departure that has not already happened.
    pub fn next_departure(&self) -> Option<i64> {
        self.seconds.iter().copied().find(|s| *s >= 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub stop_title: String,
    pub route_tag: String,
    pub route_title: String,
    pub directions: Vec<Direction>,
}

/// What the feed said about one stop/route pair in a predictions response.
///
/// A stop with no scheduled departures is a normal answer from the feed, not a
/// structural failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionOutcome {
    Found(Prediction),
    NoDeparture {
        stop_title: String,
        route_tag: String,
    },
}

impl PredictionOutcome {
    pub fn into_prediction(self) -> Option<Prediction> {
        match self {
            Self::Found(prediction) => Some(prediction),
            Self::NoDeparture { .. } => None,
        }
    }
}

/// Result of a nearby-departures query: `{stops, predictions}` and nothing
/// else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartureInfo {
    pub stops: Vec<Stop>,
    pub predictions: Vec<Prediction>,
}

impl DepartureInfo {
    pub fn new(stops: Vec<Stop>, predictions: Vec<Prediction>) -> Self {
        Self { stops, predictions }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
