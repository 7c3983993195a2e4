//! Typed records out of normalized feed documents.
//!
//! Every accessor that expects a field fails with an [`ExtractionError`] when
//! the field is absent or has the wrong shape. The one tolerated absence is a
//! `predictions` node without a `direction` child, which is how the feed says
//! a stop has nothing scheduled.

use serde_json::Value;
use tracing::error;

use crate::error::{ExtractionError, FeedError};
use crate::model::{Agency, Direction, Position, Prediction, PredictionOutcome, Route, Stop};
use crate::parser::NodeTree;

const CONTEXT_LIMIT: usize = 240;

/// `<body><agency tag=".." title=".."/>...</body>`
pub fn extract_agencies(tree: &NodeTree) -> Result<Vec<Agency>, FeedError> {
    let body = body(tree)?;
    nodes(body, "agency")?
        .into_iter()
        .map(|agency| -> Result<Agency, FeedError> {
            Ok(Agency {
                tag: string(agency, "tag")?,
                title: string(agency, "title")?,
            })
        })
        .collect()
}

/// `<body><route tag=".." title=".."/>...</body>`
pub fn extract_routes(tree: &NodeTree, agency_tag: &str) -> Result<Vec<Route>, FeedError> {
    let body = body(tree)?;
    nodes(body, "route")?
        .into_iter()
        .map(|route| -> Result<Route, FeedError> {
            Ok(Route {
                tag: string(route, "tag")?,
                agency_tag: agency_tag.to_string(),
                title: string(route, "title")?,
            })
        })
        .collect()
}

/// `<body><route ...><stop tag=".." title=".." lat=".." lon=".."/>...</route></body>`
pub fn extract_stops(
    tree: &NodeTree,
    agency_tag: &str,
    route_tag: &str,
) -> Result<Vec<Stop>, FeedError> {
    let body = body(tree)?;
    let route = node(body, "route")?;
    nodes(route, "stop")?
        .into_iter()
        .map(|stop| -> Result<Stop, FeedError> {
            Ok(Stop {
                tag: string(stop, "tag")?,
                agency_tag: agency_tag.to_string(),
                route_tag: route_tag.to_string(),
                title: string(stop, "title")?,
                position: position(stop)?,
            })
        })
        .collect()
}

/// One outcome per `predictions` node, in feed order.
pub fn extract_predictions(tree: &NodeTree) -> Result<Vec<PredictionOutcome>, FeedError> {
    let body = body(tree)?;
    nodes(body, "predictions")?
        .into_iter()
        .map(prediction_outcome)
        .collect()
}

fn prediction_outcome(predictions: &Value) -> Result<PredictionOutcome, FeedError> {
    let stop_title = string(predictions, "stopTitle")?;
    let route_tag = string(predictions, "routeTag")?;

    if predictions.get("direction").is_none() {
        return Ok(PredictionOutcome::NoDeparture {
            stop_title,
            route_tag,
        });
    }

    let directions = nodes(predictions, "direction")?
        .into_iter()
        .map(|direction| -> Result<Direction, FeedError> {
            let seconds = nodes(direction, "prediction")?
                .into_iter()
                .map(|p| int(p, "seconds"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Direction {
                title: string(direction, "title")?,
                seconds,
            })
        })
        .collect::<Result<Vec<_>, FeedError>>()?;

    Ok(PredictionOutcome::Found(Prediction {
        stop_title,
        route_tag,
        route_title: string(predictions, "routeTitle")?,
        directions,
    }))
}

/// The `body` node, or the feed's own error report if it sent one instead.
fn body(tree: &NodeTree) -> Result<&Value, FeedError> {
    let body = node(tree, "body")?;
    if let Some(err) = body.get("Error") {
        let err = coerce(err).into_iter().next().unwrap_or(err);
        let message = err
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("unspecified error")
            .to_string();
        let should_retry = err.get("shouldRetry").and_then(Value::as_str) == Some("true");
        error!(message, should_retry, "Feed returned an error document");
        return Err(FeedError::Upstream {
            message,
            should_retry,
        });
    }
    Ok(body)
}

fn position(stop: &Value) -> Result<Position, FeedError> {
    let latitude = float(stop, "lat")?;
    let longitude = float(stop, "lon")?;
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(unexpected(stop, "lat", "latitude in [-90, 90]"));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(unexpected(stop, "lon", "longitude in [-180, 180]"));
    }
    Ok(Position::new(latitude, longitude))
}

fn coerce(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn node<'a>(value: &'a Value, key: &str) -> Result<&'a Value, FeedError> {
    value
        .get(key)
        .filter(|v| v.is_object())
        .ok_or_else(|| unexpected(value, key, "node"))
}

fn nodes<'a>(value: &'a Value, key: &str) -> Result<Vec<&'a Value>, FeedError> {
    let items = coerce(value.get(key).ok_or_else(|| unexpected(value, key, "node"))?);
    if items.iter().all(|v| v.is_object()) {
        Ok(items)
    } else {
        Err(unexpected(value, key, "node"))
    }
}

fn string(value: &Value, key: &str) -> Result<String, FeedError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| unexpected(value, key, "string"))
}

fn float(value: &Value, key: &str) -> Result<f64, FeedError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .ok_or_else(|| unexpected(value, key, "float"))
}

fn int(value: &Value, key: &str) -> Result<i64, FeedError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| unexpected(value, key, "integer"))
}

fn unexpected(value: &Value, key: &str, expected: &'static str) -> FeedError {
    let mut context = value.to_string();
    if context.len() > CONTEXT_LIMIT {
        let cut = (0..=CONTEXT_LIMIT)
            .rev()
            .find(|i| context.is_char_boundary(*i))
            .unwrap_or(0);
        context.truncate(cut);
        context.push_str("...");
    }
    error!(field = key, expected, context = %context, "Unexpected feed document");
    FeedError::Extraction(ExtractionError {
        field: key.to_string(),
        expected,
        context,
    })
}
