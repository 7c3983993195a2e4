use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nearby_departures::client::{ClientOptions, FeedClient};
use nearby_departures::departures::DepartureAggregator;
use nearby_departures::error::{Error, FeedError};
use nearby_departures::fanout::JoinPolicy;
use nearby_departures::fetch::FeedTransport;
use nearby_departures::loader::{AgencyFilter, ReferenceLoader};
use nearby_departures::model::{Position, Prediction, Stop};
use nearby_departures::parser::{NodeTree, parse_document};
use nearby_departures::store::spatial::haversine_distance;
use nearby_departures::store::{GeoStore, MemoryGeoStore};
use reqwest::Url;

const AGENCY_LIST: &str = include_str!("fixtures/agencyList.xml");
const ROUTE_LIST: &str = include_str!("fixtures/routeList.xml");
const ROUTE_CONFIG_F: &str = include_str!("fixtures/routeConfig_F.xml");
const ROUTE_CONFIG_J: &str = include_str!("fixtures/routeConfig_J.xml");
const ROUTE_CONFIG_N: &str = include_str!("fixtures/routeConfig_N.xml");
const PREDICTIONS: &str = include_str!("fixtures/predictions.xml");

const FERRY_BUILDING: &str = "The Embarcadero & Ferry Building";
const EMBARCADERO: &str = "Embarcadero Station";

/// Serves the recorded SF Muni documents and keeps every requested URL.
#[derive(Default)]
struct FixtureTransport {
    urls: CallLog,
    /// Requests for this agency fail with a 503.
    failing_agency: Option<String>,
    /// Answer predictions with one entry per requested stop instead of the
    /// recorded document.
    echo_predictions: bool,
}

type CallLog = Arc<Mutex<Vec<Url>>>;

fn calls(log: &CallLog, command: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|u| param(u, "command").as_deref() == Some(command))
        .count()
}

fn param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[async_trait]
impl FeedTransport for FixtureTransport {
    async fn fetch(&self, url: &Url) -> Result<NodeTree, FeedError> {
        self.urls.lock().unwrap().push(url.clone());

        let agency = param(url, "a");
        if agency.is_some() && agency == self.failing_agency {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        let command = param(url, "command").unwrap_or_default();
        let document = match (command.as_str(), param(url, "r").as_deref()) {
            ("agencyList", _) => AGENCY_LIST.to_string(),
            ("routeList", _) if agency.as_deref() == Some("sf-muni") => ROUTE_LIST.to_string(),
            ("routeConfig", Some("F")) => ROUTE_CONFIG_F.to_string(),
            ("routeConfig", Some("J")) => ROUTE_CONFIG_J.to_string(),
            ("routeConfig", Some("N")) => ROUTE_CONFIG_N.to_string(),
            ("predictionsForMultiStops", _) if self.echo_predictions => echo_predictions(url),
            ("predictionsForMultiStops", _) => PREDICTIONS.to_string(),
            _ => {
                return Err(FeedError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            }
        };
        parse_document(document.as_bytes())
    }
}

fn echo_predictions(url: &Url) -> String {
    let agency = param(url, "a").unwrap_or_default();
    let mut xml = String::from("<body>");
    for (key, value) in url.query_pairs() {
        if key == "stops" {
            let (route, tag) = value.split_once('|').unwrap();
            xml.push_str(&format!(
                r#"<predictions routeTag="{route}" routeTitle="{agency} {route}" stopTitle="{agency} {tag}"><direction title="Inbound"><prediction seconds="120"/></direction></predictions>"#
            ));
        }
    }
    xml.push_str("</body>");
    xml
}

/// Always answers with the same document.
struct StaticTransport(&'static str);

#[async_trait]
impl FeedTransport for StaticTransport {
    async fn fetch(&self, _url: &Url) -> Result<NodeTree, FeedError> {
        parse_document(self.0.as_bytes())
    }
}

fn client<T: FeedTransport + 'static>(transport: T, join_policy: JoinPolicy) -> FeedClient<T> {
    let options = ClientOptions {
        join_policy,
        ..ClientOptions::default()
    };
    FeedClient::new(transport, options).unwrap()
}

fn stop(agency: &str, tag: usize) -> Stop {
    Stop {
        tag: tag.to_string(),
        agency_tag: agency.to_string(),
        route_tag: "1".to_string(),
        title: format!("{agency} {tag}"),
        position: Position::new(37.80, -122.27),
    }
}

fn sorted(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
    predictions.sort_by(|a, b| (&a.stop_title, &a.route_tag).cmp(&(&b.stop_title, &b.route_tag)));
    predictions
}

async fn loaded() -> (FeedClient<FixtureTransport>, Arc<MemoryGeoStore>) {
    let client = client(FixtureTransport::default(), JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    let loader = ReferenceLoader::new(
        client.clone(),
        Arc::clone(&store),
        AgencyFilter::new(["sf-muni"]),
    );
    loader.ensure_loaded(false).await.unwrap();
    (client, store)
}

#[tokio::test]
async fn test_full_pipeline() {
    let (client, store) = loaded().await;
    let aggregator = DepartureAggregator::new(client, store);

    let info = aggregator
        .get_nearby_departure_info(37.80296, -122.40103, 1200.0, 10)
        .await
        .unwrap();

    let titles: Vec<&str> = info.stops.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec![FERRY_BUILDING, EMBARCADERO, EMBARCADERO]);

    // J has no departures and Castro Station is not nearby.
    let predictions = sorted(info.predictions);
    let keys: Vec<(&str, &str)> = predictions
        .iter()
        .map(|p| (p.stop_title.as_str(), p.route_tag.as_str()))
        .collect();
    assert_eq!(keys, vec![(EMBARCADERO, "N"), (FERRY_BUILDING, "F")]);
    assert_eq!(predictions[0].directions.len(), 2);
    assert_eq!(predictions[0].directions[1].seconds, vec![324, 924]);
    assert_eq!(predictions[1].route_title, "F-Market & Wharves");
}

#[tokio::test]
async fn test_load_reports_and_filters_agencies() {
    let transport = FixtureTransport::default();
    let client = client(transport, JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    let loader = ReferenceLoader::new(
        client,
        Arc::clone(&store),
        AgencyFilter::new(["sf-muni"]),
    );

    let summary = loader.reload().await.unwrap();
    assert_eq!((summary.agencies, summary.routes, summary.stops), (1, 3, 8));

    let agencies = store.agencies().unwrap();
    assert_eq!(agencies.len(), 1);
    assert_eq!(agencies[0].tag, "sf-muni");
    assert_eq!(store.routes().unwrap().len(), 3);

    let stops = store.stops().unwrap();
    assert!(stops.iter().any(|s| s.id() == "sf-muni|J|7145"));
    assert!(stops.iter().any(|s| s.id() == "sf-muni|N|7145"));
}

#[tokio::test]
async fn test_unfiltered_load_fails_on_agency_without_routes() {
    let client = client(FixtureTransport::default(), JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    let loader = ReferenceLoader::new(client, Arc::clone(&store), AgencyFilter::all());

    let err = loader.ensure_loaded(false).await.unwrap_err();
    assert!(matches!(err, Error::Feed(FeedError::Status { status: 404, .. })));
    assert!(store.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_dataset_under_partial_success() {
    let store = Arc::new(MemoryGeoStore::new());
    let muni = ReferenceLoader::new(
        client(FixtureTransport::default(), JoinPolicy::PartialSuccess),
        Arc::clone(&store),
        AgencyFilter::new(["sf-muni"]),
    );
    muni.reload().await.unwrap();
    let before = store.stops().unwrap();

    // actransit has no route list, so its routes fetch fails.
    let everything = ReferenceLoader::new(
        client(FixtureTransport::default(), JoinPolicy::PartialSuccess),
        Arc::clone(&store),
        AgencyFilter::all(),
    );
    let err = everything.reload().await.unwrap_err();
    assert!(matches!(err, Error::Feed(FeedError::Status { status: 404, .. })));

    assert_eq!(store.stops().unwrap(), before);
    assert_eq!(store.agencies().unwrap().len(), 1);
}

#[tokio::test]
async fn test_radius_boundary() {
    let (client, store) = loaded().await;
    let query = Position::new(37.80296, -122.40103);
    let ferry = Position::new(37.7955, -122.3937);
    let distance = haversine_distance(query, ferry);
    assert!(distance > 1000.0 && distance < 1100.0, "{distance}");

    let aggregator = DepartureAggregator::new(client, store);

    let inside = aggregator
        .get_nearby_departure_info(query.latitude, query.longitude, 1100.0, 10)
        .await
        .unwrap();
    let titles: Vec<&str> = inside.stops.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec![FERRY_BUILDING]);

    let outside = aggregator
        .get_nearby_departure_info(query.latitude, query.longitude, 1000.0, 10)
        .await
        .unwrap();
    assert!(outside.stops.is_empty());
    assert!(outside.predictions.is_empty());
}

#[tokio::test]
async fn test_no_nearby_stops_skips_predictions() {
    let log = CallLog::default();
    let transport = FixtureTransport {
        urls: Arc::clone(&log),
        ..FixtureTransport::default()
    };
    let client = client(transport, JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    let loader = ReferenceLoader::new(
        client.clone(),
        Arc::clone(&store),
        AgencyFilter::new(["sf-muni"]),
    );
    loader.ensure_loaded(false).await.unwrap();
    assert_eq!(calls(&log, "routeConfig"), 3);

    let aggregator = DepartureAggregator::new(client, store);

    let info = aggregator
        .get_nearby_departure_info(0.0, 0.0, 1000.0, 10)
        .await
        .unwrap();
    assert!(info.stops.is_empty());
    assert!(info.predictions.is_empty());

    let info = aggregator
        .get_nearby_departure_info(37.80296, -122.40103, 1200.0, 0)
        .await
        .unwrap();
    assert!(info.stops.is_empty());
    assert_eq!(calls(&log, "predictionsForMultiStops"), 0);
}

#[tokio::test]
async fn test_limit_keeps_nearest() {
    let (client, store) = loaded().await;
    let aggregator = DepartureAggregator::new(client, store);

    let info = aggregator
        .get_nearby_departure_info(37.80296, -122.40103, 5000.0, 2)
        .await
        .unwrap();
    assert_eq!(info.stops.len(), 2);
    assert_eq!(info.stops[0].title, FERRY_BUILDING);
    assert_eq!(info.stops[1].title, EMBARCADERO);
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let client = client(FixtureTransport::default(), JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    let loader = ReferenceLoader::new(
        client,
        Arc::clone(&store),
        AgencyFilter::new(["sf-muni"]),
    );

    assert!(loader.ensure_loaded(false).await.unwrap().is_some());
    let first = store.stops().unwrap();

    assert!(loader.ensure_loaded(false).await.unwrap().is_none());
    assert!(loader.ensure_loaded(true).await.unwrap().is_some());

    assert_eq!(store.stops().unwrap(), first);
    assert!(store.has_index().unwrap());
}

#[tokio::test]
async fn test_fail_fast_surfaces_agency_failure() {
    let transport = FixtureTransport {
        failing_agency: Some("actransit".to_string()),
        echo_predictions: true,
        ..FixtureTransport::default()
    };
    let client = client(transport, JoinPolicy::FailFast);
    let mut stops: Vec<Stop> = (0..5).map(|n| stop("sf-muni", n)).collect();
    stops.extend((0..5).map(|n| stop("actransit", n)));

    let err = client.get_predictions(&stops).await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_partial_success_keeps_healthy_agency() {
    let transport = FixtureTransport {
        failing_agency: Some("actransit".to_string()),
        echo_predictions: true,
        ..FixtureTransport::default()
    };
    let client = client(transport, JoinPolicy::PartialSuccess);
    let mut stops: Vec<Stop> = (0..5).map(|n| stop("sf-muni", n)).collect();
    stops.extend((0..5).map(|n| stop("actransit", n)));

    let predictions = client.get_predictions(&stops).await.unwrap();
    assert_eq!(predictions.len(), 5);
    assert!(predictions.iter().all(|p| p.stop_title.starts_with("sf-muni ")));
}

#[tokio::test]
async fn test_chunked_predictions_match_per_chunk_calls() {
    let transport = FixtureTransport {
        echo_predictions: true,
        ..FixtureTransport::default()
    };
    let client = client(transport, JoinPolicy::FailFast);
    let stops: Vec<Stop> = (0..301).map(|n| stop("sf-muni", n)).collect();

    let all = client.get_predictions(&stops).await.unwrap();

    let mut per_chunk = Vec::new();
    for chunk in stops.chunks(150) {
        per_chunk.extend(client.get_predictions(chunk).await.unwrap());
    }

    assert_eq!(all.len(), 301);
    assert_eq!(sorted(all), sorted(per_chunk));
}

#[tokio::test]
async fn test_predictions_request_one_call_per_chunk() {
    let log = CallLog::default();
    let transport = FixtureTransport {
        urls: Arc::clone(&log),
        echo_predictions: true,
        ..FixtureTransport::default()
    };
    let client = client(transport, JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    let stops: Vec<Stop> = (0..301).map(|n| stop("sf-muni", n)).collect();
    store.load_all(&[], &[], &stops).await.unwrap();

    let aggregator = DepartureAggregator::new(client, store);
    let info = aggregator
        .get_nearby_departure_info(37.80, -122.27, 10.0, 500)
        .await
        .unwrap();

    assert_eq!(info.stops.len(), 301);
    assert_eq!(info.predictions.len(), 301);
    assert_eq!(calls(&log, "predictionsForMultiStops"), 3);
}

#[tokio::test]
async fn test_feed_error_document_is_upstream_error() {
    let transport = StaticTransport(
        r#"<body><Error shouldRetry="true">Agency server cannot accept client</Error></body>"#,
    );
    let client = client(transport, JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    let loader = ReferenceLoader::new(client, store, AgencyFilter::all());

    let err = loader.ensure_loaded(false).await.unwrap_err();
    assert_eq!(
        err,
        Error::Feed(FeedError::Upstream {
            message: "Agency server cannot accept client".to_string(),
            should_retry: true,
        })
    );
}

#[tokio::test]
async fn test_missing_predictions_node_is_extraction_error() {
    let client = client(StaticTransport(r#"<body copyright="none"/>"#), JoinPolicy::FailFast);
    let store = Arc::new(MemoryGeoStore::new());
    store.load_all(&[], &[], &[stop("sf-muni", 1)]).await.unwrap();

    let aggregator = DepartureAggregator::new(client, store);
    let err = aggregator
        .get_nearby_departure_info(37.80, -122.27, 100.0, 10)
        .await
        .unwrap_err();
    match err {
        Error::Feed(FeedError::Extraction(e)) => assert_eq!(e.field, "predictions"),
        other => panic!("unexpected error: {other:?}"),
    }
}
