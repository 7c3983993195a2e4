//! CLI entry point for nearby departures.
//!
//! Loads reference data from the feed into an in-process geo store and
//! answers "what leaves near here" for a coordinate and radius.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use nearby_departures::{
    client::FeedClient,
    config::FeedSettings,
    departures::DepartureAggregator,
    fetch::{BasicClient, HttpTransport},
    loader::ReferenceLoader,
    output::{print_pretty, render_board, write_json},
    store::MemoryGeoStore,
};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "nearby_departures")]
#[command(about = "Live transit departures near a coordinate", long_about = None)]
struct Cli {
    #[command(flatten)]
    feed: FeedSettings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List agencies offered by the feed
    Agencies,
    /// Load reference data (agencies, routes, stops) and report what was loaded
    Load,
    /// Show departures from stops near a coordinate
    Nearby {
        /// Latitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Search radius in meters
        #[arg(long)]
        dist: f64,

        /// Maximum number of stops
        #[arg(short, long, default_value_t = 100)]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Board,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/nearby_departures.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("nearby_departures.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let http = BasicClient::with_timeouts(cli.feed.connect_timeout(), cli.feed.request_timeout())?;
    let client = FeedClient::new(HttpTransport::new(http), cli.feed.client_options())?;
    let store = Arc::new(MemoryGeoStore::new());
    let loader = ReferenceLoader::new(client.clone(), Arc::clone(&store), cli.feed.agency_filter());

    match cli.command {
        Commands::Agencies => {
            let agencies = client.get_agencies().await?;
            info!(total = agencies.len(), "Agency list fetched");
            for agency in &agencies {
                println!("{}\t{}", agency.tag, agency.title);
            }
        }
        Commands::Load => {
            let summary = loader.reload().await?;
            info!(
                agencies = summary.agencies,
                routes = summary.routes,
                stops = summary.stops,
                "Load summary"
            );
        }
        Commands::Nearby {
            lat,
            lon,
            dist,
            limit,
            format,
        } => {
            if !lat.is_finite() || !lon.is_finite() || !dist.is_finite() {
                anyhow::bail!("lat, lon and dist must be finite numbers");
            }

            loader.ensure_loaded(false).await?;

            let aggregator = DepartureAggregator::new(client, store);
            let departures = aggregator
                .get_nearby_departure_info(lat, lon, dist, limit)
                .await?;
            print_pretty(&departures);

            match format {
                Format::Json => write_json(std::io::stdout().lock(), &departures)?,
                Format::Board => print!("{}", render_board(&departures)),
            }
        }
    }

    Ok(())
}
