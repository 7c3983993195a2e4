//! Output formatting for departure results.
//!
//! Supports JSON for machines and a plain departure board for terminals. The
//! board groups predictions under their stop, in the stop order returned by
//! the query (nearest first).

use std::io::Write;

use anyhow::Result;
use tracing::debug;

use crate::model::{DepartureInfo, Prediction};

/// Logs the result using Rust's debug pretty-print format.
pub fn print_pretty(info: &DepartureInfo) {
    debug!("{:#?}", info);
}

/// Writes the result as pretty-printed JSON.
pub fn write_json<W: Write>(mut writer: W, info: &DepartureInfo) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, info)?;
    writeln!(writer)?;
    Ok(())
}

/// One line per stop title, followed by one line per route and direction with
/// the upcoming departures in minutes.
pub fn render_board(info: &DepartureInfo) -> String {
    let mut board = String::new();
    let mut seen = Vec::new();

    for stop in &info.stops {
        if seen.contains(&stop.title.as_str()) {
            continue;
        }
        seen.push(stop.title.as_str());

        board.push_str(&stop.title);
        board.push('\n');

        let predictions: Vec<&Prediction> = info
            .predictions
            .iter()
            .filter(|p| p.stop_title == stop.title)
            .collect();
        if predictions.is_empty() {
            board.push_str("  no departures\n");
            continue;
        }

        for prediction in predictions {
            for direction in &prediction.directions {
                let minutes: Vec<String> = direction
                    .seconds
                    .iter()
                    .filter(|s| **s >= 0)
                    .map(|s| (s / 60).to_string())
                    .collect();
                let minutes = if minutes.is_empty() {
                    "-".to_string()
                } else {
                    minutes.join(", ")
                };
                board.push_str(&format!(
                    "  {} {}: {} min\n",
                    prediction.route_title, direction.title, minutes
                ));
            }
        }
    }

    board
}
