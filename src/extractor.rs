//! Turns a [`RawDataset`] into clean, time-ordered [`ParameterSeries`].
//!
//! Steps, in order: locate the timestamp column, parse and gap-fill timestamps (or
//! synthesize daily ones), map the remaining headers onto canonical parameters,
//! stable-sort rows by time and forward-fill missing numeric readings.

use crate::error::AnalysisError;
use crate::models::{ParameterPoint, ParameterSeries, RawCell, RawDataset};
use crate::parameters::resolve_column;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use std::collections::HashSet;

/// Header names (compared case-insensitively) that mark the timestamp column.
pub const TIMESTAMP_ALIASES: [&str; 6] = ["timestamp", "time", "date", "datetime", "date/time", "sampletime"];

const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

// Day-first for slashed dates.
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Extract parameter series using the current time for synthesized timestamps.
pub fn extract(dataset: &RawDataset) -> Result<Vec<ParameterSeries>, AnalysisError> {
    extract_at(dataset, Utc::now().naive_utc())
}

/// Extract parameter series from a raw dataset
///
/// When no usable timestamp column exists, rows get one-day-apart timestamps
/// ending at `now`, in row order.
///
/// # Arguments
/// * `dataset` - The loaded upload
/// * `now` - Anchor for synthesized timestamps
///
/// # Returns
/// * `Result<Vec<ParameterSeries>, AnalysisError>` - One series per recognized column,
///   in column order
///
/// # Errors
/// * [`AnalysisError::NoRecognizedParameters`] if there are no rows or no column
///   resolves to a parameter with at least one numeric reading
pub fn extract_at(
    dataset: &RawDataset,
    now: NaiveDateTime,
) -> Result<Vec<ParameterSeries>, AnalysisError> {
    if dataset.is_empty() {
        return Err(AnalysisError::NoRecognizedParameters);
    }

    let parsed = find_timestamp_column(dataset).map(|col| (col, parse_column(dataset, col)));
    let first_parsed = parsed
        .as_ref()
        .and_then(|(_, stamps)| stamps.iter().flatten().next().copied());
    let (timestamps, consumed) = match (parsed, first_parsed) {
        (Some((col, stamps)), Some(first)) => (fill_gaps(stamps, first), Some(col)),
        _ => {
            debug!("No parseable timestamp column; synthesizing daily timestamps");
            (synthesize(dataset.len(), now), None)
        }
    };

    let mut order: Vec<usize> = (0..dataset.len()).collect();
    order.sort_by_key(|&row| timestamps[row]);

    let mut seen = HashSet::new();
    let mut series = Vec::new();
    for (col, header) in dataset.columns.iter().enumerate() {
        if Some(col) == consumed {
            continue;
        }
        let Some(parameter) = resolve_column(header) else {
            continue;
        };
        if seen.contains(&parameter) {
            debug!("Ignoring duplicate column {:?} for {}", header, parameter);
            continue;
        }
        match column_points(dataset, col, &order, &timestamps) {
            Some(points) => {
                seen.insert(parameter);
                series.push(ParameterSeries { parameter, points });
            }
            None => debug!("Column {:?} has no numeric readings; skipped", header),
        }
    }

    if series.is_empty() {
        return Err(AnalysisError::NoRecognizedParameters);
    }
    Ok(series)
}

/// A column named like a timestamp, else the first column when it is not a parameter.
fn find_timestamp_column(dataset: &RawDataset) -> Option<usize> {
    let named = dataset.columns.iter().position(|header| {
        let header = header.trim().to_lowercase();
        TIMESTAMP_ALIASES.contains(&header.as_str())
    });
    named.or_else(|| {
        dataset
            .columns
            .first()
            .filter(|header| resolve_column(header).is_none())
            .map(|_| 0)
    })
}

fn parse_column(dataset: &RawDataset, col: usize) -> Vec<Option<NaiveDateTime>> {
    (0..dataset.len())
        .map(|row| parse_timestamp(dataset.cell(row, col)))
        .collect()
}

/// Parse a cell as a timestamp. Bare numbers are never treated as dates.
pub fn parse_timestamp(cell: &RawCell) -> Option<NaiveDateTime> {
    let RawCell::Text(text) = cell else {
        return None;
    };
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Forward-fill; cells before the first parsed timestamp take `first`.
fn fill_gaps(parsed: Vec<Option<NaiveDateTime>>, first: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut last = first;
    parsed
        .into_iter()
        .map(|ts| {
            if let Some(ts) = ts {
                last = ts;
            }
            last
        })
        .collect()
}

fn synthesize(rows: usize, now: NaiveDateTime) -> Vec<NaiveDateTime> {
    (0..rows)
        .map(|row| now - Duration::days((rows - 1 - row) as i64))
        .collect()
}

/// Numeric values in time order with forward fill; leading gaps become 0.
fn column_points(
    dataset: &RawDataset,
    col: usize,
    order: &[usize],
    timestamps: &[NaiveDateTime],
) -> Option<Vec<ParameterPoint>> {
    let mut any_valid = false;
    let mut last = 0.0;
    let points = order
        .iter()
        .map(|&row| {
            let reading = dataset.cell(row, col).as_number();
            if let Some(value) = reading {
                any_valid = true;
                last = value;
            }
            ParameterPoint {
                timestamp: timestamps[row],
                value: last,
                filled: reading.is_none(),
            }
        })
        .collect();
    any_valid.then_some(points)
}
