//! Data model shared by the analysis pipeline, the report store and the HTTP layer.
//!
//! Raw uploads are represented as a [`RawDataset`]; everything downstream of the
//! extractor works on canonical [`Parameter`]s. An [`UploadReport`] is immutable once
//! assembled and is handed out behind an `Arc`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wall-clock format used for series points in JSON and in exported files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single cell as read from a CSV, spreadsheet or PDF table.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Number(f64),
    Text(String),
}

impl RawCell {
    /// Builds a cell from text, mapping blank strings to [`RawCell::Empty`].
    pub fn from_text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            RawCell::Empty
        } else {
            RawCell::Text(trimmed.to_string())
        }
    }

    /// Numeric value of the cell, if it holds a finite number.
    ///
    /// Text cells are parsed strictly (after trimming); anything else counts as missing.
    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            RawCell::Number(n) => *n,
            RawCell::Text(s) => s.trim().parse::<f64>().ok()?,
            RawCell::Empty => return None,
        };
        value.is_finite().then_some(value)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RawCell::Empty)
    }
}

/// Rows x named columns, in upload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

impl RawDataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut row: Vec<RawCell>) {
        row.resize(self.columns.len(), RawCell::Empty);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, col: usize) -> &RawCell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .unwrap_or(&RawCell::Empty)
    }
}

/// Canonical water-quality parameters the service knows how to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "pH")]
    Ph,
    Turbidity,
    #[serde(rename = "DO")]
    DissolvedOxygen,
    #[serde(rename = "TDS")]
    Tds,
    Iron,
    Chlorine,
    #[serde(rename = "BOD")]
    Bod,
    #[serde(rename = "COD")]
    Cod,
}

impl Parameter {
    pub const ALL: [Parameter; 8] = [
        Parameter::Ph,
        Parameter::Turbidity,
        Parameter::DissolvedOxygen,
        Parameter::Tds,
        Parameter::Iron,
        Parameter::Chlorine,
        Parameter::Bod,
        Parameter::Cod,
    ];

    /// Display name, also used as the key in JSON maps.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Ph => "pH",
            Parameter::Turbidity => "Turbidity",
            Parameter::DissolvedOxygen => "DO",
            Parameter::Tds => "TDS",
            Parameter::Iron => "Iron",
            Parameter::Chlorine => "Chlorine",
            Parameter::Bod => "BOD",
            Parameter::Cod => "COD",
        }
    }

    /// Lowercase identifier used in alert ids.
    pub fn slug(self) -> &'static str {
        match self {
            Parameter::Ph => "ph",
            Parameter::Turbidity => "turbidity",
            Parameter::DissolvedOxygen => "do",
            Parameter::Tds => "tds",
            Parameter::Iron => "iron",
            Parameter::Chlorine => "chlorine",
            Parameter::Bod => "bod",
            Parameter::Cod => "cod",
        }
    }

    /// Case-insensitive lookup by canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Parameter::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serde adapter for `NaiveDateTime` using [`TIMESTAMP_FORMAT`].
pub mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPoint {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub value: f64,
    /// True when `value` was carried forward or defaulted rather than read.
    #[serde(default)]
    pub filled: bool,
}

/// One recognized column, time-ordered, with gaps already filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSeries {
    pub parameter: Parameter,
    pub points: Vec<ParameterPoint>,
}

impl ParameterSeries {
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Only the values that were actually read, in time order.
    pub fn readings(&self) -> Vec<f64> {
        self.points
            .iter()
            .filter(|p| !p.filled)
            .map(|p| p.value)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warning,
    Critical,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub parameter: Parameter,
    pub unit: String,
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub status: Status,
    /// Corrective action; present exactly when `status` is not ok.
    pub directive: Option<String>,
}

/// Forecasted values keyed by canonical parameter name.
pub type ForecastSet = BTreeMap<String, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollutionLabel {
    Good,
    Moderate,
    Polluted,
}

impl PollutionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            PollutionLabel::Good => "GOOD",
            PollutionLabel::Moderate => "MODERATE",
            PollutionLabel::Polluted => "POLLUTED",
        }
    }
}

impl fmt::Display for PollutionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlInsights {
    pub pollution_prediction: Option<f64>,
    pub pollution_score: f64,
    pub pollution_label: PollutionLabel,
    pub forecasts: ForecastSet,
    pub model_available: bool,
}

impl MlInsights {
    pub fn with_forecasts(mut self, forecasts: ForecastSet) -> Self {
        self.forecasts = forecasts;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl From<Status> for Severity {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => Severity::Info,
            Status::Warning => Severity::Warning,
            Status::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Colour of the site marker on the dashboard map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStatus {
    Good,
    Warning,
    Poor,
}

impl MapStatus {
    /// Worst parameter status wins.
    pub fn from_summaries(summaries: &[ParameterSummary]) -> Self {
        match summaries.iter().map(|s| s.status).max() {
            Some(Status::Critical) => MapStatus::Poor,
            Some(Status::Warning) => MapStatus::Warning,
            _ => MapStatus::Good,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub id: String,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
    pub source_filename: Option<String>,
    pub parameters: Vec<ParameterSummary>,
    pub timeseries: Vec<ParameterSeries>,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
    pub map_status: MapStatus,
    pub ml_insights: Option<MlInsights>,
}

/// Rounds to three decimals for presentation.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
