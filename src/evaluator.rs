//! Per-parameter statistics and ok/warning/critical classification.

use crate::error::ConfigError;
use crate::models::{ParameterSeries, ParameterSummary, Status, round3};
use crate::parameters::{Direction, ParameterLimits, ThresholdTable};
use serde::{Deserialize, Serialize};

/// How far the average may stray past a bound before the breach becomes critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPolicy {
    /// Fraction of the bound, e.g. `0.2` makes an average above `max * 1.2` critical.
    pub average_margin: f64,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            average_margin: 0.2,
        }
    }
}

impl StatusPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.average_margin.is_finite() || self.average_margin < 0.0 {
            return Err(ConfigError::InvalidPolicy(
                "average_margin must be a finite number >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summarize a series against its safe range
///
/// A parameter is critical when its average breaches a bound by more than the policy
/// margin, or when any single reading reaches a critical limit. Any other breach of the
/// average is a warning. Statistics are rounded to three decimals after classification.
///
/// # Arguments
/// * `series` - The cleaned series for one parameter
/// * `table` - Safe ranges and directives
/// * `policy` - Critical margin for averages
///
/// # Returns
/// * `ParameterSummary` - with `directive` present exactly when `status` is not ok
pub fn evaluate(series: &ParameterSeries, table: &ThresholdTable, policy: &StatusPolicy) -> ParameterSummary {
    let values = series.values();
    let (average, minimum, maximum) = statistics(&values);

    let (status, directive) = match table.get(series.parameter) {
        Some(limits) => match classify(limits, &values, average, policy) {
            Some((status, direction)) => (status, Some(limits.directive(series.parameter, direction))),
            None => (Status::Ok, None),
        },
        None => (Status::Ok, None),
    };

    ParameterSummary {
        parameter: series.parameter,
        unit: table.unit(series.parameter).to_string(),
        average: round3(average),
        minimum: round3(minimum),
        maximum: round3(maximum),
        status,
        directive,
    }
}

fn statistics(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let sum: f64 = values.iter().sum();
    let minimum = values.iter().copied().fold(f64::INFINITY, f64::min);
    let maximum = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (sum / values.len() as f64, minimum, maximum)
}

/// Worst finding, or `None` when the parameter is within range.
///
/// Findings are checked in order (average high, average low, reading high, reading
/// low); a later finding only replaces an earlier one when it is more severe.
fn classify(
    limits: &ParameterLimits,
    values: &[f64],
    average: f64,
    policy: &StatusPolicy,
) -> Option<(Status, Direction)> {
    let mut findings = Vec::new();

    if let Some(max) = limits.max {
        if average > max {
            let status = if average > max + policy.average_margin * max.abs() {
                Status::Critical
            } else {
                Status::Warning
            };
            findings.push((status, Direction::High));
        }
    }
    if let Some(min) = limits.min {
        if average < min {
            let status = if average < min - policy.average_margin * min.abs() {
                Status::Critical
            } else {
                Status::Warning
            };
            findings.push((status, Direction::Low));
        }
    }
    if let Some(critical_max) = limits.critical_max() {
        if values.iter().any(|v| *v >= critical_max) {
            findings.push((Status::Critical, Direction::High));
        }
    }
    if let Some(critical_min) = limits.critical_min() {
        if values.iter().any(|v| *v <= critical_min) {
            findings.push((Status::Critical, Direction::Low));
        }
    }

    findings
        .into_iter()
        .fold(None, |worst: Option<(Status, Direction)>, finding| match worst {
            Some(current) if current.0 >= finding.0 => Some(current),
            _ => Some(finding),
        })
}
