//! Short-horizon linear-trend forecasts.
//!
//! Each series is fitted with ordinary least squares against its sample index
//! (0..n), not wall-clock time, and extrapolated a fixed number of steps.

use crate::models::{ForecastSet, ParameterSeries};

/// Number of future steps in every forecast.
pub const DEFAULT_HORIZON: usize = 3;

/// Fitted line `value = intercept + slope * index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTrend {
    pub intercept: f64,
    pub slope: f64,
    observations: usize,
}

impl LinearTrend {
    /// Fit a line through `values` indexed 0..n
    ///
    /// # Returns
    /// * `Option<LinearTrend>` - `None` with fewer than two values; a flat line
    ///   when every value is identical
    pub fn fit(values: &[f64]) -> Option<Self> {
        if values.len() < 2 {
            return None;
        }
        let observations = values.len();
        let first = values[0];
        if values.iter().all(|v| *v == first) {
            return Some(Self {
                intercept: first,
                slope: 0.0,
                observations,
            });
        }

        let n = observations as f64;
        let (mut sum_t, mut sum_v, mut sum_tv, mut sum_tt) = (0.0, 0.0, 0.0, 0.0);
        for (t, v) in values.iter().enumerate() {
            let t = t as f64;
            sum_t += t;
            sum_v += v;
            sum_tv += t * v;
            sum_tt += t * t;
        }

        let denominator = n * sum_tt - sum_t * sum_t;
        if denominator.abs() < f64::EPSILON {
            return None;
        }
        let slope = (n * sum_tv - sum_t * sum_v) / denominator;
        let intercept = (sum_v - slope * sum_t) / n;
        (slope.is_finite() && intercept.is_finite()).then_some(Self {
            intercept,
            slope,
            observations,
        })
    }

    pub fn predict_at(&self, index: f64) -> f64 {
        self.intercept + self.slope * index
    }

    /// Values at indices n, n+1, ..., n+horizon-1.
    pub fn extrapolate(&self, horizon: usize) -> Vec<f64> {
        (0..horizon)
            .map(|step| self.predict_at((self.observations + step) as f64))
            .collect()
    }
}

/// Forecast the next `horizon` values of a series
///
/// Only values read from the upload are fitted; forward-filled and defaulted points
/// are ignored. Unclamped; `None` below two readings.
pub fn forecast(series: &ParameterSeries, horizon: usize) -> Option<Vec<f64>> {
    LinearTrend::fit(&series.readings()).map(|trend| trend.extrapolate(horizon))
}

/// Forecasts for every series with at least two readings, keyed by parameter name.
pub fn forecast_all(series: &[ParameterSeries], horizon: usize) -> ForecastSet {
    series
        .iter()
        .filter_map(|s| forecast(s, horizon).map(|values| (s.parameter.name().to_string(), values)))
        .collect()
}
