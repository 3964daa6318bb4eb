//! Heuristic pollution score and the optional pre-trained pollution model.
//!
//! The score is a weighted count of non-ok parameters and always exists. The model
//! prediction is extra: when no model is loaded, or inference fails, the report says
//! so through `model_available = false` and analysis carries on.

use crate::error::{ConfigError, ModelError};
use crate::models::{MlInsights, Parameter, ParameterSummary, PollutionLabel, Status};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Weights and label cutoffs for the heuristic score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub warning_weight: f64,
    pub critical_weight: f64,
    /// Scores at or above this are MODERATE.
    pub moderate_cutoff: f64,
    /// Scores at or above this are POLLUTED.
    pub polluted_cutoff: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            warning_weight: 1.0,
            critical_weight: 2.0,
            moderate_cutoff: 2.0,
            polluted_cutoff: 5.0,
        }
    }
}

impl ScoringPolicy {
    /// Rejects policies under which a worsening status could lower the score.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=self.critical_weight).contains(&self.warning_weight) {
            return Err(ConfigError::InvalidPolicy(
                "weights must satisfy 0 <= warning_weight <= critical_weight".to_string(),
            ));
        }
        if self.moderate_cutoff > self.polluted_cutoff {
            return Err(ConfigError::InvalidPolicy(
                "moderate_cutoff must not exceed polluted_cutoff".to_string(),
            ));
        }
        Ok(())
    }

    pub fn weight(&self, status: Status) -> f64 {
        match status {
            Status::Ok => 0.0,
            Status::Warning => self.warning_weight,
            Status::Critical => self.critical_weight,
        }
    }

    pub fn label(&self, score: f64) -> PollutionLabel {
        if score < self.moderate_cutoff {
            PollutionLabel::Good
        } else if score < self.polluted_cutoff {
            PollutionLabel::Moderate
        } else {
            PollutionLabel::Polluted
        }
    }
}

/// Anything that maps a feature vector to a pollution prediction.
pub trait PollutionModel: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError>;
}

/// `intercept + sum(coefficient * feature)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPollutionModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl PollutionModel for LinearPollutionModel {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.coefficients.len() {
            return Err(ModelError::FeatureMismatch {
                expected: self.coefficients.len(),
                actual: features.len(),
            });
        }
        let prediction = self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, f)| c * f)
                .sum::<f64>();
        if prediction.is_finite() {
            Ok(prediction)
        } else {
            Err(ModelError::NonFinite)
        }
    }
}

/// On-disk model format.
#[derive(Debug, Deserialize)]
struct ModelFile {
    features: Vec<String>,
    medians: Vec<f64>,
    coefficients: Vec<f64>,
    intercept: f64,
}

/// A model together with its feature order and imputation medians.
#[derive(Clone)]
pub struct LoadedModel {
    pub features: Vec<Parameter>,
    pub medians: Vec<f64>,
    model: Arc<dyn PollutionModel>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("features", &self.features)
            .field("medians", &self.medians)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    /// Wrap an arbitrary model.
    ///
    /// # Errors
    /// * [`ModelError::FeatureMismatch`] if `medians` does not line up with `features`
    pub fn new(
        features: Vec<Parameter>,
        medians: Vec<f64>,
        model: Arc<dyn PollutionModel>,
    ) -> Result<Self, ModelError> {
        if features.len() != medians.len() {
            return Err(ModelError::FeatureMismatch {
                expected: features.len(),
                actual: medians.len(),
            });
        }
        Ok(Self {
            features,
            medians,
            model,
        })
    }

    /// Load a linear model from its JSON file
    ///
    /// The file lists canonical feature names, one median per feature (used when a
    /// parameter is absent from an upload), one coefficient per feature and an intercept.
    ///
    /// # Arguments
    /// * `path` - Path to the model JSON
    ///
    /// # Returns
    /// * `Result<LoadedModel, ModelError>` - The model, or why it could not be used
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ModelFile = serde_json::from_str(&text).map_err(|e| format_error(path, e.to_string()))?;

        let features = file
            .features
            .iter()
            .map(|name| {
                Parameter::from_name(name)
                    .ok_or_else(|| format_error(path, format!("unknown feature {:?}", name)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if file.medians.len() != features.len() || file.coefficients.len() != features.len() {
            return Err(format_error(
                path,
                "features, medians and coefficients must have the same length".to_string(),
            ));
        }

        let model = LinearPollutionModel {
            coefficients: file.coefficients,
            intercept: file.intercept,
        };
        info!("Loaded pollution model from {} ({} features)", path.display(), features.len());
        Self::new(features, file.medians, Arc::new(model))
    }

    /// Averages in model feature order, with medians for parameters not in the upload.
    pub fn feature_vector(&self, summaries: &[ParameterSummary]) -> Vec<f64> {
        self.features
            .iter()
            .zip(&self.medians)
            .map(|(parameter, median)| {
                summaries
                    .iter()
                    .find(|s| s.parameter == *parameter)
                    .map_or(*median, |s| s.average)
            })
            .collect()
    }

    pub fn predict(&self, summaries: &[ParameterSummary]) -> Result<f64, ModelError> {
        self.model.predict(&self.feature_vector(summaries))
    }
}

fn format_error(path: &Path, reason: String) -> ModelError {
    ModelError::Format {
        path: PathBuf::from(path),
        reason,
    }
}

/// Score a set of parameter summaries
///
/// # Arguments
/// * `summaries` - Evaluated parameters of one upload
/// * `model` - Optional pre-trained model
/// * `policy` - Weights and label cutoffs
///
/// # Returns
/// * `MlInsights` - with an empty forecast set; the pipeline attaches forecasts
pub fn score(
    summaries: &[ParameterSummary],
    model: Option<&LoadedModel>,
    policy: &ScoringPolicy,
) -> MlInsights {
    let pollution_score: f64 = summaries.iter().map(|s| policy.weight(s.status)).sum();

    let pollution_prediction = model.and_then(|model| match model.predict(summaries) {
        Ok(prediction) => Some(prediction),
        Err(e) => {
            warn!("Pollution model inference failed: {}", e);
            None
        }
    });

    MlInsights {
        pollution_prediction,
        pollution_score,
        pollution_label: policy.label(pollution_score),
        forecasts: Default::default(),
        model_available: pollution_prediction.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn summary(parameter: Parameter, average: f64, status: Status) -> ParameterSummary {
        ParameterSummary {
            parameter,
            unit: String::new(),
            average,
            minimum: average,
            maximum: average,
            status,
            directive: (status != Status::Ok).then(|| "act".to_string()),
        }
    }

    #[test]
    fn labels_follow_cutoffs() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.label(0.0), PollutionLabel::Good);
        assert_eq!(policy.label(1.0), PollutionLabel::Good);
        assert_eq!(policy.label(2.0), PollutionLabel::Moderate);
        assert_eq!(policy.label(4.0), PollutionLabel::Moderate);
        assert_eq!(policy.label(5.0), PollutionLabel::Polluted);
    }

    #[test]
    fn score_never_drops_when_a_status_worsens() {
        let policy = ScoringPolicy::default();
        let statuses = [Status::Ok, Status::Warning, Status::Critical];
        for other in statuses {
            let mut previous = f64::NEG_INFINITY;
            for status in statuses {
                let summaries = [
                    summary(Parameter::Ph, 7.0, status),
                    summary(Parameter::Tds, 300.0, other),
                ];
                let insights = score(&summaries, None, &policy);
                assert!(insights.pollution_score >= previous);
                previous = insights.pollution_score;
            }
        }
    }

    #[test]
    fn scores_without_model_report_unavailable() {
        let summaries = [
            summary(Parameter::Ph, 9.0, Status::Critical),
            summary(Parameter::Turbidity, 5.5, Status::Warning),
            summary(Parameter::DissolvedOxygen, 6.0, Status::Ok),
        ];
        let insights = score(&summaries, None, &ScoringPolicy::default());
        assert_eq!(insights.pollution_score, 3.0);
        assert_eq!(insights.pollution_label, PollutionLabel::Moderate);
        assert_eq!(insights.pollution_prediction, None);
        assert!(!insights.model_available);
        assert!(insights.forecasts.is_empty());
    }

    #[test]
    fn missing_features_are_imputed_with_medians() {
        let model = LoadedModel::new(
            vec![Parameter::Ph, Parameter::Tds],
            vec![7.0, 250.0],
            Arc::new(LinearPollutionModel {
                coefficients: vec![1.0, 0.01],
                intercept: 0.5,
            }),
        )
        .unwrap();
        let summaries = [summary(Parameter::Ph, 8.0, Status::Ok)];
        assert_eq!(model.feature_vector(&summaries), vec![8.0, 250.0]);

        let insights = score(&summaries, Some(&model), &ScoringPolicy::default());
        assert!(insights.model_available);
        assert!((insights.pollution_prediction.unwrap() - 11.0).abs() < 1e-9);
    }

    struct FailingModel;

    impl PollutionModel for FailingModel {
        fn predict(&self, _features: &[f64]) -> Result<f64, ModelError> {
            Err(ModelError::NonFinite)
        }
    }

    #[test]
    fn failing_inference_degrades_gracefully() {
        let model = LoadedModel::new(vec![Parameter::Ph], vec![7.0], Arc::new(FailingModel)).unwrap();
        let summaries = [summary(Parameter::Ph, 9.5, Status::Critical)];
        let insights = score(&summaries, Some(&model), &ScoringPolicy::default());
        assert!(!insights.model_available);
        assert_eq!(insights.pollution_prediction, None);
        assert_eq!(insights.pollution_score, 2.0);
    }

    #[test]
    fn loads_model_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"features": ["pH", "DO"], "medians": [7.2, 6.5], "coefficients": [0.5, -0.2], "intercept": 1.0}}"#
        )
        .unwrap();
        let model = LoadedModel::load(file.path()).unwrap();
        assert_eq!(model.features, vec![Parameter::Ph, Parameter::DissolvedOxygen]);
        assert!((model.predict(&[]).unwrap() - (1.0 + 3.6 - 1.3)).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_model_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"features": ["pH", "Salinity"], "medians": [7.0, 1.0], "coefficients": [1.0, 1.0], "intercept": 0.0}}"#
        )
        .unwrap();
        assert!(matches!(
            LoadedModel::load(file.path()),
            Err(ModelError::Format { .. })
        ));
        assert!(matches!(
            LoadedModel::load(Path::new("/nonexistent/model.json")),
            Err(ModelError::Io { .. })
        ));
    }

    #[test]
    fn policy_validation_rejects_inverted_weights() {
        let policy = ScoringPolicy {
            warning_weight: 3.0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(ScoringPolicy::default().validate().is_ok());
    }
}
