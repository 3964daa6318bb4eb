//! End-to-end analysis: bytes in, [`UploadReport`] out.
//!
//! ```text
//! load_dataset -> extract -> evaluate (per series) -> forecast_all -> score -> assemble
//! ```
//!
//! An [`Analyzer`] is immutable after construction and safe to share between
//! request handlers.

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, ConfigError};
use crate::evaluator::{StatusPolicy, evaluate};
use crate::extractor::extract;
use crate::forecast::{DEFAULT_HORIZON, forecast_all};
use crate::loader::load_dataset;
use crate::models::{ParameterSummary, RawDataset, UploadReport};
use crate::parameters::ThresholdTable;
use crate::report::{ReportParts, assemble};
use crate::scoring::{LoadedModel, ScoringPolicy, score};
use log::{info, warn};
use std::path::Path;

/// Tables, policies and the optional model used for every upload.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    thresholds: ThresholdTable,
    status_policy: StatusPolicy,
    scoring_policy: ScoringPolicy,
    model: Option<LoadedModel>,
}

impl Analyzer {
    /// Build an analyzer from an analysis config, without a model.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ConfigError> {
        config.status.validate()?;
        config.scoring.validate()?;
        Ok(Self {
            thresholds: ThresholdTable::with_overrides(&config.thresholds)?,
            status_policy: config.status,
            scoring_policy: config.scoring,
            model: None,
        })
    }

    /// Build an analyzer the way the server and CLI do
    ///
    /// Reads the optional analysis config file and tries to load the model. A model that
    /// cannot be loaded is logged and skipped; a broken analysis config is an error.
    ///
    /// # Arguments
    /// * `analysis_config` - Optional JSON file with threshold and policy overrides
    /// * `model_path` - Where the pre-trained model is expected
    pub fn bootstrap(analysis_config: Option<&Path>, model_path: &Path) -> Result<Self, ConfigError> {
        let config = match analysis_config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        let model = match LoadedModel::load(model_path) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("ML predictions disabled: {}", e);
                None
            }
        };
        Ok(Self::from_config(&config)?.with_model(model))
    }

    pub fn with_model(mut self, model: Option<LoadedModel>) -> Self {
        self.model = model;
        self
    }

    pub fn model(&self) -> Option<&LoadedModel> {
        self.model.as_ref()
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Analyze an uploaded file
    ///
    /// # Arguments
    /// * `contents` - Raw upload bytes
    /// * `filename` - Client file name; picks the parser and is recorded on the report
    /// * `uploaded_by` - Username of the uploader
    ///
    /// # Returns
    /// * `Result<UploadReport, AnalysisError>` - The report; nothing is stored here
    ///
    /// # Examples
    /// ```
    /// use wqam::pipeline::Analyzer;
    ///
    /// let csv = b"timestamp,pH\n2024-01-01,7.1\n2024-01-02,7.3\n";
    /// let report = Analyzer::default().analyze(csv, Some("lab.csv"), "operator").unwrap();
    /// assert_eq!(report.parameters.len(), 1);
    /// assert_eq!(report.uploaded_by, "operator");
    /// ```
    pub fn analyze(
        &self,
        contents: &[u8],
        filename: Option<&str>,
        uploaded_by: &str,
    ) -> Result<UploadReport, AnalysisError> {
        let dataset = load_dataset(contents, filename)?;
        self.analyze_dataset(&dataset, filename, uploaded_by)
    }

    /// Analyze an already loaded dataset.
    pub fn analyze_dataset(
        &self,
        dataset: &RawDataset,
        filename: Option<&str>,
        uploaded_by: &str,
    ) -> Result<UploadReport, AnalysisError> {
        let series = extract(dataset)?;
        let summaries: Vec<ParameterSummary> = series
            .iter()
            .map(|s| evaluate(s, &self.thresholds, &self.status_policy))
            .collect();
        let forecasts = forecast_all(&series, DEFAULT_HORIZON);
        let insights = score(&summaries, self.model.as_ref(), &self.scoring_policy);

        let report = assemble(
            ReportParts {
                series,
                summaries,
                forecasts,
                insights: Some(insights),
                source_filename: filename.map(str::to_string),
                uploaded_by: uploaded_by.to_string(),
            },
            &self.thresholds,
        );
        info!(
            "Analyzed {} for {}: {} parameters, {} alerts, label {}",
            filename.unwrap_or("<unnamed upload>"),
            uploaded_by,
            report.parameters.len(),
            report.alerts.len(),
            report
                .ml_insights
                .as_ref()
                .map_or("n/a", |insights| insights.pollution_label.as_str())
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MapStatus, Parameter, PollutionLabel, Status};

    const SCENARIO_A: &str =
        "timestamp,pH,Turbidity\n2024-01-01,7.2,1.5\n2024-01-02,7.3,1.6\n2024-01-03,9.0,1.4\n";

    #[test]
    fn scenario_a_flags_ph_spike() {
        let report = Analyzer::default()
            .analyze(SCENARIO_A.as_bytes(), Some("readings.csv"), "alice")
            .unwrap();

        let ph = &report.parameters[0];
        assert_eq!(ph.parameter, Parameter::Ph);
        assert_eq!(ph.status, Status::Critical);
        assert_eq!(ph.average, 7.833);

        let turbidity = &report.parameters[1];
        assert_eq!(turbidity.parameter, Parameter::Turbidity);
        assert_eq!(turbidity.status, Status::Ok);
        assert_eq!(turbidity.average, 1.5);
        assert_eq!(turbidity.directive, None);

        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.map_status, MapStatus::Poor);
        let insights = report.ml_insights.as_ref().unwrap();
        assert_eq!(insights.pollution_score, 2.0);
        assert_eq!(insights.pollution_label, PollutionLabel::Moderate);
        assert!(!insights.model_available);
        assert_eq!(insights.forecasts["pH"].len(), 3);
        assert_eq!(insights.forecasts["Turbidity"].len(), 3);
        assert_eq!(report.source_filename.as_deref(), Some("readings.csv"));
    }

    #[test]
    fn scenario_b_forward_fills_dissolved_oxygen() {
        let csv = "timestamp,DO\n2024-01-01,6.0\n2024-01-02,N/A\n2024-01-03,6.4\n";
        let report = Analyzer::default().analyze(csv.as_bytes(), Some("do.csv"), "bob").unwrap();
        assert_eq!(report.timeseries[0].values(), vec![6.0, 6.0, 6.4]);
        assert_eq!(report.parameters[0].average, 6.133);
        assert_eq!(report.parameters[0].status, Status::Ok);
    }

    #[test]
    fn forecasts_use_only_real_readings() {
        let analyzer = Analyzer::default();

        let single = analyzer
            .analyze(b"timestamp,pH\n2024-01-01,7.0\n2024-01-02,\n2024-01-03,\n", None, "dana")
            .unwrap();
        let insights = single.ml_insights.as_ref().unwrap();
        assert!(!insights.forecasts.contains_key("pH"));
        assert_eq!(single.timeseries[0].values(), vec![7.0, 7.0, 7.0]);

        let leading_gap = analyzer
            .analyze(
                b"timestamp,pH\n2024-01-01,\n2024-01-02,\n2024-01-03,7.0\n2024-01-04,7.0\n",
                None,
                "dana",
            )
            .unwrap();
        let insights = leading_gap.ml_insights.as_ref().unwrap();
        assert_eq!(insights.forecasts["pH"], vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn scenario_c_rejects_uploads_without_parameters() {
        let result = Analyzer::default().analyze(b"notes\nlooks fine\n", Some("notes.csv"), "carol");
        assert!(matches!(result, Err(AnalysisError::NoRecognizedParameters)));
    }

    #[test]
    fn reanalysis_differs_only_in_identity() {
        let analyzer = Analyzer::default();
        let mut first = analyzer.analyze(SCENARIO_A.as_bytes(), Some("a.csv"), "alice").unwrap();
        let second = analyzer.analyze(SCENARIO_A.as_bytes(), Some("a.csv"), "alice").unwrap();
        assert_ne!(first.id, second.id);

        for alert in &mut first.alerts {
            alert.id = alert.id.replace(&first.id, &second.id);
            alert.timestamp = second.created_at;
        }
        first.id = second.id.clone();
        first.created_at = second.created_at;
        assert_eq!(first, second);
    }

    #[test]
    fn config_overrides_change_classification() {
        let config: AnalysisConfig = serde_json::from_str(
            r#"{"thresholds": {"Turbidity": {"unit": "NTU", "max": 1.0}}, "scoring": {"polluted_cutoff": 2.0}}"#,
        )
        .unwrap();
        let analyzer = Analyzer::from_config(&config).unwrap();
        let report = analyzer.analyze(SCENARIO_A.as_bytes(), None, "alice").unwrap();
        assert_eq!(report.parameters[1].status, Status::Critical);
        assert_eq!(
            report.ml_insights.unwrap().pollution_label,
            PollutionLabel::Polluted
        );
    }

    #[test]
    fn negative_average_margin_is_rejected() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"status": {"average_margin": -0.5}}"#).unwrap();
        assert!(matches!(
            Analyzer::from_config(&config),
            Err(ConfigError::InvalidPolicy(_))
        ));
    }
}
