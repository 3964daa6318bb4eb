//! Builds the final [`UploadReport`] from the pipeline's intermediate results.

use crate::models::{
    Alert, ForecastSet, MapStatus, MlInsights, ParameterSeries, ParameterSummary, PollutionLabel,
    Severity, Status, UploadReport,
};
use crate::parameters::{ThresholdTable, with_unit};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const ALL_CLEAR: &str = "All monitored parameters fall within the configured guardrails.";
pub const POLLUTED_ADVISORY: &str =
    "Immediate action required: water quality is below acceptable standards.";
pub const MODERATE_ADVISORY: &str =
    "Monitor closely: water quality is approaching threshold limits.";

/// Identity of a report: the only parts that differ between two assemblies of the same input.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportStamp {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl ReportStamp {
    pub fn now() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Everything the assembler needs besides the stamp.
#[derive(Debug, Clone)]
pub struct ReportParts {
    pub series: Vec<ParameterSeries>,
    pub summaries: Vec<ParameterSummary>,
    pub forecasts: ForecastSet,
    pub insights: Option<MlInsights>,
    pub source_filename: Option<String>,
    pub uploaded_by: String,
}

/// Assemble a report with a fresh id and creation time.
pub fn assemble(parts: ReportParts, table: &ThresholdTable) -> UploadReport {
    assemble_with(ReportStamp::now(), parts, table)
}

/// Assemble a report
///
/// Alerts are produced once per non-ok parameter, recommendations once per distinct
/// sentence in order of first appearance, followed by the label advisory. With
/// nothing to fix the recommendations are the single all-clear sentence.
///
/// # Arguments
/// * `stamp` - Report id and creation time
/// * `parts` - Series, summaries, forecasts and insights from the pipeline
/// * `table` - Source of recommendation sentences and safe ranges
///
/// # Returns
/// * `UploadReport` - fully determined by its arguments
pub fn assemble_with(stamp: ReportStamp, parts: ReportParts, table: &ThresholdTable) -> UploadReport {
    let alerts = build_alerts(&stamp, &parts.summaries, table);
    let label = parts.insights.as_ref().map(|insights| insights.pollution_label);
    let recommendations = build_recommendations(&parts.summaries, label, table);
    let map_status = MapStatus::from_summaries(&parts.summaries);
    let ml_insights = parts
        .insights
        .map(|insights| insights.with_forecasts(parts.forecasts));

    UploadReport {
        id: stamp.id,
        uploaded_by: parts.uploaded_by,
        created_at: stamp.created_at,
        source_filename: parts.source_filename,
        parameters: parts.summaries,
        timeseries: parts.series,
        alerts,
        recommendations,
        map_status,
        ml_insights,
    }
}

fn build_alerts(stamp: &ReportStamp, summaries: &[ParameterSummary], table: &ThresholdTable) -> Vec<Alert> {
    summaries
        .iter()
        .filter(|s| s.status != Status::Ok)
        .map(|s| {
            let safe_range = table
                .get(s.parameter)
                .map_or_else(|| "unbounded".to_string(), |limits| limits.describe_range());
            Alert {
                id: format!("{}-{}", stamp.id, s.parameter.slug()),
                title: format!("{} out of range", s.parameter),
                severity: Severity::from(s.status),
                message: format!(
                    "{} averaged {} against a safe range of {}.",
                    s.parameter,
                    with_unit(&s.average.to_string(), &s.unit),
                    safe_range
                ),
                timestamp: stamp.created_at,
            }
        })
        .collect()
}

fn build_recommendations(
    summaries: &[ParameterSummary],
    label: Option<PollutionLabel>,
    table: &ThresholdTable,
) -> Vec<String> {
    let mut recommendations: Vec<String> = Vec::new();
    for summary in summaries.iter().filter(|s| s.status != Status::Ok) {
        let sentence = table
            .get(summary.parameter)
            .and_then(|limits| limits.recommendation.clone())
            .unwrap_or_else(|| {
                format!(
                    "{} is outside its safe range; review treatment for this parameter.",
                    summary.parameter
                )
            });
        if !recommendations.contains(&sentence) {
            recommendations.push(sentence);
        }
    }

    match label {
        Some(PollutionLabel::Polluted) => recommendations.push(POLLUTED_ADVISORY.to_string()),
        Some(PollutionLabel::Moderate) => recommendations.push(MODERATE_ADVISORY.to_string()),
        _ => {}
    }

    if recommendations.is_empty() {
        recommendations.push(ALL_CLEAR.to_string());
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Parameter;
    use chrono::TimeZone;

    fn summary(parameter: Parameter, average: f64, status: Status) -> ParameterSummary {
        ParameterSummary {
            parameter,
            unit: if parameter == Parameter::Turbidity { "NTU".into() } else { String::new() },
            average,
            minimum: average,
            maximum: average,
            status,
            directive: (status != Status::Ok).then(|| "act".to_string()),
        }
    }

    fn insights(label: PollutionLabel) -> MlInsights {
        MlInsights {
            pollution_prediction: None,
            pollution_score: 0.0,
            pollution_label: label,
            forecasts: ForecastSet::new(),
            model_available: false,
        }
    }

    fn stamp() -> ReportStamp {
        ReportStamp {
            id: "abc123".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    fn parts(summaries: Vec<ParameterSummary>, label: PollutionLabel) -> ReportParts {
        let mut forecasts = ForecastSet::new();
        forecasts.insert("pH".to_string(), vec![7.0, 7.1, 7.2]);
        ReportParts {
            series: Vec::new(),
            summaries,
            forecasts,
            insights: Some(insights(label)),
            source_filename: Some("lab.csv".to_string()),
            uploaded_by: "operator".to_string(),
        }
    }

    #[test]
    fn alerts_cover_each_non_ok_parameter() {
        let report = assemble_with(
            stamp(),
            parts(
                vec![
                    summary(Parameter::Ph, 7.833, Status::Critical),
                    summary(Parameter::Turbidity, 5.4, Status::Warning),
                    summary(Parameter::DissolvedOxygen, 6.0, Status::Ok),
                ],
                PollutionLabel::Moderate,
            ),
            &ThresholdTable::default(),
        );
        assert_eq!(report.alerts.len(), 2);
        let ph = &report.alerts[0];
        assert_eq!(ph.id, "abc123-ph");
        assert_eq!(ph.title, "pH out of range");
        assert_eq!(ph.severity, Severity::Critical);
        assert_eq!(ph.message, "pH averaged 7.833 against a safe range of 6.5-8.5.");
        assert_eq!(ph.timestamp, report.created_at);
        assert_eq!(
            report.alerts[1].message,
            "Turbidity averaged 5.4 NTU against a safe range of <= 5 NTU."
        );
        assert_eq!(report.map_status, MapStatus::Poor);
    }

    #[test]
    fn recommendations_follow_parameters_then_label() {
        let report = assemble_with(
            stamp(),
            parts(
                vec![
                    summary(Parameter::Ph, 9.0, Status::Critical),
                    summary(Parameter::Tds, 700.0, Status::Critical),
                    summary(Parameter::Turbidity, 12.0, Status::Critical),
                ],
                PollutionLabel::Polluted,
            ),
            &ThresholdTable::default(),
        );
        assert_eq!(report.recommendations.len(), 4);
        assert!(report.recommendations[0].starts_with("pH out of optimal range"));
        assert!(report.recommendations[1].starts_with("High TDS"));
        assert!(report.recommendations[2].starts_with("Turbidity is elevated"));
        assert_eq!(report.recommendations[3], POLLUTED_ADVISORY);
    }

    #[test]
    fn clean_upload_gets_all_clear() {
        let report = assemble_with(
            stamp(),
            parts(vec![summary(Parameter::Ph, 7.2, Status::Ok)], PollutionLabel::Good),
            &ThresholdTable::default(),
        );
        assert!(report.alerts.is_empty());
        assert_eq!(report.recommendations, vec![ALL_CLEAR.to_string()]);
        assert_eq!(report.map_status, MapStatus::Good);
    }

    #[test]
    fn forecasts_are_attached_to_insights() {
        let report = assemble_with(
            stamp(),
            parts(vec![summary(Parameter::Ph, 7.2, Status::Ok)], PollutionLabel::Good),
            &ThresholdTable::default(),
        );
        let insights = report.ml_insights.unwrap();
        assert_eq!(insights.forecasts["pH"], vec![7.0, 7.1, 7.2]);
    }

    #[test]
    fn same_inputs_assemble_identically() {
        let summaries = vec![summary(Parameter::Iron, 0.45, Status::Warning)];
        let first = assemble_with(stamp(), parts(summaries.clone(), PollutionLabel::Good), &ThresholdTable::default());
        let second = assemble_with(stamp(), parts(summaries, PollutionLabel::Good), &ThresholdTable::default());
        assert_eq!(first, second);

        let fresh = assemble(parts(Vec::new(), PollutionLabel::Good), &ThresholdTable::default());
        assert_eq!(fresh.id.len(), 32);
        assert_ne!(fresh.id, first.id);
    }
}
