//! Parameter vocabulary and safe-range table.
//!
//! Lab reports name their columns freely ("pH (units)", "Dissolved Oxygen mg/L",
//! "B.O.D."). [`resolve_column`] maps such headers onto a canonical [`Parameter`];
//! [`ThresholdTable`] holds the safe range, unit and corrective actions for each one.

use crate::error::ConfigError;
use crate::models::Parameter;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

lazy_static! {
    /// Alias table. Aliases are compared against the header's alphanumeric tokens
    /// with separators removed, so "Total Dissolved Solids" matches `totaldissolvedsolids`.
    static ref SYNONYMS: Vec<(&'static str, Parameter)> = vec![
        ("ph", Parameter::Ph),
        ("potentialofhydrogen", Parameter::Ph),
        ("turbidity", Parameter::Turbidity),
        ("ntu", Parameter::Turbidity),
        ("do", Parameter::DissolvedOxygen),
        ("dissolvedoxygen", Parameter::DissolvedOxygen),
        ("oxygen", Parameter::DissolvedOxygen),
        ("tds", Parameter::Tds),
        ("totaldissolvedsolids", Parameter::Tds),
        ("iron", Parameter::Iron),
        ("fe", Parameter::Iron),
        ("chlorine", Parameter::Chlorine),
        ("freechlorine", Parameter::Chlorine),
        ("residualchlorine", Parameter::Chlorine),
        ("cl", Parameter::Chlorine),
        ("cl2", Parameter::Chlorine),
        ("bod", Parameter::Bod),
        ("bod5", Parameter::Bod),
        ("biochemicaloxygendemand", Parameter::Bod),
        ("cod", Parameter::Cod),
        ("chemicaloxygendemand", Parameter::Cod),
    ];
    static ref TOKEN_SPLIT: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Maps a free-form column header to a canonical parameter.
///
/// The header is lowercased and split into alphanumeric tokens. An alias matches
/// when a contiguous run of tokens concatenates to it. When several aliases match,
/// the longest wins, so "Chemical Oxygen Demand" resolves to COD rather than DO.
///
/// # Examples
/// ```
/// use wqam::models::Parameter;
/// use wqam::parameters::resolve_column;
///
/// assert_eq!(resolve_column("Turbidity (NTU)"), Some(Parameter::Turbidity));
/// assert_eq!(resolve_column("Biochemical Oxygen Demand"), Some(Parameter::Bod));
/// assert_eq!(resolve_column("Remarks"), None);
/// ```
pub fn resolve_column(header: &str) -> Option<Parameter> {
    let lowered = header.to_lowercase();
    let tokens: Vec<&str> = TOKEN_SPLIT
        .split(&lowered)
        .filter(|token| !token.is_empty())
        .collect();

    let mut best: Option<(usize, Parameter)> = None;
    for &(alias, parameter) in SYNONYMS.iter() {
        if best.is_some_and(|(len, _)| alias.len() <= len) {
            continue;
        }
        if contains_token_run(&tokens, alias) {
            best = Some((alias.len(), parameter));
        }
    }
    best.map(|(_, parameter)| parameter)
}

fn contains_token_run(tokens: &[&str], alias: &str) -> bool {
    for start in 0..tokens.len() {
        let mut joined = String::new();
        for token in &tokens[start..] {
            joined.push_str(token);
            if joined == alias {
                return true;
            }
            if !alias.starts_with(joined.as_str()) {
                break;
            }
        }
    }
    false
}

/// Which side of the safe range a reading fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Low,
    High,
}

/// Safe range and advice for one parameter.
///
/// Unset critical limits default to twice the upper bound and half the lower bound.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterLimits {
    pub unit: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub critical_min: Option<f64>,
    pub critical_max: Option<f64>,
    pub directive_low: Option<String>,
    pub directive_high: Option<String>,
    pub recommendation: Option<String>,
}

impl ParameterLimits {
    pub fn critical_max(&self) -> Option<f64> {
        self.critical_max.or(self.max.map(|max| max * 2.0))
    }

    pub fn critical_min(&self) -> Option<f64> {
        self.critical_min.or(self.min.map(|min| min / 2.0))
    }

    /// Human-readable safe range, e.g. `6.5-8.5`, `<= 5 NTU` or `>= 5 mg/L`.
    pub fn describe_range(&self) -> String {
        let range = match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{}-{}", min, max),
            (None, Some(max)) => format!("<= {}", max),
            (Some(min), None) => format!(">= {}", min),
            (None, None) => return "unbounded".to_string(),
        };
        with_unit(&range, &self.unit)
    }

    /// Corrective action for a breach in the given direction.
    ///
    /// Always returns a sentence; when the table has no directive for that side a
    /// generic one naming the parameter and its range is produced.
    pub fn directive(&self, parameter: Parameter, direction: Direction) -> String {
        let configured = match direction {
            Direction::Low => self.directive_low.as_ref(),
            Direction::High => self.directive_high.as_ref(),
        };
        match configured {
            Some(text) => text.clone(),
            None => {
                let side = match direction {
                    Direction::Low => "below",
                    Direction::High => "above",
                };
                format!(
                    "{} is {} its safe range ({}); review treatment for this parameter.",
                    parameter,
                    side,
                    self.describe_range()
                )
            }
        }
    }
}

/// Appends a unit to a value when the unit is non-empty.
pub fn with_unit(value: &str, unit: &str) -> String {
    if unit.is_empty() {
        value.to_string()
    } else {
        format!("{} {}", value, unit)
    }
}

fn limits(
    unit: &str,
    min: Option<f64>,
    max: Option<f64>,
    directive_low: Option<&str>,
    directive_high: Option<&str>,
    recommendation: &str,
) -> ParameterLimits {
    ParameterLimits {
        unit: unit.to_string(),
        min,
        max,
        critical_min: None,
        critical_max: None,
        directive_low: directive_low.map(str::to_string),
        directive_high: directive_high.map(str::to_string),
        recommendation: Some(recommendation.to_string()),
    }
}

/// Safe ranges for every canonical parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    entries: BTreeMap<Parameter, ParameterLimits>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        let mut ph = limits(
            "",
            Some(6.5),
            Some(8.5),
            Some("Dose alkali (lime or soda ash) to raise pH into the 6.5-8.5 band."),
            Some("Dose acid (CO2 or sulfuric acid) to bring pH back below 8.5."),
            "pH out of optimal range. Adjust with acid/alkali dosing before biological stages.",
        );
        ph.critical_min = Some(6.0);
        ph.critical_max = Some(9.0);
        entries.insert(Parameter::Ph, ph);
        entries.insert(
            Parameter::Turbidity,
            limits(
                "NTU",
                None,
                Some(5.0),
                None,
                Some("Apply coagulation and filtration; check the filter backwash cycle."),
                "Turbidity is elevated. Optimise coagulant dosing and filter backwash cycles.",
            ),
        );
        entries.insert(
            Parameter::DissolvedOxygen,
            limits(
                "mg/L",
                Some(5.0),
                None,
                Some("Increase aeration."),
                None,
                "Low dissolved oxygen detected. Increase aeration and reduce organic load.",
            ),
        );
        entries.insert(
            Parameter::Tds,
            limits(
                "ppm",
                None,
                Some(500.0),
                None,
                Some("Investigate the source water; apply ion exchange or reverse osmosis before distribution."),
                "High TDS: consider membrane processes (RO or nanofiltration) and manage concentrate disposal.",
            ),
        );
        entries.insert(
            Parameter::Iron,
            limits(
                "mg/L",
                None,
                Some(0.3),
                None,
                Some("Apply oxidation followed by filtration to remove iron."),
                "Iron above limit. Use aeration or oxidation with sand or greensand filtration.",
            ),
        );
        entries.insert(
            Parameter::Chlorine,
            limits(
                "ppm",
                Some(0.2),
                Some(0.5),
                Some("Increase disinfectant dosing to restore the chlorine residual."),
                Some("Reduce chlorine dosing; dechlorinate before discharge."),
                "Chlorine residual outside target. Tune the dosing pump to hold 0.2-0.5 ppm.",
            ),
        );
        entries.insert(
            Parameter::Bod,
            limits(
                "mg/L",
                None,
                Some(3.0),
                None,
                Some("Increase biological treatment capacity (aeration basins or activated sludge)."),
                "High BOD detected. Prioritise biological treatment upgrades.",
            ),
        );
        entries.insert(
            Parameter::Cod,
            limits(
                "mg/L",
                None,
                Some(250.0),
                None,
                Some("Apply chemical pre-treatment or advanced oxidation for the industrial load."),
                "High COD: consider advanced oxidation (ozonation or Fenton) or chemical pre-treatment.",
            ),
        );
        Self { entries }
    }
}

impl ThresholdTable {
    pub fn get(&self, parameter: Parameter) -> Option<&ParameterLimits> {
        self.entries.get(&parameter)
    }

    /// Replaces the entry for `parameter`.
    pub fn set(&mut self, parameter: Parameter, limits: ParameterLimits) {
        self.entries.insert(parameter, limits);
    }

    pub fn unit(&self, parameter: Parameter) -> &str {
        self.get(parameter).map_or("", |limits| limits.unit.as_str())
    }

    /// Built-in table with entries replaced by `overrides`, keyed by canonical name.
    ///
    /// # Errors
    /// * [`ConfigError::UnknownParameter`] if a key is not a canonical parameter name
    pub fn with_overrides(
        overrides: &BTreeMap<String, ParameterLimits>,
    ) -> Result<Self, ConfigError> {
        let mut table = Self::default();
        for (name, limits) in overrides {
            let parameter =
                Parameter::from_name(name).ok_or_else(|| ConfigError::UnknownParameter(name.clone()))?;
            table.set(parameter, limits.clone());
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_header_spellings() {
        let cases = [
            ("pH", Parameter::Ph),
            ("PH (units)", Parameter::Ph),
            ("Turbidity (NTU)", Parameter::Turbidity),
            ("NTU", Parameter::Turbidity),
            ("DO mg/L", Parameter::DissolvedOxygen),
            ("Dissolved Oxygen", Parameter::DissolvedOxygen),
            ("Total Dissolved Solids", Parameter::Tds),
            ("tds_ppm", Parameter::Tds),
            ("Iron (Fe)", Parameter::Iron),
            ("Free Chlorine", Parameter::Chlorine),
            ("Cl2", Parameter::Chlorine),
            ("B.O.D.", Parameter::Bod),
            ("BOD5", Parameter::Bod),
            ("Biochemical Oxygen Demand", Parameter::Bod),
            ("Chemical Oxygen Demand (mg/L)", Parameter::Cod),
        ];
        for (header, expected) in cases {
            assert_eq!(resolve_column(header), Some(expected), "header {header:?}");
        }
    }

    #[test]
    fn ignores_headers_that_only_contain_an_alias_as_a_substring() {
        for header in ["Dosage", "Code", "Phosphate", "Remarks", "Timestamp", "Colour", ""] {
            assert_eq!(resolve_column(header), None, "header {header:?}");
        }
    }

    #[test]
    fn describes_ranges_with_units() {
        let table = ThresholdTable::default();
        assert_eq!(table.get(Parameter::Ph).unwrap().describe_range(), "6.5-8.5");
        assert_eq!(
            table.get(Parameter::Turbidity).unwrap().describe_range(),
            "<= 5 NTU"
        );
        assert_eq!(
            table.get(Parameter::DissolvedOxygen).unwrap().describe_range(),
            ">= 5 mg/L"
        );
    }

    #[test]
    fn critical_limits_default_from_safe_range() {
        let table = ThresholdTable::default();
        let ph = table.get(Parameter::Ph).unwrap();
        assert_eq!(ph.critical_max(), Some(9.0));
        assert_eq!(ph.critical_min(), Some(6.0));
        let turbidity = table.get(Parameter::Turbidity).unwrap();
        assert_eq!(turbidity.critical_max(), Some(10.0));
        assert_eq!(turbidity.critical_min(), None);
        let oxygen = table.get(Parameter::DissolvedOxygen).unwrap();
        assert_eq!(oxygen.critical_min(), Some(2.5));
        let chlorine = table.get(Parameter::Chlorine).unwrap();
        assert_eq!(chlorine.critical_max(), Some(1.0));
        assert_eq!(chlorine.critical_min(), Some(0.1));
    }

    #[test]
    fn missing_directive_falls_back_to_generic_sentence() {
        let table = ThresholdTable::default();
        let turbidity = table.get(Parameter::Turbidity).unwrap();
        let text = turbidity.directive(Parameter::Turbidity, Direction::Low);
        assert!(text.starts_with("Turbidity is below its safe range"));
    }

    #[test]
    fn overrides_replace_entries_by_name() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "ph".to_string(),
            ParameterLimits {
                min: Some(7.0),
                max: Some(8.0),
                ..Default::default()
            },
        );
        let table = ThresholdTable::with_overrides(&overrides).unwrap();
        assert_eq!(table.get(Parameter::Ph).unwrap().min, Some(7.0));
        assert_eq!(table.unit(Parameter::Turbidity), "NTU");

        overrides.insert("salinity".to_string(), ParameterLimits::default());
        assert!(matches!(
            ThresholdTable::with_overrides(&overrides),
            Err(ConfigError::UnknownParameter(name)) if name == "salinity"
        ));
    }
}
