#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Report payload and result envelope types for the analytics stage.
//!
//! Each report has its own type. "No data" outcomes serialize as plain
//! sentinel strings so they can't be mistaken for an empty result.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

/// Sentinel for Q1 when no population rows were loaded at all.
pub const NO_POPULATION_DATA: &str = "No population data available";

/// Sentinel for Q1 when no population rows fall in the year range.
pub const NO_DATA_IN_RANGE: &str = "No Data";

/// Sentinel for Q2 when the BLS table is empty.
pub const NO_BLS_DATA: &str = "No BLS data available";

/// Population mean and sample standard deviation over a year range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationStats {
    /// Human-readable label.
    pub analysis: String,
    /// Arithmetic mean of `Population`.
    pub mean: f64,
    /// Sample (N-1) standard deviation; `None` with fewer than two rows.
    pub stddev: Option<f64>,
    /// Rows contributing to the statistics.
    pub record_count: u64,
    /// Inclusive range, e.g. `"2013-2018"`.
    pub year_range: String,
}

/// Q1 outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulationStatsReport {
    /// Statistics were computed.
    Computed(PopulationStats),
    /// The population table was empty.
    NoPopulationData,
    /// The population table had no rows in the year range.
    NoDataInRange,
}

impl Serialize for PopulationStatsReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Computed(stats) => stats.serialize(serializer),
            Self::NoPopulationData => serializer.serialize_str(NO_POPULATION_DATA),
            Self::NoDataInRange => serializer.serialize_str(NO_DATA_IN_RANGE),
        }
    }
}

/// The best year for one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BestYear {
    /// Year with the greatest summed value.
    pub year: i64,
    /// The summed value for that year.
    pub value: f64,
}

/// Best year per series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestYears {
    /// Human-readable label.
    pub analysis: String,
    /// Number of distinct series.
    pub total_series: u64,
    /// Best year keyed by `series_id`, ascending.
    pub best_years: BTreeMap<String, BestYear>,
}

/// Q2 outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum BestYearsReport {
    /// Best years were computed.
    Computed(BestYears),
    /// The BLS table was empty.
    NoBlsData,
}

impl Serialize for BestYearsReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Computed(best) => best.serialize(serializer),
            Self::NoBlsData => serializer.serialize_str(NO_BLS_DATA),
        }
    }
}

/// A BLS observation without population data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesObservation {
    /// Series identifier.
    pub series_id: String,
    /// Observation year.
    pub year: i64,
    /// Observation period (e.g. `Q01`).
    pub period: String,
    /// Observed value.
    pub value: f64,
}

/// A BLS observation joined with that year's population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPopulationRow {
    /// Series identifier.
    pub series_id: String,
    /// Observation year.
    pub year: i64,
    /// Observation period.
    pub period: String,
    /// Observed value.
    pub value: f64,
    /// Population for `year`, `null` when there is no match.
    #[serde(rename = "Population")]
    pub population: Option<f64>,
}

/// Q3 outcome. Absence of matching BLS rows is represented by the
/// surrounding `Option` rather than a variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SeriesReport {
    /// Population data was unavailable, so only BLS rows are reported.
    BlsOnly {
        /// Human-readable label.
        analysis: String,
        /// Number of rows in `data`.
        record_count: u64,
        /// Why population is missing.
        note: String,
        /// Filtered BLS rows.
        data: Vec<SeriesObservation>,
    },
    /// BLS rows left-joined with population by year.
    WithPopulation {
        /// Human-readable label.
        analysis: String,
        /// Target series.
        series_id: String,
        /// Target period.
        period: String,
        /// Number of rows in `data`.
        record_count: u64,
        /// `"min-max"` of the joined years.
        year_range: String,
        /// Joined rows, ascending by year.
        data: Vec<SeriesPopulationRow>,
    },
    /// The join produced nothing despite non-empty inputs.
    Error {
        /// Error description.
        error: String,
    },
}

/// Overall analytics status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// All reports were computed.
    Success,
    /// The run failed before any report was produced.
    Error,
}

/// The three reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analyses {
    /// Q1.
    #[serde(rename = "Q1_population_stats")]
    pub population_stats: PopulationStatsReport,
    /// Q2.
    #[serde(rename = "Q2_best_years")]
    pub best_years: BestYearsReport,
    /// Q3.
    #[serde(rename = "Q3_series_with_population")]
    pub series_with_population: Option<SeriesReport>,
}

/// Result object written once per analytics run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisEnvelope {
    /// When the run finished (RFC 3339).
    pub timestamp: String,
    /// Overall status.
    pub status: AnalysisStatus,
    /// The reports.
    pub analyses: Analyses,
    /// Where the envelope was saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_location: Option<String>,
    /// Why saving the envelope failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_save_error: Option<String>,
}

/// Body returned when the analytics run fails outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Always [`AnalysisStatus::Error`].
    pub status: AnalysisStatus,
    /// Error description.
    pub error: String,
    /// When the failure occurred (RFC 3339).
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_serialize_as_strings() {
        assert_eq!(
            serde_json::to_value(PopulationStatsReport::NoPopulationData).unwrap(),
            NO_POPULATION_DATA
        );
        assert_eq!(
            serde_json::to_value(PopulationStatsReport::NoDataInRange).unwrap(),
            NO_DATA_IN_RANGE
        );
        assert_eq!(
            serde_json::to_value(BestYearsReport::NoBlsData).unwrap(),
            NO_BLS_DATA
        );
    }

    #[test]
    fn envelope_uses_report_keys() {
        let envelope = AnalysisEnvelope {
            timestamp: "2025-03-27T08:30:00+00:00".to_string(),
            status: AnalysisStatus::Success,
            analyses: Analyses {
                population_stats: PopulationStatsReport::NoPopulationData,
                best_years: BestYearsReport::NoBlsData,
                series_with_population: None,
            },
            s3_location: None,
            s3_save_error: None,
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json["analyses"]["Q3_series_with_population"].is_null());
        assert!(json["analyses"].get("Q1_population_stats").is_some());
        assert!(json.get("s3_location").is_none());
    }

    #[test]
    fn error_body_reports_error_status() {
        let body = ErrorBody {
            status: AnalysisStatus::Error,
            error: "boom".to_string(),
            timestamp: "2025-03-27T08:30:00+00:00".to_string(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn joined_rows_use_population_column_name() {
        let row = SeriesPopulationRow {
            series_id: "PRS30006032".to_string(),
            year: 2018,
            period: "Q01".to_string(),
            value: 1.9,
            population: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert!(json["Population"].is_null());
    }
}
