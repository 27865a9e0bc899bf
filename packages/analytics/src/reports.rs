//! The three fixed reports.

use std::collections::BTreeMap;

use statsync_analytics_models::{
    BestYear, BestYears, BestYearsReport, PopulationStats, PopulationStatsReport, SeriesObservation,
    SeriesPopulationRow, SeriesReport,
};

use crate::AnalyticsError;
use crate::load::{BlsRow, PopulationRow};

/// First year of the Q1 range, inclusive.
pub const POPULATION_START_YEAR: i64 = 2013;

/// Last year of the Q1 range, inclusive.
pub const POPULATION_END_YEAR: i64 = 2018;

/// Substring selecting the Q3 series.
pub const TARGET_SERIES: &str = "PRS30006032";

/// Period selecting the Q3 rows.
pub const TARGET_PERIOD: &str = "Q01";

/// Q1: mean and sample standard deviation of `Population` for the years
/// 2013 through 2018.
///
/// Rows in range without a usable `Population` are left out.
#[must_use]
pub fn population_stats(population: &[PopulationRow]) -> PopulationStatsReport {
    if population.is_empty() {
        return PopulationStatsReport::NoPopulationData;
    }

    let values: Vec<f64> = population
        .iter()
        .filter(|row| {
            row.year()
                .is_some_and(|y| (POPULATION_START_YEAR..=POPULATION_END_YEAR).contains(&y))
        })
        .filter_map(PopulationRow::population)
        .collect();

    if values.is_empty() {
        return PopulationStatsReport::NoDataInRange;
    }

    #[allow(clippy::cast_precision_loss)] // row counts are tiny
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let stddev = (values.len() > 1).then(|| {
        let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (squares / (n - 1.0)).sqrt()
    });

    PopulationStatsReport::Computed(PopulationStats {
        analysis: format!(
            "US Population Statistics ({POPULATION_START_YEAR}-{POPULATION_END_YEAR})"
        ),
        mean,
        stddev,
        record_count: values.len() as u64,
        year_range: format!("{POPULATION_START_YEAR}-{POPULATION_END_YEAR}"),
    })
}

/// Q2: for each series, the year whose values summed across all periods
/// is greatest.
///
/// Ties go to the earlier year.
#[must_use]
pub fn best_years(bls: &[BlsRow]) -> BestYearsReport {
    if bls.is_empty() {
        return BestYearsReport::NoBlsData;
    }

    let mut totals: BTreeMap<&str, BTreeMap<i64, f64>> = BTreeMap::new();
    for row in bls {
        *totals
            .entry(row.series_id.as_str())
            .or_default()
            .entry(row.year)
            .or_default() += row.value;
    }

    let best_years: BTreeMap<String, BestYear> = totals
        .into_iter()
        .filter_map(|(series_id, years)| {
            let mut best: Option<BestYear> = None;
            for (year, value) in years {
                // Years ascend, so strict `>` keeps the earliest maximum.
                if best.is_none_or(|b| value > b.value) {
                    best = Some(BestYear { year, value });
                }
            }
            best.map(|b| (series_id.to_string(), b))
        })
        .collect();

    log::debug!("Computed best years for {} series", best_years.len());

    BestYearsReport::Computed(BestYears {
        analysis: "Best year for each series (max annual sum of quarterly values)".to_string(),
        total_series: best_years.len() as u64,
        best_years,
    })
}

/// Q3: rows of the target series for the target period, joined with
/// that year's population.
///
/// Returns `None` when no BLS row matches. Multiple population rows for
/// a year each produce a joined row.
#[must_use]
pub fn series_with_population(bls: &[BlsRow], population: &[PopulationRow]) -> Option<SeriesReport> {
    let mut selected: Vec<&BlsRow> = bls
        .iter()
        .filter(|row| row.series_id.contains(TARGET_SERIES) && row.period == TARGET_PERIOD)
        .collect();

    if selected.is_empty() {
        log::warn!("No rows for series {TARGET_SERIES} period {TARGET_PERIOD}");
        return None;
    }

    if population.is_empty() {
        let data: Vec<SeriesObservation> = selected
            .into_iter()
            .map(|row| SeriesObservation {
                series_id: row.series_id.clone(),
                year: row.year,
                period: row.period.clone(),
                value: row.value,
            })
            .collect();

        return Some(SeriesReport::BlsOnly {
            analysis: format!("Series {TARGET_SERIES} - {TARGET_PERIOD} (BLS data only)"),
            record_count: data.len() as u64,
            note: "Population data not available".to_string(),
            data,
        });
    }

    selected.sort_by_key(|row| row.year);

    let data = match join_population(&selected, population) {
        Ok(data) => data,
        Err(e) => {
            log::error!("Q3 failed: {e}");
            return Some(SeriesReport::Error {
                error: e.to_string(),
            });
        }
    };

    let year_range = match (data.first(), data.last()) {
        (Some(first), Some(last)) => format!("{}-{}", first.year, last.year),
        _ => String::new(),
    };

    Some(SeriesReport::WithPopulation {
        analysis: format!("Series {TARGET_SERIES} - {TARGET_PERIOD} with Population"),
        series_id: TARGET_SERIES.to_string(),
        period: TARGET_PERIOD.to_string(),
        record_count: data.len() as u64,
        year_range,
        data,
    })
}

/// Left-joins `selected` against `population` on year, preserving the
/// order of `selected`.
fn join_population(
    selected: &[&BlsRow],
    population: &[PopulationRow],
) -> Result<Vec<SeriesPopulationRow>, AnalyticsError> {
    let mut by_year: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
    for row in population {
        if let Some(year) = row.year() {
            by_year.entry(year).or_default().push(row.population());
        }
    }

    let mut data = Vec::new();
    for row in selected {
        let joined = |population: Option<f64>| SeriesPopulationRow {
            series_id: row.series_id.clone(),
            year: row.year,
            period: row.period.clone(),
            value: row.value,
            population,
        };

        match by_year.get(&row.year) {
            Some(matches) => data.extend(matches.iter().copied().map(joined)),
            None => data.push(joined(None)),
        }
    }

    if data.is_empty() {
        return Err(AnalyticsError::Compute {
            message: "No data after merge".to_string(),
        });
    }

    Ok(data)
}
