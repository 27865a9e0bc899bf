//! Tabular loader.
//!
//! Reads the mirrored BLS table (tab-separated) and the latest population
//! snapshot (JSON) into row vectors.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use statsync_storage::{ObjectRecord, ObjectStore};

use crate::AnalyticsError;

/// Column dropped from the BLS table on load.
const FOOTNOTE_COLUMN: &str = "footnote_codes";

/// Columns every BLS row must carry.
const REQUIRED_BLS_COLUMNS: [&str; 4] = ["series_id", "year", "period", "value"];

/// One row of the BLS time-series table, whitespace-trimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct BlsRow {
    /// Series identifier.
    pub series_id: String,
    /// Observation year.
    pub year: i64,
    /// Observation period (`Q01`..`Q05`, `M01`.., ...).
    pub period: String,
    /// Observed value.
    pub value: f64,
    /// Any other columns, keyed by trimmed column name.
    pub extra: BTreeMap<String, String>,
}

/// One population record, kept as the JSON object it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationRow {
    /// The record's fields.
    pub fields: Map<String, Value>,
}

impl PopulationRow {
    /// `Year` as an integer. Accepts numbers and numeric strings.
    #[must_use]
    pub fn year(&self) -> Option<i64> {
        match self.fields.get("Year")? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(f64_to_i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// `Population` as a number. Accepts numbers and numeric strings.
    #[must_use]
    pub fn population(&self) -> Option<f64> {
        match self.fields.get("Population")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation)] // caller checked the value is integral
const fn f64_to_i64(value: f64) -> i64 {
    value as i64
}

/// The JSON shapes a population snapshot may take.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulationPayload {
    /// `{"data": [...], ...}`
    Envelope(Vec<Value>),
    /// `[...]`
    Rows(Vec<Value>),
    /// `{...}` without a `data` key, treated as a single row.
    Single(Map<String, Value>),
}

impl PopulationPayload {
    /// Classifies a parsed snapshot.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for scalars, `null`, or a
    /// `data` member that is not an array.
    pub fn classify(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(rows)) => Ok(Self::Envelope(rows)),
                Some(other) => Err(format!("`data` is {}, expected an array", kind(&other))),
                None => Ok(Self::Single(map)),
            },
            Value::Array(rows) => Ok(Self::Rows(rows)),
            other => Err(format!("top-level {} is not a population payload", kind(&other))),
        }
    }

    /// Resolves the payload into rows.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if any row is not an object.
    pub fn into_rows(self) -> Result<Vec<PopulationRow>, String> {
        let values = match self {
            Self::Envelope(rows) | Self::Rows(rows) => rows,
            Self::Single(fields) => return Ok(vec![PopulationRow { fields }]),
        };

        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| match value {
                Value::Object(fields) => Ok(PopulationRow { fields }),
                other => Err(format!("row {i} is {}, expected an object", kind(&other))),
            })
            .collect()
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parses tab-separated BLS data.
///
/// Column names and every cell are trimmed, and `footnote_codes` is
/// dropped. An empty body yields an empty table.
///
/// # Errors
///
/// Returns [`AnalyticsError::Parse`] if a required column is missing or a
/// `year`/`value` cell isn't numeric, and [`AnalyticsError::Csv`] for
/// malformed input.
pub fn parse_bls_table(body: &[u8]) -> Result<Vec<BlsRow>, AnalyticsError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(body);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_owned())
        .collect();

    if headers.iter().all(String::is_empty) {
        return Ok(Vec::new());
    }

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| AnalyticsError::Parse {
                line: 1,
                reason: format!("missing column `{name}`"),
            })
    };
    let [series_idx, year_idx, period_idx, value_idx] = [
        column(REQUIRED_BLS_COLUMNS[0])?,
        column(REQUIRED_BLS_COLUMNS[1])?,
        column(REQUIRED_BLS_COLUMNS[2])?,
        column(REQUIRED_BLS_COLUMNS[3])?,
    ];

    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, csv::Position::line);
        let cell = |i: usize| record.get(i).unwrap_or("").trim();

        let year = cell(year_idx).parse().map_err(|_| AnalyticsError::Parse {
            line,
            reason: format!("year {:?} is not an integer", cell(year_idx)),
        })?;
        let value = cell(value_idx).parse().map_err(|_| AnalyticsError::Parse {
            line,
            reason: format!("value {:?} is not numeric", cell(value_idx)),
        })?;

        let extra = headers
            .iter()
            .enumerate()
            .filter(|(i, name)| {
                ![series_idx, year_idx, period_idx, value_idx].contains(i)
                    && name.as_str() != FOOTNOTE_COLUMN
            })
            .map(|(i, name)| (name.clone(), cell(i).to_owned()))
            .collect();

        rows.push(BlsRow {
            series_id: cell(series_idx).to_owned(),
            year,
            period: cell(period_idx).to_owned(),
            value,
            extra,
        });
    }

    Ok(rows)
}

/// Loads and cleans the BLS table at `key`.
///
/// # Errors
///
/// Returns [`AnalyticsError::Fetch`] if nothing is stored at `key`, and
/// storage or parse errors otherwise.
pub async fn load_bls_table(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Vec<BlsRow>, AnalyticsError> {
    log::info!("Loading BLS data from s3://{}/{key}", store.bucket());

    let Some(body) = store.get(key).await?.found() else {
        return Err(AnalyticsError::Fetch {
            key: key.to_string(),
            reason: "object not found".to_string(),
        });
    };

    let rows = parse_bls_table(&body)?;
    log::info!("Loaded and cleaned BLS data: {} rows", rows.len());
    Ok(rows)
}

/// Picks the snapshot with the greatest storage timestamp.
///
/// Ties go to the lexicographically greatest key.
#[must_use]
pub fn select_latest(records: &[ObjectRecord]) -> Option<&ObjectRecord> {
    records
        .iter()
        .max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        })
}

/// Loads the most recent population snapshot under `prefix`.
///
/// Returns an empty table if there are no snapshots.
///
/// # Errors
///
/// Returns storage errors, [`AnalyticsError::Json`] for unparseable
/// snapshots, and [`AnalyticsError::UnsupportedPayload`] for JSON that
/// isn't one of the accepted shapes.
pub async fn load_population_table(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<PopulationRow>, AnalyticsError> {
    log::info!("Loading population data from s3://{}/{prefix}", store.bucket());

    let records = store.list(prefix).await?;
    let Some(latest) = select_latest(&records) else {
        log::warn!("No population data found");
        return Ok(Vec::new());
    };

    log::info!("Loading latest population file: {}", latest.key);

    let Some(body) = store.get(&latest.key).await?.found() else {
        // Listed a moment ago but gone now; treat like an empty prefix.
        log::warn!("Population file {} disappeared before it could be read", latest.key);
        return Ok(Vec::new());
    };

    let value: Value = serde_json::from_slice(&body)?;
    let unsupported = |reason: String| AnalyticsError::UnsupportedPayload {
        key: latest.key.clone(),
        reason,
    };
    let rows = PopulationPayload::classify(value)
        .and_then(PopulationPayload::into_rows)
        .map_err(unsupported)?;

    log::info!("Loaded population data: {} rows", rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use serde_json::json;
    use statsync_storage::memory::MemoryStore;

    use super::*;

    const BLS: &str = "series_id        \tyear\tperiod\t       value\tfootnote_codes\n\
                       PRS30006011      \t1995\tQ01\t         2.6\t\n\
                       PRS30006032      \t1996\tQ01\t        -4.2\tR\n";

    #[test]
    fn trims_and_drops_footnotes() {
        let rows = parse_bls_table(BLS.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].series_id, "PRS30006011");
        assert_eq!(rows[0].year, 1995);
        assert_eq!(rows[0].period, "Q01");
        assert!((rows[1].value - -4.2).abs() < f64::EPSILON);
        assert!(rows[0].extra.is_empty());
    }

    #[test]
    fn keeps_extra_columns_trimmed() {
        let body = "series_id\tyear\tperiod\tvalue\tnote \nS1\t2020\tQ01\t1\t  hi  \n";
        let rows = parse_bls_table(body.as_bytes()).unwrap();
        assert_eq!(rows[0].extra["note"], "hi");
    }

    #[test]
    fn empty_body_is_empty_table() {
        assert!(parse_bls_table(b"").unwrap().is_empty());
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = parse_bls_table(b"series_id\tyear\tperiod\nS1\t2020\tQ01\n").unwrap_err();
        assert!(matches!(err, AnalyticsError::Parse { .. }));
    }

    #[test]
    fn non_numeric_value_reports_line() {
        let err = parse_bls_table(b"series_id\tyear\tperiod\tvalue\nS1\t2020\tQ01\tn/a\n")
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Parse { line: 2, .. }));
    }

    #[test]
    fn classifies_payload_shapes() {
        let envelope = PopulationPayload::classify(json!({"data": [{"Year": 2019}]})).unwrap();
        assert_eq!(envelope.into_rows().unwrap().len(), 1);

        let rows = PopulationPayload::classify(json!([{"Year": 2019}, {"Year": 2020}])).unwrap();
        assert_eq!(rows.into_rows().unwrap().len(), 2);

        let single = PopulationPayload::classify(json!({"Year": 2019, "Population": 1})).unwrap();
        assert!(matches!(single, PopulationPayload::Single(_)));
        assert_eq!(single.into_rows().unwrap()[0].year(), Some(2019));
    }

    #[test]
    fn rejects_unrecognized_shapes() {
        assert!(PopulationPayload::classify(json!("text")).is_err());
        assert!(PopulationPayload::classify(json!({"data": 5})).is_err());
        assert!(
            PopulationPayload::classify(json!([1, 2]))
                .unwrap()
                .into_rows()
                .is_err()
        );
    }

    #[test]
    fn reads_string_years_and_populations() {
        let row = PopulationRow {
            fields: json!({"Year": "2016", "Population": "323127515"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        assert_eq!(row.year(), Some(2016));
        assert_eq!(row.population(), Some(323_127_515.0));
    }

    #[tokio::test]
    async fn picks_latest_snapshot_by_storage_timestamp() {
        let store = MemoryStore::new("b");
        let old = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        // Key order deliberately disagrees with timestamp order.
        store.insert_at("pop/population_b.json", r#"{"data": [{"Year": 2013}]}"#, old);
        store.insert_at("pop/population_a.json", r#"{"data": [{"Year": 2020}]}"#, new);

        let rows = load_population_table(&store, "pop/").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].year(), Some(2020));
    }

    #[test]
    fn timestamp_ties_go_to_greatest_key() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let record = |key: &str| ObjectRecord {
            key: key.to_string(),
            last_modified: ts,
            size: 0,
            metadata: statsync_storage::Metadata::new(),
        };
        let records = vec![record("p/population_2.json"), record("p/population_1.json")];
        assert_eq!(select_latest(&records).unwrap().key, "p/population_2.json");
    }

    #[tokio::test]
    async fn empty_prefix_is_empty_table() {
        let store = MemoryStore::new("b");
        assert!(load_population_table(&store, "pop/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_bls_object_is_fatal() {
        let store = MemoryStore::new("b");
        let err = load_bls_table(&store, "raw/pr/pr.data.0.Current")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Fetch { .. }));
    }
}
