//! Load company-year losses from a Schedule P style CSV
//!
//! Expected columns (extra columns are ignored):
//! `GRCODE`, `AccidentYear`, `DevelopmentLag`, `IncurLoss_B`, `EarnedPremNet_B`

use super::{LossDataset, Observation};
use crate::error::{ModelError, Result};
use csv::{Reader, ReaderBuilder, Trim};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default development lag treated as fully developed
pub const DEFAULT_FULLY_DEVELOPED_LAG: u32 = 10;

const COL_COMPANY: &str = "GRCODE";
const COL_YEAR: &str = "AccidentYear";
const COL_LAG: &str = "DevelopmentLag";
const COL_LOSS: &str = "IncurLoss_B";
const COL_PREMIUM: &str = "EarnedPremNet_B";

const REQUIRED_COLUMNS: [&str; 5] = [COL_COMPANY, COL_YEAR, COL_LAG, COL_LOSS, COL_PREMIUM];

/// Options controlling which rows are kept
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub fully_developed_lag: u32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            fully_developed_lag: DEFAULT_FULLY_DEVELOPED_LAG,
        }
    }
}

/// Row accounting for a load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub rows_read: usize,
    /// Rows at a development lag other than the fully developed one
    pub rows_other_lag: usize,
    /// Fully developed rows with loss <= 0 or premium <= 0
    pub dropped_non_positive: usize,
    pub kept: usize,
}

/// Raw CSV row; extra columns are ignored
///
/// Every field is optional so a blank or NA cell is reported with its row
/// number instead of as a bare deserialization error.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "GRCODE", deserialize_with = "na_as_none")]
    company: Option<u32>,
    #[serde(rename = "AccidentYear", deserialize_with = "na_as_none")]
    accident_year: Option<i32>,
    #[serde(rename = "DevelopmentLag", deserialize_with = "na_as_none")]
    lag: Option<u32>,
    #[serde(rename = "IncurLoss_B", deserialize_with = "na_as_none")]
    loss: Option<f64>,
    #[serde(rename = "EarnedPremNet_B", deserialize_with = "na_as_none")]
    premium: Option<f64>,
}

/// Blank, `NA` and `NaN` cells become `None`; anything else must parse
fn na_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| de::Error::custom(format!("cannot parse '{}': {}", raw, e)))
}

fn required<T>(value: Option<T>, column: &str, row: usize) -> Result<T> {
    value.ok_or_else(|| ModelError::DataQuality(format!("row {}: missing value in '{}'", row, column)))
}

/// Load observations from a CSV file
pub fn load_observations<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<(LossDataset, LoadSummary)> {
    let reader = ReaderBuilder::new().trim(Trim::All).from_path(path)?;
    load_from_csv(reader, options)
}

/// Load observations from any reader (e.g., string buffer)
pub fn load_observations_from_reader<R: std::io::Read>(
    reader: R,
    options: &LoadOptions,
) -> Result<(LossDataset, LoadSummary)> {
    load_from_csv(ReaderBuilder::new().trim(Trim::All).from_reader(reader), options)
}

fn load_from_csv<R: std::io::Read>(mut reader: Reader<R>, options: &LoadOptions) -> Result<(LossDataset, LoadSummary)> {
    // Serde treats an absent Option column as None; name it up front instead
    let headers = reader.headers()?.clone();
    for name in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == name) {
            return Err(ModelError::DataQuality(format!("missing required column '{}'", name)));
        }
    }

    let mut summary = LoadSummary::default();
    let mut observations = Vec::new();

    for (i, result) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1
        let row = i + 2;
        let record = result.map_err(|e| ModelError::DataQuality(format!("row {}: {}", row, e)))?;
        summary.rows_read += 1;

        let lag = required(record.lag, COL_LAG, row)?;
        if lag != options.fully_developed_lag {
            summary.rows_other_lag += 1;
            continue;
        }

        let company_id = required(record.company, COL_COMPANY, row)?;
        let accident_year = required(record.accident_year, COL_YEAR, row)?;
        let loss = required(record.loss, COL_LOSS, row)?;
        let premium = required(record.premium, COL_PREMIUM, row)?;

        if !loss.is_finite() || !premium.is_finite() {
            return Err(ModelError::DataQuality(format!("row {}: non-finite loss or premium", row)));
        }
        if loss <= 0.0 || premium <= 0.0 {
            summary.dropped_non_positive += 1;
            continue;
        }

        observations.push(Observation::new(company_id, accident_year, loss, premium));
    }

    summary.kept = observations.len();
    if summary.dropped_non_positive > 0 {
        log::warn!(
            "dropped {} fully developed rows with non-positive loss or premium",
            summary.dropped_non_positive
        );
    }
    log::info!(
        "loaded {} observations ({} rows read, {} at other lags)",
        summary.kept,
        summary.rows_read,
        summary.rows_other_lag
    );

    let dataset = LossDataset::new(observations)?;
    Ok((dataset, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
GRCODE,GRNAME,AccidentYear,DevelopmentLag,IncurLoss_B,EarnedPremNet_B
86,Alpha,1988,1,500,1000
86,Alpha,1988,10,900,1000
86,Alpha,1989,10,950,1100
337,Beta,1988,10,0,700
337,Beta,1989,10,420,800
";

    #[test]
    fn test_load_filters_lag_and_counts_drops() {
        let (ds, summary) = load_observations_from_reader(CSV.as_bytes(), &LoadOptions::default()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(
            summary,
            LoadSummary {
                rows_read: 5,
                rows_other_lag: 1,
                dropped_non_positive: 1,
                kept: 3,
            }
        );
        assert_eq!(ds.observations()[0].loss, 900.0);
    }

    #[test]
    fn test_missing_column_is_data_quality_error() {
        let csv = "GRCODE,AccidentYear,DevelopmentLag,IncurLoss_B\n1,1990,10,5\n";
        let err = load_observations_from_reader(csv.as_bytes(), &LoadOptions::default()).unwrap_err();
        match err {
            ModelError::DataQuality(msg) => assert!(msg.contains("EarnedPremNet_B")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_na_value_is_data_quality_error() {
        let csv = "GRCODE,AccidentYear,DevelopmentLag,IncurLoss_B,EarnedPremNet_B\n1,1990,10,NA,5\n";
        let err = load_observations_from_reader(csv.as_bytes(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ModelError::DataQuality(_)));
    }

    #[test]
    fn test_blank_and_unparsable_cells_name_the_row() {
        let blank = "GRCODE,AccidentYear,DevelopmentLag,IncurLoss_B,EarnedPremNet_B\n1,1990,10,5,7\n2,,10,5,7\n";
        match load_observations_from_reader(blank.as_bytes(), &LoadOptions::default()).unwrap_err() {
            ModelError::DataQuality(msg) => {
                assert!(msg.contains("row 3"), "{msg}");
                assert!(msg.contains("AccidentYear"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let garbled = "GRCODE,AccidentYear,DevelopmentLag,IncurLoss_B,EarnedPremNet_B\n1,1990,10,abc,7\n";
        match load_observations_from_reader(garbled.as_bytes(), &LoadOptions::default()).unwrap_err() {
            ModelError::DataQuality(msg) => assert!(msg.contains("row 2"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_padded_cells_are_trimmed() {
        let csv = "GRCODE, AccidentYear ,DevelopmentLag,IncurLoss_B,EarnedPremNet_B\n 7 , 1995 ,10, 120.5 ,300\n";
        let (ds, _) = load_observations_from_reader(csv.as_bytes(), &LoadOptions::default()).unwrap();
        assert_eq!(ds.observations()[0].company_id, 7);
        assert_eq!(ds.observations()[0].accident_year, 1995);
        assert_eq!(ds.observations()[0].loss, 120.5);
    }

    #[test]
    fn test_custom_lag() {
        let options = LoadOptions { fully_developed_lag: 1 };
        let (ds, _) = load_observations_from_reader(CSV.as_bytes(), &options).unwrap();
        assert_eq!(ds.len(), 1);
    }
}
