//! Synthetic exposure and claim-count proxies
//!
//! Aggregate loss data carries no exposure or claim counts. This module
//! manufactures both from two assumed constants:
//!
//! - exposure = premium / premium_per_unit
//! - claim_count = round(loss / severity_per_claim)
//!
//! The constants are configuration, never estimated. Rows whose rounded
//! claim count is zero have an infinite implied severity; they are counted
//! and kept out of the severity regression.

mod model;

pub use model::FrequencySeverityModel;

use crate::data::LossDataset;
use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};

/// Assumed constants of the synthetic exposure model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Premium per exposure unit (e.g. average premium per car-year)
    pub premium_per_unit: f64,

    /// Average cost of one claim
    pub severity_per_claim: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            premium_per_unit: 1000.0,
            severity_per_claim: 5000.0,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("premium_per_unit", self.premium_per_unit),
            ("severity_per_claim", self.severity_per_claim),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ModelError::InvalidConfig(format!(
                    "synthetic.{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Observation extended with derived exposure fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyntheticRecord {
    pub company_id: u32,
    pub accident_year: i32,
    pub loss: f64,
    pub premium: f64,

    /// premium / premium_per_unit, not rounded
    pub exposure: f64,

    /// round(loss / severity_per_claim)
    pub claim_count: u64,

    /// claim_count / exposure
    pub implied_frequency: f64,

    /// loss / claim_count; +Inf when claim_count is zero
    pub implied_severity: f64,
}

impl SyntheticRecord {
    /// True when the implied severity is infinite (no synthetic claims)
    pub fn is_degenerate(&self) -> bool {
        self.claim_count == 0
    }
}

/// Derived fields for a whole dataset
#[derive(Debug, Clone)]
pub struct SyntheticExposure {
    pub records: Vec<SyntheticRecord>,

    /// Rows with claim_count == 0
    pub zero_claim_rows: usize,
}

impl SyntheticExposure {
    /// Records usable as severity observations (finite, positive implied severity)
    pub fn with_claims(&self) -> impl Iterator<Item = &SyntheticRecord> {
        self.records.iter().filter(|r| !r.is_degenerate())
    }
}

/// Derive exposure and claim-count proxies for every observation
pub fn derive_exposure(dataset: &LossDataset, config: &SyntheticConfig) -> Result<SyntheticExposure> {
    config.validate()?;

    let mut zero_claim_rows = 0;
    let records: Vec<SyntheticRecord> = dataset
        .iter()
        .map(|obs| {
            let exposure = obs.premium / config.premium_per_unit;
            let claim_count = (obs.loss / config.severity_per_claim).round() as u64;
            if claim_count == 0 {
                zero_claim_rows += 1;
            }
            let claims = claim_count as f64;
            SyntheticRecord {
                company_id: obs.company_id,
                accident_year: obs.accident_year,
                loss: obs.loss,
                premium: obs.premium,
                exposure,
                claim_count,
                implied_frequency: claims / exposure,
                implied_severity: if claim_count == 0 { f64::INFINITY } else { obs.loss / claims },
            }
        })
        .collect();

    if zero_claim_rows > 0 {
        log::warn!(
            "{} of {} rows round to zero synthetic claims (severity_per_claim = {})",
            zero_claim_rows,
            records.len(),
            config.severity_per_claim
        );
    }

    Ok(SyntheticExposure { records, zero_claim_rows })
}
