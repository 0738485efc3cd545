//! Frequency (Poisson) and severity (Gamma) GLM pair on synthetic fields

use super::{derive_exposure, SyntheticConfig, SyntheticExposure, SyntheticRecord};
use crate::compare::LossPredictor;
use crate::data::{LossDataset, Observation};
use crate::error::{FitWarning, ModelError, Result};
use crate::glm::{log_values, Design, Family, GlmEngine, GlmFit, GlmProblem};
use serde::{Deserialize, Serialize};

const FREQUENCY_MODEL: &str = "frequency";
const SEVERITY_MODEL: &str = "severity";

/// Synthetic compound Poisson-Gamma model
///
/// Frequency: log E[claims] = β₀ + β₁·year + log(exposure)
/// Severity:  log E[severity] = γ₀ + γ₁·year, weighted by claim count
///
/// The pure premium is the product of the two, which assumes frequency and
/// severity are independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencySeverityModel {
    pub config: SyntheticConfig,
    pub frequency: GlmFit,
    pub severity: GlmFit,

    /// Rows used by the severity fit (claim_count > 0)
    pub severity_rows: usize,

    /// Rows excluded from the severity fit because their implied severity is infinite
    pub zero_claim_rows: usize,

    pub warnings: Vec<FitWarning>,
}

impl FrequencySeverityModel {
    /// Derive synthetic fields and fit both GLMs
    pub fn fit<E: GlmEngine>(dataset: &LossDataset, config: &SyntheticConfig, engine: &E) -> Result<Self> {
        let derived = derive_exposure(dataset, config)?;
        Self::fit_derived(&derived, config, engine)
    }

    /// Fit both GLMs on already derived synthetic fields
    pub fn fit_derived<E: GlmEngine>(derived: &SyntheticExposure, config: &SyntheticConfig, engine: &E) -> Result<Self> {
        let frequency = fit_frequency(&derived.records, engine)?;

        let claim_rows: Vec<SyntheticRecord> = derived.with_claims().copied().collect();
        let severity = fit_severity(&claim_rows, engine)?;

        let mut warnings = Vec::new();
        if derived.zero_claim_rows > 0 {
            warnings.push(FitWarning::ZeroClaimRows {
                count: derived.zero_claim_rows,
            });
        }
        warnings.extend(frequency.quality_warnings(FREQUENCY_MODEL));
        warnings.extend(severity.quality_warnings(SEVERITY_MODEL));

        Ok(Self {
            config: config.clone(),
            frequency,
            severity,
            severity_rows: claim_rows.len(),
            zero_claim_rows: derived.zero_claim_rows,
            warnings,
        })
    }

    /// Expected claims per exposure unit in an accident year
    pub fn predict_frequency(&self, accident_year: i32) -> f64 {
        self.frequency.predict(&[1.0, accident_year as f64], 0.0)
    }

    /// Expected cost per claim in an accident year
    pub fn predict_severity(&self, accident_year: i32) -> f64 {
        self.severity.predict(&[1.0, accident_year as f64], 0.0)
    }

    /// Frequency × severity per exposure unit
    pub fn pure_premium(&self, accident_year: i32) -> f64 {
        self.predict_frequency(accident_year) * self.predict_severity(accident_year)
    }

    /// Pure premium × exposure implied by the premium
    pub fn predict_total_loss(&self, accident_year: i32, premium: f64) -> f64 {
        self.pure_premium(accident_year) * premium / self.config.premium_per_unit
    }
}

impl LossPredictor for FrequencySeverityModel {
    fn name(&self) -> &str {
        "synthetic_cp_gamma"
    }

    fn predict_loss(&self, observation: &Observation) -> f64 {
        self.predict_total_loss(observation.accident_year, observation.premium)
    }
}

/// Poisson GLM of claim counts on year with log-exposure offset
///
/// Claim counts that are all zero or all equal are rejected as degenerate
/// before fitting.
///
/// Exposure is not guarded here beyond the log: a non-positive exposure is a
/// `NumericDomain` error.
pub fn fit_frequency<E: GlmEngine>(records: &[SyntheticRecord], engine: &E) -> Result<GlmFit> {
    let exposure: Vec<f64> = records.iter().map(|r| r.exposure).collect();
    let offset = log_values(&exposure, "exposure")?;
    let counts: Vec<f64> = records.iter().map(|r| r.claim_count as f64).collect();
    if let Some(&first) = counts.first() {
        if counts.iter().all(|&c| c == first) {
            // No variation left for the year effect to explain; the rate coefficient only tracks exposure
            return Err(ModelError::DegenerateResponse {
                model: FREQUENCY_MODEL.to_string(),
                message: if first == 0.0 {
                    "all claim counts are zero; the intercept diverges to -inf".to_string()
                } else {
                    format!("every record has the same claim count ({})", first)
                },
            });
        }
    }
    let years: Vec<f64> = records.iter().map(|r| r.accident_year as f64).collect();

    let design = Design::with_intercept(records.len()).column("year", years)?;
    let problem = GlmProblem::new(FREQUENCY_MODEL, &design, &counts, Family::Poisson).with_offset(&offset);
    engine.fit(&problem)
}

/// Gamma GLM of implied severity on year, weighted by claim count
///
/// Any zero or infinite implied severity is rejected before fitting.
pub fn fit_severity<E: GlmEngine>(records: &[SyntheticRecord], engine: &E) -> Result<GlmFit> {
    let severity: Vec<f64> = records.iter().map(|r| r.implied_severity).collect();
    if let Some(idx) = severity.iter().position(|s| !s.is_finite() || *s <= 0.0) {
        return Err(ModelError::InvalidResponse {
            family: Family::Gamma.name(),
            message: format!(
                "implied severity {} for company {} year {} (claim_count = {})",
                severity[idx], records[idx].company_id, records[idx].accident_year, records[idx].claim_count
            ),
        });
    }

    let weights: Vec<f64> = records.iter().map(|r| r.claim_count as f64).collect();
    let years: Vec<f64> = records.iter().map(|r| r.accident_year as f64).collect();

    let design = Design::with_intercept(records.len()).column("year", years)?;
    let problem = GlmProblem::new(SEVERITY_MODEL, &design, &severity, Family::Gamma).with_weights(&weights);
    engine.fit(&problem)
}
