//! Error taxonomy and non-fatal fit warnings
//!
//! Fatal problems abort the specific model fit and are returned as
//! [`ModelError`]. Problems that leave a usable fit behind are collected as
//! [`FitWarning`] values and travel with the result.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised by data loading and model fitting
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing columns, NA values, non-positive loss/premium, duplicates
    #[error("data quality: {0}")]
    DataQuality(String),

    /// Log of a non-positive value, Inf/NaN produced by a division
    #[error("numeric domain: {0}")]
    NumericDomain(String),

    /// Response values the family cannot accept (e.g. zero or Inf for Gamma)
    #[error("invalid response for {family}: {message}")]
    InvalidResponse { family: String, message: String },

    /// Response carries no information for the likelihood (e.g. all-zero counts)
    #[error("degenerate response for {model}: {message}")]
    DegenerateResponse { model: String, message: String },

    /// Design matrix is rank deficient
    #[error("singular design for {model}: {message}")]
    SingularDesign { model: String, message: String },

    /// Optimizer exhausted its budget or diverged
    #[error("{model} did not converge after {iterations} iterations (last estimate {last_estimate:?})")]
    ConvergenceFailure {
        model: String,
        iterations: usize,
        last_estimate: Vec<f64>,
    },

    #[error("insufficient data for {model}: need {needed}, have {have}")]
    InsufficientData {
        model: String,
        needed: usize,
        have: usize,
    },

    #[error("insufficient exceedances above threshold {threshold}: need {needed}, have {have}")]
    InsufficientExceedances {
        threshold: f64,
        needed: usize,
        have: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// True for optimizer failures, which callers may choose to tolerate
    pub fn is_convergence_failure(&self) -> bool {
        matches!(self, ModelError::ConvergenceFailure { .. })
    }

    pub(crate) fn convergence(model: &str, iterations: usize, last_estimate: &[f64]) -> Self {
        ModelError::ConvergenceFailure {
            model: model.to_string(),
            iterations,
            last_estimate: last_estimate.to_vec(),
        }
    }
}

/// Non-fatal diagnostics attached to a fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitWarning {
    /// Pseudo-R² close to zero: the covariates explain almost nothing
    LowPseudoR2 { model: String, value: f64 },
    /// Pseudo-R² outside [0, 1]
    PseudoR2OutOfRange { model: String, value: f64 },
    /// Wald p-value above 0.05
    InsignificantCoefficient {
        model: String,
        term: String,
        p_value: f64,
    },
    /// Total fitted loss differs from actual by more than the configured bound
    PredictionBias { model: String, bias_pct: f64 },
    /// Rows whose rounded claim count is zero (implied severity is infinite)
    ZeroClaimRows { count: usize },
    /// Observed information was not positive definite
    StandardErrorsUnavailable { model: String },
    /// The optimizer stopped on its iteration budget; the estimate is the best point seen
    NotConverged { model: String, iterations: usize },
    /// Shape below -1, where the likelihood has no finite maximum
    UnboundedLikelihood { model: String, shape: f64 },
    /// The power profile has no single well-separated maximum
    AmbiguousPowerProfile { shape: String },
    /// The likelihood-ratio interval ran into the edge of the grid
    TruncatedPowerInterval { lower: bool, upper: bool },
}

impl fmt::Display for FitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitWarning::LowPseudoR2 { model, value } => {
                write!(f, "{model}: pseudo-R² {value:.4} is close to zero")
            }
            FitWarning::PseudoR2OutOfRange { model, value } => {
                write!(f, "{model}: pseudo-R² {value:.4} outside [0, 1]")
            }
            FitWarning::InsignificantCoefficient { model, term, p_value } => {
                write!(f, "{model}: coefficient '{term}' not significant (p = {p_value:.4})")
            }
            FitWarning::PredictionBias { model, bias_pct } => {
                write!(f, "{model}: total prediction bias {bias_pct:+.2}%")
            }
            FitWarning::ZeroClaimRows { count } => {
                write!(f, "{count} rows have zero synthetic claims (infinite implied severity)")
            }
            FitWarning::StandardErrorsUnavailable { model } => {
                write!(f, "{model}: standard errors unavailable")
            }
            FitWarning::NotConverged { model, iterations } => {
                write!(f, "{model}: optimizer did not converge in {iterations} iterations")
            }
            FitWarning::UnboundedLikelihood { model, shape } => {
                write!(f, "{model}: shape {shape:.4} < -1, maximum likelihood is not well defined")
            }
            FitWarning::AmbiguousPowerProfile { shape } => {
                write!(f, "power profile is {shape}; inspect the full curve")
            }
            FitWarning::TruncatedPowerInterval { lower, upper } => {
                write!(f, "power interval truncated at grid edge (lower: {lower}, upper: {upper})")
            }
        }
    }
}

/// Log each warning through the `log` facade
pub(crate) fn log_warnings(warnings: &[FitWarning]) {
    for w in warnings {
        log::warn!("{}", w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_failure_keeps_last_estimate() {
        let err = ModelError::convergence("tweedie", 25, &[1.5, -0.2]);
        assert!(err.is_convergence_failure());
        match err {
            ModelError::ConvergenceFailure { iterations, last_estimate, .. } => {
                assert_eq!(iterations, 25);
                assert_eq!(last_estimate, vec![1.5, -0.2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_insufficient_exceedances_message() {
        let err = ModelError::InsufficientExceedances { threshold: 10.0, needed: 5, have: 0 };
        assert!(err.to_string().contains("insufficient exceedances"));
    }
}
