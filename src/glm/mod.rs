//! Generalized linear models with log link, fitted by IRLS
//!
//! Poisson frequency, Gamma severity and Tweedie aggregate regressions are
//! three [`Family`] configurations of the same engine:
//!
//! ```rust,ignore
//! use loss_models::glm::{Design, Family, GlmConfig, GlmEngine, GlmProblem, Irls};
//!
//! let design = Design::with_intercept(years.len()).column("year", years)?;
//! let problem = GlmProblem::new("frequency", &design, &counts, Family::Poisson)
//!     .with_offset(&log_exposure);
//! let fit = Irls::new(GlmConfig::default()).fit(&problem)?;
//! println!("deviance {:.3}, AIC {:.1}", fit.deviance, fit.aic);
//! ```

mod family;
mod fit;
mod irls;

pub use family::Family;
pub use fit::{Coefficient, GlmFit};
pub use irls::Irls;
pub(crate) use irls::MIN_DISPERSION;

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};

/// Name of the intercept column added by [`Design::with_intercept`]
pub const INTERCEPT: &str = "(Intercept)";

/// Iteration settings for IRLS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmConfig {
    pub max_iterations: usize,

    /// Relative deviance change |D - D_prev| / (|D| + 0.1) that ends iteration
    pub tolerance: f64,

    /// Step halvings allowed when an update gives a non-finite or larger deviance
    pub max_step_halvings: usize,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
            max_step_halvings: 30,
        }
    }
}

impl GlmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ModelError::InvalidConfig("glm.max_iterations must be positive".to_string()));
        }
        if !(self.tolerance > 0.0) {
            return Err(ModelError::InvalidConfig("glm.tolerance must be positive".to_string()));
        }
        Ok(())
    }
}

/// Column-major design matrix with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    n_rows: usize,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Design {
    /// Start a design with only an intercept column
    pub fn with_intercept(n_rows: usize) -> Self {
        Self {
            n_rows,
            names: vec![INTERCEPT.to_string()],
            columns: vec![vec![1.0; n_rows]],
        }
    }

    /// Append a named covariate column
    pub fn column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        if values.len() != self.n_rows {
            return Err(ModelError::DataQuality(format!(
                "column '{}' has {} values, design has {} rows",
                name,
                values.len(),
                self.n_rows
            )));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NumericDomain(format!(
                "column '{}' has non-finite value at row {}",
                name, idx
            )));
        }
        self.names.push(name.to_string());
        self.columns.push(values);
        Ok(self)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Value at (row, column)
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.columns[j][i]
    }

    /// x_iᵀ β
    #[inline]
    pub fn row_dot(&self, i: usize, beta: &[f64]) -> f64 {
        self.columns.iter().zip(beta).map(|(col, b)| col[i] * b).sum()
    }
}

/// Everything one GLM fit needs
#[derive(Debug, Clone)]
pub struct GlmProblem<'a> {
    /// Label used in logs and errors
    pub model: &'a str,
    pub design: &'a Design,
    pub response: &'a [f64],
    pub family: Family,
    /// Added to the linear predictor with coefficient fixed at 1
    pub offset: Option<&'a [f64]>,
    /// Prior weights
    pub weights: Option<&'a [f64]>,
}

impl<'a> GlmProblem<'a> {
    pub fn new(model: &'a str, design: &'a Design, response: &'a [f64], family: Family) -> Self {
        Self {
            model,
            design,
            response,
            family,
            offset: None,
            weights: None,
        }
    }

    pub fn with_offset(mut self, offset: &'a [f64]) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_weights(mut self, weights: &'a [f64]) -> Self {
        self.weights = Some(weights);
        self
    }
}

/// A GLM estimator
///
/// Implement this trait to plug in a different fitting algorithm; the
/// models in this crate only depend on the trait.
pub trait GlmEngine {
    fn fit(&self, problem: &GlmProblem<'_>) -> Result<GlmFit>;
}

/// Natural log of strictly positive values, for offsets and log covariates
pub fn log_values(values: &[f64], name: &str) -> Result<Vec<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v > 0.0 && v.is_finite() {
                Ok(v.ln())
            } else {
                Err(ModelError::NumericDomain(format!(
                    "log of non-positive {} at row {}: {}",
                    name, i, v
                )))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_design_builder() {
        let design = Design::with_intercept(3).column("year", vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(design.n_cols(), 2);
        assert_eq!(design.names(), &[INTERCEPT.to_string(), "year".to_string()]);
        assert_eq!(design.row_dot(2, &[0.5, 2.0]), 6.5);
    }

    #[test]
    fn test_design_rejects_length_mismatch() {
        assert!(Design::with_intercept(3).column("year", vec![1.0]).is_err());
    }

    #[test]
    fn test_log_values_rejects_non_positive() {
        let err = log_values(&[1.0, 0.0], "exposure").unwrap_err();
        assert!(matches!(err, ModelError::NumericDomain(_)));
        assert_eq!(log_values(&[1.0], "exposure").unwrap(), vec![0.0]);
    }
}
