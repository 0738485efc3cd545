//! Fitted GLM results

use super::Family;
use crate::error::FitWarning;
use serde::{Deserialize, Serialize};

/// One row of the coefficient table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    /// `None` when the covariance is degenerate (e.g. a perfect fit)
    pub std_error: Option<f64>,
    /// Wald statistic estimate / std_error
    pub statistic: Option<f64>,
    /// Two-sided p-value (normal for Poisson, Student-t otherwise)
    pub p_value: Option<f64>,
}

/// A converged GLM fit. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlmFit {
    pub family: Family,
    pub coefficients: Vec<Coefficient>,

    /// Pearson dispersion estimate (1 for Poisson)
    pub pearson_dispersion: f64,

    pub deviance: f64,
    pub null_deviance: f64,
    pub log_likelihood: f64,
    pub aic: f64,

    pub n_obs: usize,
    pub df_residual: usize,
    pub iterations: usize,

    /// Fitted means μ̂, always positive under the log link
    pub fitted: Vec<f64>,
    pub deviance_residuals: Vec<f64>,
}

impl GlmFit {
    /// Coefficient estimates in design column order
    pub fn estimates(&self) -> Vec<f64> {
        self.coefficients.iter().map(|c| c.estimate).collect()
    }

    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    /// 1 - D / D₀; `None` when the null deviance is zero
    pub fn pseudo_r2(&self) -> Option<f64> {
        if self.null_deviance > 0.0 {
            Some(1.0 - self.deviance / self.null_deviance)
        } else {
            None
        }
    }

    /// Predicted mean for a covariate row ordered like the design, plus offset
    pub fn predict(&self, row: &[f64], offset: f64) -> f64 {
        let eta: f64 = self.coefficients.iter().zip(row).map(|(c, x)| c.estimate * x).sum();
        (eta + offset).exp()
    }

    /// Standard fit-quality warnings: pseudo-R² range and insignificant slopes
    pub fn quality_warnings(&self, model: &str) -> Vec<FitWarning> {
        let mut warnings = Vec::new();

        match self.pseudo_r2() {
            Some(r2) if !(0.0..=1.0).contains(&r2) => {
                warnings.push(FitWarning::PseudoR2OutOfRange { model: model.to_string(), value: r2 });
            }
            Some(r2) if r2 < 0.05 => {
                warnings.push(FitWarning::LowPseudoR2 { model: model.to_string(), value: r2 });
            }
            // Constant response: no null deviance to compare against
            Some(_) | None => {}
        }

        for coef in self.coefficients.iter().skip(1) {
            if let Some(p) = coef.p_value {
                if p > 0.05 {
                    warnings.push(FitWarning::InsignificantCoefficient {
                        model: model.to_string(),
                        term: coef.name.clone(),
                        p_value: p,
                    });
                }
            }
        }

        warnings
    }
}
