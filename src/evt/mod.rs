//! Extreme value models of the loss tail
//!
//! - **GEV** on annual block maxima (one per accident year)
//! - **GPD** on exceedances of the full loss series over a percentile threshold
//!
//! Both are fitted by maximum likelihood with a Nelder–Mead search on
//! standardized data; standard errors come from the numerical observed
//! information and are omitted when it is not positive definite.

mod gev;
mod gpd;
mod optimize;

pub use gev::{fit_gev, GevFit, GevRegime, GevStdErrors};
pub use gpd::{empirical_quantile, fit_gpd, FitStatus, GpdFit, GpdRegime, GpdStdErrors};

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};

/// |ξ| below which a tail is reported as Gumbel / exponential
pub const LIGHT_TAIL_BAND: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GevConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for GevConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            tolerance: 1e-10,
        }
    }
}

impl GevConfig {
    pub fn validate(&self) -> Result<()> {
        validate_budget("gev", self.max_iterations, self.tolerance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpdConfig {
    /// Threshold percentile of the full loss series, in (0, 1]
    pub threshold_percentile: f64,

    /// Fewer exceedances than this fails the fit
    pub min_exceedances: usize,

    /// Budget of the first (full) attempt; the fallback gets ten times this
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for GpdConfig {
    fn default() -> Self {
        Self {
            threshold_percentile: 0.85,
            min_exceedances: 5,
            max_iterations: 2000,
            tolerance: 1e-10,
        }
    }
}

impl GpdConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold_percentile > 0.0 && self.threshold_percentile <= 1.0) {
            return Err(ModelError::InvalidConfig(format!(
                "gpd.threshold_percentile must be in (0, 1], got {}",
                self.threshold_percentile
            )));
        }
        if self.min_exceedances < 2 {
            return Err(ModelError::InvalidConfig(format!(
                "gpd.min_exceedances must be at least 2, got {}",
                self.min_exceedances
            )));
        }
        validate_budget("gpd", self.max_iterations, self.tolerance)
    }
}

fn validate_budget(section: &str, max_iterations: usize, tolerance: f64) -> Result<()> {
    if max_iterations == 0 {
        return Err(ModelError::InvalidConfig(format!("{}.max_iterations must be positive", section)));
    }
    if !(tolerance > 0.0) {
        return Err(ModelError::InvalidConfig(format!("{}.tolerance must be positive", section)));
    }
    Ok(())
}

/// Level exceeded on average once per `period`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnLevel {
    pub period: f64,
    pub level: f64,
}

fn check_period(period: f64) -> Result<()> {
    if period > 1.0 && period.is_finite() {
        Ok(())
    } else {
        Err(ModelError::InvalidConfig(format!("return period must be > 1, got {}", period)))
    }
}

/// Mean and population standard deviation
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(GevConfig::default().validate().is_ok());
        assert!(GpdConfig::default().validate().is_ok());
        let full = GpdConfig {
            threshold_percentile: 1.0,
            ..Default::default()
        };
        assert!(full.validate().is_ok());
        let zero = GpdConfig {
            threshold_percentile: 0.0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(ModelError::InvalidConfig(_))));
        let one_exceedance = GpdConfig {
            min_exceedances: 1,
            ..Default::default()
        };
        assert!(one_exceedance.validate().is_err());
    }

    #[test]
    fn test_check_period() {
        assert!(check_period(10.0).is_ok());
        assert!(check_period(1.0).is_err());
        assert!(check_period(f64::INFINITY).is_err());
    }
}
