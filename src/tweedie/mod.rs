//! Direct Tweedie compound Poisson-Gamma model of aggregate losses
//!
//! The power parameter is chosen by profile likelihood over a grid
//! ([`search_power`]), then a single GLM `loss ~ year + log(premium)` is fitted
//! at the chosen power ([`TweedieModel`]).

mod model;
mod profile;
mod validation;

pub use model::{TweedieModel, LOG_PREMIUM};
pub use profile::{search_power, PowerProfile, ProfilePoint, ProfileShape};
pub use validation::{cross_validate, CrossValidation, CvConfig, FoldResult};

use crate::error::{ModelError, Result};
use crate::glm::Design;
use crate::data::LossDataset;
use serde::{Deserialize, Serialize};

/// Slack allowed when the last grid point lands on `end` up to rounding
const GRID_EPS: f64 = 1e-9;

/// Candidate power values for the profile search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerGrid {
    pub start: f64,
    pub end: f64,
    pub step: f64,

    /// Confidence level of the likelihood-ratio interval for p
    pub ci_level: f64,
}

impl Default for PowerGrid {
    fn default() -> Self {
        Self {
            start: 1.1,
            end: 1.9,
            step: 0.05,
            ci_level: 0.95,
        }
    }
}

impl PowerGrid {
    pub fn new(start: f64, end: f64, step: f64) -> Self {
        Self {
            start,
            end,
            step,
            ..Default::default()
        }
    }

    /// Grid points start, start + step, ... up to end
    ///
    /// Points are computed by index, not by repeated addition, so a fine grid
    /// does not drift.
    pub fn points(&self) -> Result<Vec<f64>> {
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(ModelError::InvalidConfig(format!(
                "power_search.step must be positive, got {}",
                self.step
            )));
        }
        if !(self.start > 1.0 && self.end < 2.0) {
            return Err(ModelError::InvalidConfig(format!(
                "power grid [{}, {}] must lie strictly inside (1, 2)",
                self.start, self.end
            )));
        }
        if self.start > self.end {
            return Err(ModelError::InvalidConfig(format!(
                "power grid start {} is after end {}",
                self.start, self.end
            )));
        }
        if !(self.ci_level > 0.0 && self.ci_level < 1.0) {
            return Err(ModelError::InvalidConfig(format!(
                "power_search.ci_level must be in (0, 1), got {}",
                self.ci_level
            )));
        }

        let n = ((self.end - self.start) / self.step + GRID_EPS).floor() as usize;
        Ok((0..=n).map(|i| self.start + i as f64 * self.step).collect())
    }
}

/// Design `intercept + year + log(premium)` shared by the profile and the final fit
pub(crate) fn aggregate_design(dataset: &LossDataset) -> Result<Design> {
    let premiums: Vec<f64> = dataset.iter().map(|o| o.premium).collect();
    let log_premium = crate::glm::log_values(&premiums, "premium")?;
    let years: Vec<f64> = dataset.iter().map(|o| o.accident_year as f64).collect();

    Design::with_intercept(dataset.len())
        .column("year", years)?
        .column(LOG_PREMIUM, log_premium)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_grid() {
        let points = PowerGrid::default().points().unwrap();
        assert_eq!(points.len(), 17);
        assert_relative_eq!(points[0], 1.1);
        assert_relative_eq!(points[16], 1.9, epsilon = 1e-12);
        assert!(points.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_fine_grid_has_no_drift() {
        let points = PowerGrid::new(1.1, 1.9, 0.01).points().unwrap();
        assert_eq!(points.len(), 81);
        assert_relative_eq!(points[40], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_bad_grids() {
        for grid in [
            PowerGrid::new(1.0, 1.5, 0.1),
            PowerGrid::new(1.2, 2.0, 0.1),
            PowerGrid::new(1.5, 1.2, 0.1),
            PowerGrid::new(1.2, 1.5, 0.0),
            PowerGrid::new(1.2, 1.5, -0.1),
        ] {
            assert!(matches!(grid.points(), Err(ModelError::InvalidConfig(_))), "{:?}", grid);
        }
    }

    #[test]
    fn test_single_point_grid() {
        assert_eq!(PowerGrid::new(1.5, 1.5, 0.1).points().unwrap(), vec![1.5]);
    }
}
