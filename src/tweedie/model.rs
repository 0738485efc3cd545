//! Tweedie GLM at a fixed power

use super::aggregate_design;
use crate::compare::LossPredictor;
use crate::data::{LossDataset, Observation};
use crate::error::{FitWarning, ModelError, Result};
use crate::glm::{Family, GlmEngine, GlmFit, GlmProblem, MIN_DISPERSION};
use serde::{Deserialize, Serialize};

/// Name of the log-premium covariate
pub const LOG_PREMIUM: &str = "log_premium";

const MODEL: &str = "tweedie";

/// log E[loss] = β₀ + β₁·year + β₂·log(premium), Var = φ·μ^p
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweedieModel {
    /// Power parameter p ∈ (1, 2)
    pub power: f64,

    /// Saddlepoint dispersion estimate D / n
    pub dispersion: f64,

    pub fit: GlmFit,

    pub warnings: Vec<FitWarning>,
}

impl TweedieModel {
    pub fn fit<E: GlmEngine>(dataset: &LossDataset, power: f64, engine: &E) -> Result<Self> {
        let design = aggregate_design(dataset)?;
        let losses = dataset.losses();
        let family = Family::Tweedie { power };
        let fit = engine.fit(&GlmProblem::new(MODEL, &design, &losses, family))?;

        let dispersion = (fit.deviance / fit.n_obs as f64).max(MIN_DISPERSION);
        let warnings = fit.quality_warnings(MODEL);

        log::info!(
            "tweedie p = {:.3}: dispersion {:.6e} (Pearson {:.6e}), pseudo-R² {}",
            power,
            dispersion,
            fit.pearson_dispersion,
            fit.pseudo_r2().map_or_else(|| "n/a".to_string(), |r2| format!("{:.4}", r2))
        );

        Ok(Self {
            power,
            dispersion,
            fit,
            warnings,
        })
    }

    pub fn pseudo_r2(&self) -> Option<f64> {
        self.fit.pseudo_r2()
    }

    /// Expected loss for an accident year and premium volume
    pub fn predict(&self, accident_year: i32, premium: f64) -> Result<f64> {
        if !(premium > 0.0) || !premium.is_finite() {
            return Err(ModelError::NumericDomain(format!(
                "premium must be positive and finite for prediction, got {}",
                premium
            )));
        }
        Ok(self.mean(accident_year, premium))
    }

    fn mean(&self, accident_year: i32, premium: f64) -> f64 {
        self.fit.predict(&[1.0, accident_year as f64, premium.ln()], 0.0)
    }
}

impl LossPredictor for TweedieModel {
    fn name(&self) -> &str {
        "tweedie"
    }

    fn predict_loss(&self, observation: &Observation) -> f64 {
        // Observations always carry a positive premium
        self.mean(observation.accident_year, observation.premium)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::{GlmConfig, Irls};
    use approx::assert_relative_eq;

    fn dataset() -> LossDataset {
        let mut obs = Vec::new();
        for (c, premium) in [(1u32, 900.0), (2, 2_500.0), (3, 6_000.0), (4, 15_000.0), (5, 40_000.0)] {
            for (k, year) in (1988..1997).enumerate() {
                let noise = 1.0 + 0.15 * (((c as usize * 7 + k * 3) % 5) as f64 - 2.0) / 2.0;
                let p = premium * (1.0 + 0.02 * k as f64);
                obs.push(Observation::new(c, year, 0.7 * p * noise, p));
            }
        }
        LossDataset::new(obs).unwrap()
    }

    #[test]
    fn test_fit_reports_coefficients_and_dispersion() {
        let engine = Irls::new(GlmConfig::default());
        let ds = dataset();
        let model = TweedieModel::fit(&ds, 1.5, &engine).unwrap();

        assert_eq!(model.fit.coefficients.len(), 3);
        let slope = model.fit.coefficient(LOG_PREMIUM).unwrap().estimate;
        assert_relative_eq!(slope, 1.0, epsilon = 0.05);
        assert_relative_eq!(model.dispersion, model.fit.deviance / ds.len() as f64);
        assert!(model.fit.fitted.iter().all(|&m| m > 0.0));

        let r2 = model.pseudo_r2().unwrap();
        assert!((0.0..=1.0).contains(&r2));
    }

    #[test]
    fn test_predictions_positive_and_checked() {
        let engine = Irls::new(GlmConfig::default());
        let model = TweedieModel::fit(&dataset(), 1.6, &engine).unwrap();
        assert!(model.predict(2010, 1e-6).unwrap() > 0.0);
        assert!(model.predict(1990, 1e7).unwrap() > 0.0);
        assert!(matches!(model.predict(1990, 0.0), Err(ModelError::NumericDomain(_))));
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let engine = Irls::new(GlmConfig::default());
        let model = TweedieModel::fit(&dataset(), 1.45, &engine).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: TweedieModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.power, model.power);
        assert_eq!(back.dispersion, model.dispersion);
        assert_eq!(back.fit.estimates(), model.fit.estimates());
        assert_eq!(back.predict(1995, 3_000.0).unwrap(), model.predict(1995, 3_000.0).unwrap());
    }

    #[test]
    fn test_refit_is_idempotent() {
        let engine = Irls::new(GlmConfig::default());
        let ds = dataset();
        let a = TweedieModel::fit(&ds, 1.5, &engine).unwrap();
        let b = TweedieModel::fit(&ds, 1.5, &engine).unwrap();
        assert_eq!(a, b);
    }
}
