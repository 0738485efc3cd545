//! Generalized Extreme Value fit on block maxima

use super::optimize::{covariance, nelder_mead, Minimum};
use super::{check_period, mean_std, GevConfig, ReturnLevel, LIGHT_TAIL_BAND};
use crate::error::{FitWarning, ModelError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const MODEL: &str = "gev";

/// Below this |ξ| the Gumbel limit of the density is used
const GUMBEL_LIMIT: f64 = 1e-8;

/// Starting shapes; the best converged start wins
const START_SHAPES: [f64; 4] = [0.1, -0.1, 0.0, 0.4];

/// Below this shape the likelihood grows without bound as μ nears the sample maximum
const UNBOUNDED_SHAPE: f64 = -1.0;

const EULER_GAMMA: f64 = 0.5772156649015329;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "regime", rename_all = "snake_case")]
pub enum GevRegime {
    /// |ξ| < 0.05
    Gumbel,
    /// ξ > 0, heavy upper tail
    Frechet,
    /// ξ < 0, bounded above by `upper_endpoint`
    Weibull { upper_endpoint: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GevStdErrors {
    pub location: f64,
    pub scale: f64,
    pub shape: f64,
}

/// GEV(μ, σ, ξ) fitted to annual maxima
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GevFit {
    pub location: f64,
    pub scale: f64,
    pub shape: f64,
    pub std_errors: Option<GevStdErrors>,
    pub log_likelihood: f64,
    pub n_maxima: usize,
    pub converged: bool,
    pub iterations: usize,
    pub regime: GevRegime,
}

impl GevFit {
    /// Quantile at 1 - 1/T: the level exceeded once every `period` years on average
    pub fn return_level(&self, period: f64) -> Result<f64> {
        check_period(period)?;
        let y = -(1.0 - 1.0 / period).ln();
        Ok(if self.shape.abs() < GUMBEL_LIMIT {
            self.location - self.scale * y.ln()
        } else {
            self.location + self.scale / self.shape * (y.powf(-self.shape) - 1.0)
        })
    }

    pub fn return_levels(&self, periods: &[f64]) -> Result<Vec<ReturnLevel>> {
        periods
            .iter()
            .map(|&period| Ok(ReturnLevel { period, level: self.return_level(period)? }))
            .collect()
    }

    pub fn warnings(&self) -> Vec<FitWarning> {
        let mut warnings = Vec::new();
        if !self.converged {
            warnings.push(FitWarning::NotConverged {
                model: MODEL.to_string(),
                iterations: self.iterations,
            });
        }
        if self.shape < UNBOUNDED_SHAPE {
            warnings.push(FitWarning::UnboundedLikelihood {
                model: MODEL.to_string(),
                shape: self.shape,
            });
        }
        if self.std_errors.is_none() {
            warnings.push(FitWarning::StandardErrorsUnavailable { model: MODEL.to_string() });
        }
        warnings
    }
}

/// Negative log-likelihood over (μ, log σ, ξ)
fn gev_nll(data: &[f64], params: &[f64]) -> f64 {
    let (mu, log_sigma, xi) = (params[0], params[1], params[2]);
    let sigma = log_sigma.exp();
    if !sigma.is_finite() || sigma <= 0.0 {
        return f64::INFINITY;
    }

    let mut nll = data.len() as f64 * log_sigma;
    if xi.abs() < GUMBEL_LIMIT {
        for &x in data {
            let z = (x - mu) / sigma;
            nll += z + (-z).exp();
        }
    } else {
        let inv_xi = 1.0 / xi;
        for &x in data {
            let t = 1.0 + xi * (x - mu) / sigma;
            if t <= 0.0 {
                return f64::INFINITY;
            }
            nll += (1.0 + inv_xi) * t.ln() + t.powf(-inv_xi);
        }
    }
    if nll.is_finite() {
        nll
    } else {
        f64::INFINITY
    }
}

/// Fit a GEV to block maxima
///
/// The search runs on maxima standardized to zero mean and unit variance,
/// starting from the Gumbel method-of-moments location and scale at each
/// of several shapes.
pub fn fit_gev(maxima: &[f64], config: &GevConfig) -> Result<GevFit> {
    config.validate()?;
    if maxima.len() < 3 {
        return Err(ModelError::InsufficientData {
            model: MODEL.to_string(),
            needed: 3,
            have: maxima.len(),
        });
    }
    if let Some(x) = maxima.iter().find(|x| !x.is_finite()) {
        return Err(ModelError::DataQuality(format!("non-finite block maximum {}", x)));
    }

    let (center, spread) = mean_std(maxima);
    if !(spread > 0.0) {
        return Err(ModelError::DegenerateResponse {
            model: MODEL.to_string(),
            message: "all block maxima are equal".to_string(),
        });
    }
    let z: Vec<f64> = maxima.iter().map(|x| (x - center) / spread).collect();
    let nll = |p: &[f64]| gev_nll(&z, p);

    // Standardized data have unit variance
    let sigma0 = 6.0_f64.sqrt() / PI;
    let mu0 = -EULER_GAMMA * sigma0;

    let mut best: Option<Minimum> = None;
    for &xi0 in &START_SHAPES {
        let start = [mu0, sigma0.ln(), xi0];
        if !nll(&start).is_finite() {
            continue;
        }
        let run = nelder_mead(nll, &start, &[0.1, 0.1, 0.1], config.max_iterations, config.tolerance)?;
        log::debug!(
            "gev start xi = {}: nll {:.8}, converged {}, {} iterations",
            xi0,
            run.value,
            run.converged,
            run.iterations
        );
        best = match best {
            Some(b) if (b.converged && !run.converged) || (b.converged == run.converged && b.value <= run.value) => Some(b),
            _ => Some(run),
        };
    }

    let best = match best {
        Some(b) if b.value.is_finite() => b,
        Some(b) => return Err(ModelError::convergence(MODEL, b.iterations, &b.x)),
        None => return Err(ModelError::convergence(MODEL, 0, &[mu0, sigma0.ln(), START_SHAPES[0]])),
    };

    let (mu_z, log_sigma_z, xi) = (best.x[0], best.x[1], best.x[2]);
    let sigma_z = log_sigma_z.exp();
    let location = center + spread * mu_z;
    let scale = spread * sigma_z;

    let std_errors = covariance(&nll, &best.x).map(|cov| GevStdErrors {
        location: spread * cov[0][0].sqrt(),
        scale: scale * cov[1][1].sqrt(),
        shape: cov[2][2].sqrt(),
    });

    let regime = if xi.abs() < LIGHT_TAIL_BAND {
        GevRegime::Gumbel
    } else if xi > 0.0 {
        GevRegime::Frechet
    } else {
        GevRegime::Weibull {
            upper_endpoint: location - scale / xi,
        }
    };

    let fit = GevFit {
        location,
        scale,
        shape: xi,
        std_errors,
        log_likelihood: -best.value - maxima.len() as f64 * spread.ln(),
        n_maxima: maxima.len(),
        converged: best.converged,
        iterations: best.iterations,
        regime,
    };

    if !fit.converged {
        log::warn!("gev search stopped after {} iterations without converging", fit.iterations);
    }
    log::info!(
        "gev on {} maxima: location {:.4e}, scale {:.4e}, shape {:.4} ({:?})",
        fit.n_maxima,
        fit.location,
        fit.scale,
        fit.shape,
        fit.regime
    );
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// GEV quantiles at plotting positions (i - 0.5) / n
    fn gev_sample(n: usize, mu: f64, sigma: f64, xi: f64) -> Vec<f64> {
        (1..=n)
            .map(|i| {
                let p = (i as f64 - 0.5) / n as f64;
                let y = -p.ln();
                if xi.abs() < 1e-12 {
                    mu - sigma * y.ln()
                } else {
                    mu + sigma / xi * (y.powf(-xi) - 1.0)
                }
            })
            .collect()
    }

    #[test]
    fn test_recovers_gumbel_parameters() {
        let data = gev_sample(200, 1_000.0, 250.0, 0.0);
        let fit = fit_gev(&data, &GevConfig::default()).unwrap();
        assert!(fit.converged);
        assert_relative_eq!(fit.location, 1_000.0, max_relative = 0.03);
        assert_relative_eq!(fit.scale, 250.0, max_relative = 0.08);
        assert!(fit.shape.abs() < 0.05, "shape {}", fit.shape);
        assert_eq!(fit.regime, GevRegime::Gumbel);
        assert!(fit.std_errors.is_some());
    }

    #[test]
    fn test_frechet_and_weibull_regimes() {
        let heavy = fit_gev(&gev_sample(200, 10.0, 2.0, 0.3), &GevConfig::default()).unwrap();
        assert!(heavy.shape > 0.15, "shape {}", heavy.shape);
        assert_eq!(heavy.regime, GevRegime::Frechet);

        let bounded = fit_gev(&gev_sample(200, 10.0, 2.0, -0.3), &GevConfig::default()).unwrap();
        assert!(bounded.shape < -0.15, "shape {}", bounded.shape);
        match bounded.regime {
            GevRegime::Weibull { upper_endpoint } => {
                assert_relative_eq!(upper_endpoint, bounded.location - bounded.scale / bounded.shape);
                assert!(upper_endpoint > 10.0);
            }
            other => panic!("expected Weibull, got {:?}", other),
        }
    }

    #[test]
    fn test_return_level_formula() {
        let fit = GevFit {
            location: 100.0,
            scale: 20.0,
            shape: 0.2,
            std_errors: None,
            log_likelihood: 0.0,
            n_maxima: 10,
            converged: true,
            iterations: 0,
            regime: GevRegime::Frechet,
        };
        let y: f64 = -(0.99_f64).ln();
        assert_relative_eq!(fit.return_level(100.0).unwrap(), 100.0 + 100.0 * (y.powf(-0.2) - 1.0), epsilon = 1e-9);

        let gumbel = GevFit { shape: 0.0, regime: GevRegime::Gumbel, ..fit.clone() };
        assert_relative_eq!(gumbel.return_level(100.0).unwrap(), 100.0 - 20.0 * y.ln(), epsilon = 1e-9);

        let levels = fit.return_levels(&[10.0, 50.0, 200.0]).unwrap();
        assert!(levels.windows(2).all(|w| w[1].level > w[0].level));
        assert!(fit.return_level(0.5).is_err());
        assert_eq!(fit.warnings().len(), 1);
    }

    #[test]
    fn test_too_few_maxima() {
        let err = fit_gev(&[1.0, 2.0], &GevConfig::default()).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { needed: 3, have: 2, .. }));
    }

    #[test]
    fn test_tied_pair_with_outlier_is_flagged() {
        // Two equal maxima let the scale collapse onto them
        let fit = fit_gev(&[1.0, 1.0, 5.0], &GevConfig::default()).unwrap();
        assert!(!fit.converged || fit.std_errors.is_none(), "{:?}", fit);
        let warnings = fit.warnings();
        if !fit.converged {
            assert!(warnings.iter().any(|w| matches!(w, FitWarning::NotConverged { .. })));
        }
        if fit.std_errors.is_none() {
            assert!(warnings.iter().any(|w| matches!(w, FitWarning::StandardErrorsUnavailable { .. })));
        }
    }

    #[test]
    fn test_shape_below_minus_one_is_flagged() {
        let fit = fit_gev(&[1.0, 2.0, 3.0], &GevConfig::default()).unwrap();
        if fit.shape < UNBOUNDED_SHAPE {
            assert!(fit
                .warnings()
                .iter()
                .any(|w| matches!(w, FitWarning::UnboundedLikelihood { shape, .. } if *shape < -1.0)));
        }

        let synthetic = GevFit {
            location: 2.0,
            scale: 1.0,
            shape: -1.5,
            std_errors: None,
            log_likelihood: 0.0,
            n_maxima: 3,
            converged: true,
            iterations: 40,
            regime: GevRegime::Weibull { upper_endpoint: 2.0 + 1.0 / 1.5 },
        };
        let warnings = synthetic.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], FitWarning::UnboundedLikelihood { shape, .. } if shape == -1.5));
        assert!(!warnings.iter().any(|w| matches!(w, FitWarning::NotConverged { .. })));

        let stalled = GevFit { converged: false, shape: 0.2, ..synthetic };
        assert!(matches!(stalled.warnings()[0], FitWarning::NotConverged { iterations: 40, .. }));
    }

    #[test]
    fn test_refit_is_identical() {
        let data = gev_sample(30, 5.0, 1.0, 0.1);
        let a = fit_gev(&data, &GevConfig::default()).unwrap();
        let b = fit_gev(&data, &GevConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
