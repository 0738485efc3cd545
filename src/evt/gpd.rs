//! Generalized Pareto fit on threshold exceedances (peaks over threshold)

use super::optimize::{covariance, nelder_mead};
use super::{check_period, GpdConfig, ReturnLevel, LIGHT_TAIL_BAND};
use crate::error::{FitWarning, ModelError, Result};
use serde::{Deserialize, Serialize};

const MODEL: &str = "gpd";

/// Below this |ξ| the exponential limit of the density is used
const EXPONENTIAL_LIMIT: f64 = 1e-8;

/// Below this |ξ| the return level uses the logarithmic form
const RETURN_LEVEL_SWITCH: f64 = 1e-6;

/// Budget multiplier of the fallback search
const FALLBACK_BUDGET: usize = 10;

/// Whether the fit carries standard errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Converged MLE with standard errors
    Full,
    /// Converged only on the larger-budget retry; no standard errors
    DegradedNoStandardErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "regime", rename_all = "snake_case")]
pub enum GpdRegime {
    /// |ξ| < 0.05
    Exponential,
    /// 0 < ξ < 0.5
    HeavyFiniteVariance,
    /// ξ ≥ 0.5
    InfiniteVariance,
    /// ξ < 0, losses bounded by `upper_endpoint`
    Bounded { upper_endpoint: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpdStdErrors {
    pub scale: f64,
    pub shape: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpdFit {
    /// Threshold u
    pub threshold: f64,
    pub threshold_percentile: f64,
    pub scale: f64,
    pub shape: f64,
    pub std_errors: Option<GpdStdErrors>,
    pub n_exceedances: usize,
    pub n_total: usize,
    /// ζ = n_exceedances / n_total
    pub exceedance_rate: f64,
    pub log_likelihood: f64,
    pub status: FitStatus,
    pub iterations: usize,
    pub regime: GpdRegime,
}

impl GpdFit {
    /// Loss level exceeded on average once every `period` observations
    ///
    /// u + σ·ln(Tζ) when |ξ| < 1e-6, else u + (σ/ξ)((Tζ)^ξ - 1).
    pub fn return_level(&self, period: f64) -> Result<f64> {
        check_period(period)?;
        let m = period * self.exceedance_rate;
        Ok(if self.shape.abs() < RETURN_LEVEL_SWITCH {
            self.threshold + self.scale * m.ln()
        } else {
            self.threshold + self.scale / self.shape * (m.powf(self.shape) - 1.0)
        })
    }

    pub fn return_levels(&self, periods: &[f64]) -> Result<Vec<ReturnLevel>> {
        periods
            .iter()
            .map(|&period| Ok(ReturnLevel { period, level: self.return_level(period)? }))
            .collect()
    }

    pub fn warnings(&self) -> Vec<FitWarning> {
        if self.std_errors.is_none() {
            vec![FitWarning::StandardErrorsUnavailable { model: MODEL.to_string() }]
        } else {
            Vec::new()
        }
    }
}

/// Linear-interpolation quantile (`q` in [0, 1]); `None` for an empty series
pub fn empirical_quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let idx = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    let frac = idx - lo as f64;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

/// Negative log-likelihood over (log σ, ξ)
fn gpd_nll(exceedances: &[f64], params: &[f64]) -> f64 {
    let (log_sigma, xi) = (params[0], params[1]);
    let sigma = log_sigma.exp();
    if !sigma.is_finite() || sigma <= 0.0 {
        return f64::INFINITY;
    }

    let n = exceedances.len() as f64;
    let nll = if xi.abs() < EXPONENTIAL_LIMIT {
        n * log_sigma + exceedances.iter().sum::<f64>() / sigma
    } else {
        let mut nll = n * log_sigma;
        for &y in exceedances {
            let t = 1.0 + xi * y / sigma;
            if t <= 0.0 {
                return f64::INFINITY;
            }
            nll += (1.0 + 1.0 / xi) * t.ln();
        }
        nll
    };
    if nll.is_finite() {
        nll
    } else {
        f64::INFINITY
    }
}

/// Probability-weighted-moment estimates (σ, ξ)
///
/// a₀ = E[Y], a₁ = E[Y(1 - F(Y))]; ξ = 2 - a₀/(a₀ - 2a₁), σ = 2a₀a₁/(a₀ - 2a₁).
fn pwm_estimate(exceedances: &[f64]) -> (f64, f64) {
    let mut sorted = exceedances.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;

    let a0 = sorted.iter().sum::<f64>() / n;
    let a1 = sorted
        .iter()
        .enumerate()
        .map(|(i, &y)| (n - 1.0 - i as f64) / (n - 1.0).max(1.0) * y)
        .sum::<f64>()
        / n;

    let denom = a0 - 2.0 * a1;
    if denom.abs() < 1e-12 * a0.abs().max(f64::MIN_POSITIVE) {
        return (a0, 0.0);
    }
    let xi = (2.0 - a0 / denom).clamp(-0.5, 0.9);
    let sigma = (2.0 * a0 * a1 / denom).max(1e-8 * a0);
    (sigma, xi)
}

/// Fit a GPD above the configured percentile of `losses`
///
/// A first search with standard errors gets the configured budget. If it
/// does not converge, or the observed information is not positive definite,
/// the search is retried from its best point with a larger budget and the
/// result is reported as [`FitStatus::DegradedNoStandardErrors`].
pub fn fit_gpd(losses: &[f64], config: &GpdConfig) -> Result<GpdFit> {
    config.validate()?;
    let threshold = empirical_quantile(losses, config.threshold_percentile)
        .ok_or_else(|| ModelError::DataQuality("empty loss series".to_string()))?;

    let exceedances: Vec<f64> = losses.iter().filter(|&&x| x > threshold).map(|&x| x - threshold).collect();
    if exceedances.len() < config.min_exceedances {
        return Err(ModelError::InsufficientExceedances {
            threshold,
            needed: config.min_exceedances,
            have: exceedances.len(),
        });
    }

    // Work in units of the mean excess
    let unit = exceedances.iter().sum::<f64>() / exceedances.len() as f64;
    let y: Vec<f64> = exceedances.iter().map(|e| e / unit).collect();
    let nll = |p: &[f64]| gpd_nll(&y, p);

    let (sigma0, xi0) = pwm_estimate(&y);
    let mut start = [sigma0.ln(), xi0];
    if !nll(&start).is_finite() {
        start = [0.0, 0.0];
    }

    let first = nelder_mead(nll, &start, &[0.1, 0.1], config.max_iterations, config.tolerance)?;
    let cov = if first.converged { covariance(&nll, &first.x) } else { None };

    let (best, status, std_errors, iterations) = match cov {
        Some(cov) => {
            let sigma = unit * first.x[0].exp();
            let se = GpdStdErrors {
                scale: sigma * cov[0][0].sqrt(),
                shape: cov[1][1].sqrt(),
            };
            let iterations = first.iterations;
            (first, FitStatus::Full, Some(se), iterations)
        }
        None => {
            log::warn!(
                "gpd: first search {} after {} iterations; retrying without standard errors",
                if first.converged { "gave an unusable Hessian" } else { "did not converge" },
                first.iterations
            );
            let retry = nelder_mead(
                nll,
                &first.x,
                &[0.1, 0.1],
                config.max_iterations * FALLBACK_BUDGET,
                config.tolerance,
            )?;
            let iterations = first.iterations + retry.iterations;
            if !retry.converged {
                let last = [unit * retry.x[0].exp(), retry.x[1]];
                return Err(ModelError::convergence(MODEL, iterations, &last));
            }
            (retry, FitStatus::DegradedNoStandardErrors, None, iterations)
        }
    };

    let scale = unit * best.x[0].exp();
    let shape = best.x[1];
    let regime = if shape.abs() < LIGHT_TAIL_BAND {
        GpdRegime::Exponential
    } else if shape >= 0.5 {
        GpdRegime::InfiniteVariance
    } else if shape > 0.0 {
        GpdRegime::HeavyFiniteVariance
    } else {
        GpdRegime::Bounded {
            upper_endpoint: threshold - scale / shape,
        }
    };

    let fit = GpdFit {
        threshold,
        threshold_percentile: config.threshold_percentile,
        scale,
        shape,
        std_errors,
        n_exceedances: exceedances.len(),
        n_total: losses.len(),
        exceedance_rate: exceedances.len() as f64 / losses.len() as f64,
        log_likelihood: -best.value - exceedances.len() as f64 * unit.ln(),
        status,
        iterations,
        regime,
    };

    log::info!(
        "gpd above {:.4e} ({} exceedances): scale {:.4e}, shape {:.4} ({:?}, {:?})",
        fit.threshold,
        fit.n_exceedances,
        fit.scale,
        fit.shape,
        fit.regime,
        fit.status
    );
    Ok(fit)
}
