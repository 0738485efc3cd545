//! Profile-likelihood search for the Tweedie power parameter

use super::{aggregate_design, PowerGrid};
use crate::data::LossDataset;
use crate::error::{FitWarning, ModelError, Result};
use crate::glm::{Family, GlmEngine, GlmProblem, MIN_DISPERSION};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::fmt;

const MODEL: &str = "tweedie_profile";

/// Saddlepoint log-likelihood at one candidate power
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub power: f64,
    /// `None` when the fit at this power failed
    pub log_likelihood: Option<f64>,
    pub dispersion: Option<f64>,
    pub deviance: Option<f64>,
    pub error: Option<String>,
}

impl ProfilePoint {
    pub fn is_ok(&self) -> bool {
        self.log_likelihood.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileShape {
    /// One maximum, curve drops below the cutoff on the informative side(s)
    Unimodal,
    /// The whole curve lies within the likelihood-ratio cutoff
    Flat,
    /// Several separated local maxima within the cutoff
    MultiModal,
}

impl fmt::Display for ProfileShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProfileShape::Unimodal => "unimodal",
            ProfileShape::Flat => "flat",
            ProfileShape::MultiModal => "multi-modal",
        };
        write!(f, "{}", s)
    }
}

/// Result of the grid search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerProfile {
    pub best_power: f64,
    pub max_log_likelihood: f64,

    pub ci_level: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// The interval reached the lower edge of the grid (or a failed point)
    pub lower_truncated: bool,
    pub upper_truncated: bool,

    pub shape: ProfileShape,

    /// Every grid point in grid order, failed ones included
    pub curve: Vec<ProfilePoint>,
}

impl PowerProfile {
    /// Warnings for ambiguous shape and truncated interval
    pub fn warnings(&self) -> Vec<FitWarning> {
        let mut warnings = Vec::new();
        if self.shape != ProfileShape::Unimodal {
            warnings.push(FitWarning::AmbiguousPowerProfile {
                shape: self.shape.to_string(),
            });
        }
        if self.lower_truncated || self.upper_truncated {
            warnings.push(FitWarning::TruncatedPowerInterval {
                lower: self.lower_truncated,
                upper: self.upper_truncated,
            });
        }
        warnings
    }

    pub fn failed_points(&self) -> usize {
        self.curve.iter().filter(|p| !p.is_ok()).count()
    }
}

/// Evaluate the profile log-likelihood over the grid and pick its argmax
///
/// Each candidate is an independent fit, so the grid runs in parallel; the
/// curve is collected back in grid order and the reduction is deterministic.
pub fn search_power<E: GlmEngine + Sync>(dataset: &LossDataset, grid: &PowerGrid, engine: &E) -> Result<PowerProfile> {
    let powers = grid.points()?;
    let design = aggregate_design(dataset)?;
    let losses = dataset.losses();

    let curve: Vec<ProfilePoint> = powers
        .par_iter()
        .map(|&power| {
            let problem = GlmProblem::new(MODEL, &design, &losses, Family::Tweedie { power });
            match engine.fit(&problem) {
                Ok(fit) => {
                    // Same floored φ̂ = D/n the GLM log-likelihood used
                    let dispersion = (fit.deviance / fit.n_obs as f64).max(MIN_DISPERSION);
                    log::debug!("p = {:.4}: log-likelihood {:.6}, dispersion {:.6e}", power, fit.log_likelihood, dispersion);
                    ProfilePoint {
                        power,
                        log_likelihood: Some(fit.log_likelihood).filter(|ll| ll.is_finite()),
                        dispersion: Some(dispersion),
                        deviance: Some(fit.deviance),
                        error: None,
                    }
                }
                Err(e) => {
                    log::warn!("profile fit failed at p = {:.4}: {}", power, e);
                    ProfilePoint {
                        power,
                        log_likelihood: None,
                        dispersion: None,
                        deviance: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .collect();

    // First index wins on ties, so the result does not depend on scheduling
    let best = curve
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.log_likelihood.map(|ll| (i, ll)))
        .fold(None, |acc: Option<(usize, f64)>, (i, ll)| match acc {
            Some((_, best_ll)) if best_ll >= ll => acc,
            _ => Some((i, ll)),
        });

    let (best_idx, max_ll) = match best {
        Some(found) => found,
        None => {
            return Err(ModelError::ConvergenceFailure {
                model: MODEL.to_string(),
                iterations: curve.len(),
                last_estimate: powers,
            })
        }
    };

    let cutoff = lr_cutoff(grid.ci_level)?;
    let threshold = max_ll - cutoff;
    let (ci_lower, lower_truncated) = interval_edge(&curve, best_idx, threshold, Direction::Down);
    let (ci_upper, upper_truncated) = interval_edge(&curve, best_idx, threshold, Direction::Up);
    let shape = classify_shape(&curve, best_idx, threshold);

    let profile = PowerProfile {
        best_power: curve[best_idx].power,
        max_log_likelihood: max_ll,
        ci_level: grid.ci_level,
        ci_lower,
        ci_upper,
        lower_truncated,
        upper_truncated,
        shape,
        curve,
    };

    log::info!(
        "power search: p* = {:.3}, {:.0}% interval [{:.3}, {:.3}], profile {}",
        profile.best_power,
        grid.ci_level * 100.0,
        profile.ci_lower,
        profile.ci_upper,
        profile.shape
    );

    Ok(profile)
}

/// Half the χ²₁ quantile at `level`
fn lr_cutoff(level: f64) -> Result<f64> {
    let chi2 = ChiSquared::new(1.0).map_err(|e| ModelError::NumericDomain(e.to_string()))?;
    Ok(0.5 * chi2.inverse_cdf(level))
}

#[derive(Clone, Copy)]
enum Direction {
    Down,
    Up,
}

/// Walk from the maximum until the curve drops below `threshold`
///
/// The edge is the linear interpolation between the last point inside and
/// the first point outside. Running off the grid, or into a failed point,
/// truncates the interval at the last point inside.
fn interval_edge(curve: &[ProfilePoint], best: usize, threshold: f64, direction: Direction) -> (f64, bool) {
    let mut inside = best;
    loop {
        let next = match direction {
            Direction::Down if inside > 0 => inside - 1,
            Direction::Up if inside + 1 < curve.len() => inside + 1,
            _ => return (curve[inside].power, true),
        };
        let ll_next = match curve[next].log_likelihood {
            Some(ll) => ll,
            None => return (curve[inside].power, true),
        };
        if ll_next < threshold {
            let (p_in, ll_in) = (curve[inside].power, curve[inside].log_likelihood.unwrap_or(threshold));
            let p_out = curve[next].power;
            let t = (ll_in - threshold) / (ll_in - ll_next);
            return (p_in + t * (p_out - p_in), false);
        }
        inside = next;
    }
}

/// Flat when nothing drops below the cutoff, multi-modal when more than one
/// local maximum clears it
fn classify_shape(curve: &[ProfilePoint], best: usize, threshold: f64) -> ProfileShape {
    let ok: Vec<(usize, f64)> = curve
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.log_likelihood.map(|ll| (i, ll)))
        .collect();

    if ok.iter().all(|&(_, ll)| ll >= threshold) {
        return ProfileShape::Flat;
    }

    let modes = (0..ok.len())
        .filter(|&j| {
            let (i, ll) = ok[j];
            let left_lower = j == 0 || ok[j - 1].1 < ll;
            let right_lower = j + 1 == ok.len() || ok[j + 1].1 < ll;
            (i == best || (left_lower && right_lower)) && ll >= threshold
        })
        .count();

    if modes > 1 {
        ProfileShape::MultiModal
    } else {
        ProfileShape::Unimodal
    }
}
