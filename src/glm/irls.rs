//! Iteratively reweighted least squares for log-link power-variance GLMs

use super::{Coefficient, Design, Family, GlmConfig, GlmEngine, GlmFit, GlmProblem};
use crate::error::{ModelError, Result};
use crate::linalg::{invert_spd, solve_spd};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Linear predictors beyond this magnitude are treated as divergent
const MAX_ETA: f64 = 700.0;

/// Fitted mean for a zero response, relative to the mean response, that signals separation
const SEPARATION_RATIO: f64 = 1e-8;

/// Floor for the deviance-based dispersion so a perfect fit keeps a finite likelihood
pub(crate) const MIN_DISPERSION: f64 = 1e-300;

/// IRLS estimator
#[derive(Debug, Clone, Default)]
pub struct Irls {
    config: GlmConfig,
}

/// State at the end of the iteration loop
struct IrlsState {
    beta: Vec<f64>,
    mu: Vec<f64>,
    deviance: f64,
    iterations: usize,
}

impl Irls {
    pub fn new(config: GlmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GlmConfig {
        &self.config
    }

    fn validate(problem: &GlmProblem<'_>) -> Result<()> {
        problem.family.validate()?;

        let n = problem.design.n_rows();
        let k = problem.design.n_cols();
        if problem.response.len() != n {
            return Err(ModelError::DataQuality(format!(
                "{}: response has {} values, design has {} rows",
                problem.model,
                problem.response.len(),
                n
            )));
        }
        if n <= k {
            return Err(ModelError::InsufficientData {
                model: problem.model.to_string(),
                needed: k + 1,
                have: n,
            });
        }
        if let Some(offset) = problem.offset {
            if offset.len() != n {
                return Err(ModelError::DataQuality(format!("{}: offset length mismatch", problem.model)));
            }
            if let Some(i) = offset.iter().position(|v| !v.is_finite()) {
                return Err(ModelError::NumericDomain(format!(
                    "{}: offset[{}] = {} is not finite",
                    problem.model, i, offset[i]
                )));
            }
        }
        if let Some(weights) = problem.weights {
            if weights.len() != n {
                return Err(ModelError::DataQuality(format!("{}: weights length mismatch", problem.model)));
            }
            if let Some(i) = weights.iter().position(|&w| !w.is_finite() || w <= 0.0) {
                return Err(ModelError::NumericDomain(format!(
                    "{}: weight[{}] = {} must be positive and finite",
                    problem.model, i, weights[i]
                )));
            }
        }

        problem.family.validate_response(problem.response)?;

        if problem.response.iter().all(|&y| y == 0.0) {
            return Err(ModelError::DegenerateResponse {
                model: problem.model.to_string(),
                message: "all responses are zero; the intercept diverges to -inf".to_string(),
            });
        }

        Ok(())
    }

    fn deviance(problem: &GlmProblem<'_>, mu: &[f64]) -> f64 {
        problem
            .response
            .iter()
            .zip(mu)
            .enumerate()
            .map(|(i, (&y, &m))| weight(problem, i) * problem.family.unit_deviance(y, m))
            .sum()
    }

    /// Linear predictor and mean for a coefficient vector, `None` if divergent
    fn evaluate(problem: &GlmProblem<'_>, beta: &[f64]) -> Option<Vec<f64>> {
        let n = problem.design.n_rows();
        let mut mu = Vec::with_capacity(n);
        for i in 0..n {
            let eta = problem.design.row_dot(i, beta) + offset(problem, i);
            if !eta.is_finite() || eta.abs() > MAX_ETA {
                return None;
            }
            mu.push(eta.exp());
        }
        Some(mu)
    }

    /// Weighted normal equations XᵀWX and XᵀWz at the current mean
    fn normal_equations(problem: &GlmProblem<'_>, mu: &[f64]) -> (Vec<Vec<f64>>, Vec<f64>) {
        let design = problem.design;
        let k = design.n_cols();
        let mut xtwx = vec![vec![0.0; k]; k];
        let mut xtwz = vec![0.0; k];

        for i in 0..design.n_rows() {
            let m = mu[i];
            let eta = m.ln() - offset(problem, i);
            // d(eta)/d(mu) = 1/mu under the log link
            let z = eta + (problem.response[i] - m) / m;
            let w = weight(problem, i) * m * m / problem.family.variance(m);

            for a in 0..k {
                let xa = design.get(i, a);
                xtwz[a] += w * xa * z;
                for b in 0..=a {
                    xtwx[a][b] += w * xa * design.get(i, b);
                }
            }
        }
        for a in 0..k {
            for b in (a + 1)..k {
                xtwx[a][b] = xtwx[b][a];
            }
        }

        (xtwx, xtwz)
    }

    /// Accept the Newton proposal, or halve it towards `prev` until the
    /// deviance is finite and not worse than `deviance_old`
    ///
    /// The first iteration has nothing to halve towards, so a non-finite
    /// deviance there fails immediately. Exhausting the halvings is a
    /// convergence failure carrying the last estimate that was accepted.
    fn step_halving(
        &self,
        problem: &GlmProblem<'_>,
        prev: Option<&[f64]>,
        proposal: Vec<f64>,
        deviance_old: f64,
        iteration: usize,
    ) -> Result<(Vec<f64>, Vec<f64>, f64)> {
        let mut candidate = proposal;
        for _ in 0..=self.config.max_step_halvings {
            if let Some(mu_c) = Self::evaluate(problem, &candidate) {
                let dev_c = Self::deviance(problem, &mu_c);
                let worse = prev.is_some() && dev_c - deviance_old > self.config.tolerance * (deviance_old.abs() + 0.1);
                if dev_c.is_finite() && !worse {
                    return Ok((candidate, mu_c, dev_c));
                }
            }
            match prev {
                Some(prev) => candidate = candidate.iter().zip(prev).map(|(c, p)| 0.5 * (c + p)).collect(),
                None => break,
            }
        }

        log::warn!(
            "{}: no acceptable step after {} halvings at iteration {}",
            problem.model,
            self.config.max_step_halvings,
            iteration
        );
        Err(ModelError::convergence(problem.model, iteration, prev.unwrap_or(&candidate)))
    }

    fn iterate(&self, problem: &GlmProblem<'_>) -> Result<IrlsState> {
        let family = problem.family;
        let mut mu: Vec<f64> = problem.response.iter().map(|&y| family.initial_mu(y)).collect();
        let mut deviance_old = Self::deviance(problem, &mu);
        let mut beta: Option<Vec<f64>> = None;

        for iteration in 1..=self.config.max_iterations {
            let (xtwx, xtwz) = Self::normal_equations(problem, &mu);
            let proposal = solve_spd(&xtwx, &xtwz).ok_or_else(|| ModelError::SingularDesign {
                model: problem.model.to_string(),
                message: format!("XᵀWX is not positive definite (columns {:?})", problem.design.names()),
            })?;

            let (candidate, mu_new, deviance_new) =
                self.step_halving(problem, beta.as_deref(), proposal, deviance_old, iteration)?;

            log::debug!(
                "{} IRLS iteration {}: deviance {:.6e}, beta {:?}",
                problem.model,
                iteration,
                deviance_new,
                candidate
            );

            let change = (deviance_new - deviance_old).abs() / (deviance_new.abs() + 0.1);
            mu = mu_new;
            deviance_old = deviance_new;
            let converged = beta.is_some() && change < self.config.tolerance;
            beta = Some(candidate);

            if converged {
                return Ok(IrlsState {
                    beta: beta.unwrap_or_default(),
                    mu,
                    deviance: deviance_old,
                    iterations: iteration,
                });
            }
        }

        Err(ModelError::convergence(
            problem.model,
            self.config.max_iterations,
            beta.as_deref().unwrap_or(&[]),
        ))
    }

    /// Zero responses fitted with vanishing means: IRLS "converged" only because
    /// the separating coefficient ran off towards -inf
    fn check_separation(problem: &GlmProblem<'_>, state: &IrlsState) -> Result<()> {
        if matches!(problem.family, Family::Gamma) {
            return Ok(());
        }
        let y = problem.response;
        let mean_y = y.iter().sum::<f64>() / y.len() as f64;
        let separated = y
            .iter()
            .zip(&state.mu)
            .filter(|&(&yi, &m)| yi == 0.0 && m < SEPARATION_RATIO * mean_y)
            .count();
        if separated > 0 {
            log::warn!(
                "{}: {} zero responses fitted with numerically zero means (separation)",
                problem.model,
                separated
            );
            return Err(ModelError::convergence(problem.model, state.iterations, &state.beta));
        }
        Ok(())
    }

    /// Deviance of the intercept-only model with the same offset and weights
    fn null_deviance(&self, problem: &GlmProblem<'_>) -> Result<f64> {
        let design = Design::with_intercept(problem.design.n_rows());
        let null_problem = GlmProblem {
            model: problem.model,
            design: &design,
            response: problem.response,
            family: problem.family,
            offset: problem.offset,
            weights: problem.weights,
        };
        Ok(self.iterate(&null_problem)?.deviance)
    }
}

impl GlmEngine for Irls {
    fn fit(&self, problem: &GlmProblem<'_>) -> Result<GlmFit> {
        Self::validate(problem)?;

        let state = self.iterate(problem)?;
        Self::check_separation(problem, &state)?;
        let null_deviance = self.null_deviance(problem)?;

        let family = problem.family;
        let n = problem.design.n_rows();
        let k = problem.design.n_cols();
        let df_residual = n - k;

        let y = problem.response;
        let mu = &state.mu;
        let sum_w: f64 = (0..n).map(|i| weight(problem, i)).sum();

        let pearson_dispersion = if family.estimates_dispersion() {
            let chi2: f64 = (0..n)
                .map(|i| weight(problem, i) * (y[i] - mu[i]).powi(2) / family.variance(mu[i]))
                .sum();
            chi2 / df_residual as f64
        } else {
            1.0
        };

        // Deviance-based dispersion is the saddlepoint MLE of phi
        let likelihood_dispersion = if family.estimates_dispersion() {
            (state.deviance / sum_w).max(MIN_DISPERSION)
        } else {
            1.0
        };
        let log_likelihood: f64 = (0..n)
            .map(|i| family.log_density(y[i], mu[i], weight(problem, i), likelihood_dispersion))
            .sum();
        let n_params = k + usize::from(family.estimates_dispersion());
        let aic = -2.0 * log_likelihood + 2.0 * n_params as f64;

        let (xtwx, _) = Self::normal_equations(problem, mu);
        let covariance = invert_spd(&xtwx);
        let t_df = if family.estimates_dispersion() {
            Some(df_residual as f64)
        } else {
            None
        };

        let coefficients = problem
            .design
            .names()
            .iter()
            .zip(&state.beta)
            .enumerate()
            .map(|(j, (name, &estimate))| {
                let std_error = covariance
                    .as_ref()
                    .map(|cov| (cov[j][j] * pearson_dispersion).sqrt())
                    .filter(|se| se.is_finite() && *se > 0.0);
                let statistic = std_error.map(|se| estimate / se).filter(|z| z.is_finite());
                let p_value = statistic.and_then(|z| two_sided_p_value(z, t_df));
                Coefficient {
                    name: name.clone(),
                    estimate,
                    std_error,
                    statistic,
                    p_value,
                }
            })
            .collect();

        let deviance_residuals = (0..n)
            .map(|i| {
                let d = weight(problem, i) * family.unit_deviance(y[i], mu[i]);
                (y[i] - mu[i]).signum() * d.sqrt()
            })
            .collect();

        log::info!(
            "{} [{}] converged in {} iterations: deviance {:.6e}, null deviance {:.6e}, AIC {:.2}",
            problem.model,
            family.name(),
            state.iterations,
            state.deviance,
            null_deviance,
            aic
        );

        Ok(GlmFit {
            family,
            coefficients,
            pearson_dispersion,
            deviance: state.deviance,
            null_deviance,
            log_likelihood,
            aic,
            n_obs: n,
            df_residual,
            iterations: state.iterations,
            fitted: state.mu,
            deviance_residuals,
        })
    }
}

#[inline]
fn weight(problem: &GlmProblem<'_>, i: usize) -> f64 {
    problem.weights.map_or(1.0, |w| w[i])
}

#[inline]
fn offset(problem: &GlmProblem<'_>, i: usize) -> f64 {
    problem.offset.map_or(0.0, |o| o[i])
}

/// Two-sided Wald p-value; normal reference when `df` is `None`
fn two_sided_p_value(statistic: f64, df: Option<f64>) -> Option<f64> {
    let lower_tail = match df {
        None => Normal::new(0.0, 1.0).ok()?.cdf(-statistic.abs()),
        Some(df) => StudentsT::new(0.0, 1.0, df).ok()?.cdf(-statistic.abs()),
    };
    Some((2.0 * lower_tail).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn engine() -> Irls {
        Irls::new(GlmConfig::default())
    }

    #[test]
    fn test_poisson_intercept_with_offset_is_rate() {
        // Intercept-only Poisson with log-exposure offset: exp(b0) = sum(y) / sum(exposure)
        let y = [2.0, 5.0, 3.0, 10.0];
        let exposure = [1.0, 2.0, 1.5, 3.5];
        let offset: Vec<f64> = exposure.iter().map(|e: &f64| e.ln()).collect();
        let design = Design::with_intercept(4);
        let problem = GlmProblem::new("rate", &design, &y, Family::Poisson).with_offset(&offset);
        let fit = engine().fit(&problem).unwrap();
        assert_relative_eq!(fit.estimates()[0].exp(), 20.0 / 8.0, max_relative = 1e-8);
    }

    #[test]
    fn test_recovers_exact_log_linear_mean() {
        // y = exp(0.5 + 0.3 x) exactly: every family should recover the coefficients
        let x: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| (0.5 + 0.3 * v).exp()).collect();
        let design = Design::with_intercept(8).column("x", x).unwrap();

        for family in [Family::Poisson, Family::Gamma, Family::Tweedie { power: 1.5 }] {
            let problem = GlmProblem::new("exact", &design, &y, family);
            let fit = engine().fit(&problem).unwrap();
            let beta = fit.estimates();
            assert_relative_eq!(beta[0], 0.5, epsilon = 1e-6);
            assert_relative_eq!(beta[1], 0.3, epsilon = 1e-6);
            assert!(fit.deviance < 1e-8);
            assert_relative_eq!(fit.pseudo_r2().unwrap(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gamma_fit_statistics() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = vec![2.1, 4.3, 5.8, 8.1, 11.2, 12.9];
        let design = Design::with_intercept(6).column("x", x).unwrap();
        let problem = GlmProblem::new("gamma", &design, &y, Family::Gamma);
        let fit = engine().fit(&problem).unwrap();

        assert!(fit.deviance < fit.null_deviance);
        let r2 = fit.pseudo_r2().unwrap();
        assert!((0.0..=1.0).contains(&r2));
        let slope = fit.coefficient("x").unwrap();
        assert!(slope.estimate > 0.0);
        assert!(slope.p_value.unwrap() < 0.05);
        assert!(fit.fitted.iter().all(|&m| m > 0.0));
        assert_eq!(fit.df_residual, 4);
    }

    #[test]
    fn test_all_zero_counts_is_degenerate() {
        let design = Design::with_intercept(3).column("x", vec![1.0, 2.0, 3.0]).unwrap();
        let y = [0.0, 0.0, 0.0];
        let problem = GlmProblem::new("frequency", &design, &y, Family::Poisson);
        assert!(matches!(engine().fit(&problem), Err(ModelError::DegenerateResponse { .. })));
    }

    #[test]
    fn test_collinear_design_is_singular() {
        let design = Design::with_intercept(4).column("year", vec![2000.0; 4]).unwrap();
        let y = [1.0, 2.0, 3.0, 4.0];
        let problem = GlmProblem::new("frequency", &design, &y, Family::Poisson);
        assert!(matches!(engine().fit(&problem), Err(ModelError::SingularDesign { .. })));
    }

    #[test]
    fn test_non_finite_offset_is_numeric_domain() {
        let design = Design::with_intercept(3);
        let y = [1.0, 2.0, 3.0];
        let offset = [0.0, f64::NEG_INFINITY, 0.0];
        let problem = GlmProblem::new("frequency", &design, &y, Family::Poisson).with_offset(&offset);
        assert!(matches!(engine().fit(&problem), Err(ModelError::NumericDomain(_))));
    }

    #[test]
    fn test_separation_reports_convergence_failure() {
        // Every row in the flagged group has zero claims: its coefficient runs off to -inf
        let group = vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let y = [0.0, 0.0, 0.0, 4.0, 5.0, 6.0];
        let design = Design::with_intercept(6).column("group", group).unwrap();
        let problem = GlmProblem::new("frequency", &design, &y, Family::Poisson);
        match engine().fit(&problem) {
            Err(ModelError::ConvergenceFailure { iterations, last_estimate, .. }) => {
                assert!(iterations > 0);
                assert_eq!(last_estimate.len(), 2);
                assert!(last_estimate[1] < -10.0);
            }
            other => panic!("expected convergence failure, got {other:?}"),
        }
    }

    #[test]
    fn test_rejected_step_halving_is_convergence_failure() {
        let design = Design::with_intercept(3);
        let y = [1.0, 2.0, 3.0];
        let problem = GlmProblem::new("frequency", &design, &y, Family::Poisson);
        let prev = [2.0_f64.ln()];
        let deviance_old = Irls::deviance(&problem, &[2.0; 3]);
        // exp(1e6) overflows the linear predictor
        let proposal = vec![1e6];

        let strict = Irls::new(GlmConfig {
            max_step_halvings: 0,
            ..Default::default()
        });
        match strict.step_halving(&problem, Some(&prev), proposal.clone(), deviance_old, 4) {
            Err(ModelError::ConvergenceFailure { iterations, last_estimate, .. }) => {
                assert_eq!(iterations, 4);
                assert_eq!(last_estimate, prev.to_vec());
            }
            other => panic!("expected convergence failure, got {other:?}"),
        }

        // With enough halvings the step lands back on the previous estimate
        let patient = Irls::new(GlmConfig {
            max_step_halvings: 60,
            ..Default::default()
        });
        let (beta, _, deviance) = patient
            .step_halving(&problem, Some(&prev), proposal, deviance_old, 4)
            .unwrap();
        assert_relative_eq!(beta[0], prev[0], epsilon = 1e-6);
        assert!(deviance <= deviance_old + 1e-8 * (deviance_old + 0.1));
    }

    #[test]
    fn test_refit_is_identical() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![3.0, 1.0, 4.0, 1.0, 5.0];
        let design = Design::with_intercept(5).column("x", x).unwrap();
        let problem = GlmProblem::new("tweedie", &design, &y, Family::Tweedie { power: 1.6 });
        let a = engine().fit(&problem).unwrap();
        let b = engine().fit(&problem).unwrap();
        assert_eq!(a, b);
    }
}
