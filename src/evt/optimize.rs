//! Derivative-free minimization and observed information for the EVT likelihoods
//!
//! The simplex search is argmin's Nelder–Mead; this module adds restarts
//! around the optimum and the numerical Hessian used for standard errors.

use crate::error::{ModelError, Result};
use crate::linalg::invert_spd;
use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;

/// Fresh simplices tried around the best point after the first convergence
const MAX_RESTARTS: usize = 3;

#[derive(Debug, Clone)]
pub(crate) struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Borrowed objective handed to the argmin executor
struct Objective<'a, F> {
    f: &'a F,
}

impl<F> CostFunction for Objective<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        let value = (self.f)(params);
        // NaN would poison the vertex ordering
        Ok(if value.is_nan() { f64::INFINITY } else { value })
    }
}

/// Nelder–Mead with restarts
///
/// `steps` sets the initial simplex edge per coordinate. Infeasible points
/// should return `f64::INFINITY`. Converged means the spread of simplex
/// values fell below `tolerance` (relative to the starting value) within
/// `max_iterations`, and a restart from the optimum found nothing better.
pub(crate) fn nelder_mead<F>(
    f: F,
    x0: &[f64],
    steps: &[f64],
    max_iterations: usize,
    tolerance: f64,
) -> Result<Minimum>
where
    F: Fn(&[f64]) -> f64,
{
    let mut best = Minimum {
        x: x0.to_vec(),
        value: f(x0),
        iterations: 0,
        converged: false,
    };

    for _ in 0..=MAX_RESTARTS {
        let budget = max_iterations.saturating_sub(best.iterations);
        if budget == 0 {
            break;
        }
        let run = simplex_search(&f, &best.x, steps, budget, tolerance)?;
        let improved = best.value - run.value > tolerance * (1.0 + run.value.abs());
        let iterations = best.iterations + run.iterations;
        let converged = run.converged;
        if run.value <= best.value {
            best = Minimum { iterations, ..run };
        } else {
            best.iterations = iterations;
        }
        if !converged {
            best.converged = false;
            break;
        }
        best.converged = true;
        if !improved {
            break;
        }
    }

    Ok(best)
}

/// Initial simplex: `x0` plus one step along each axis
fn initial_simplex<F>(f: &F, x0: &[f64], steps: &[f64]) -> Vec<Vec<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    let mut vertices = Vec::with_capacity(x0.len() + 1);
    vertices.push(x0.to_vec());
    for (i, step) in steps.iter().enumerate().take(x0.len()) {
        let mut x = x0.to_vec();
        x[i] += step;
        if !f(&x).is_finite() {
            // Step into the feasible side instead
            x[i] = x0[i] - step;
        }
        vertices.push(x);
    }
    vertices
}

fn simplex_search<F>(f: &F, x0: &[f64], steps: &[f64], max_iterations: usize, tolerance: f64) -> Result<Minimum>
where
    F: Fn(&[f64]) -> f64,
{
    let optimizer_error = |e: argmin::core::Error| ModelError::NumericDomain(format!("Nelder-Mead: {}", e));

    let f0 = f(x0);
    let scale = if f0.is_finite() { 1.0 + f0.abs() } else { 1.0 };
    let solver = NelderMead::new(initial_simplex(f, x0, steps))
        .with_sd_tolerance(tolerance * scale)
        .map_err(optimizer_error)?;

    let result = Executor::new(Objective { f }, solver)
        .configure(|state| state.max_iters(max_iterations as u64))
        .run()
        .map_err(optimizer_error)?;

    let state = result.state();
    let x = state.get_best_param().cloned().unwrap_or_else(|| x0.to_vec());
    let value = state.get_best_cost();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    Ok(Minimum {
        x,
        value,
        iterations: state.get_iter() as usize,
        converged: converged && value.is_finite(),
    })
}

/// Central second-difference Hessian of `f` at `x`
pub(crate) fn numerical_hessian<F>(f: &F, x: &[f64]) -> Vec<Vec<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    let n = x.len();
    let h: Vec<f64> = x.iter().map(|v| 1e-4 * (v.abs() + 1.0)).collect();
    let f0 = f(x);
    let eval = |i: usize, si: f64, j: usize, sj: f64| {
        let mut p = x.to_vec();
        p[i] += si * h[i];
        p[j] += sj * h[j];
        f(&p)
    };

    let mut hess = vec![vec![0.0; n]; n];
    for i in 0..n {
        let mut p = x.to_vec();
        p[i] = x[i] + h[i];
        let fp = f(&p);
        p[i] = x[i] - h[i];
        let fm = f(&p);
        hess[i][i] = (fp - 2.0 * f0 + fm) / (h[i] * h[i]);

        for j in 0..i {
            let v = (eval(i, 1.0, j, 1.0) - eval(i, 1.0, j, -1.0) - eval(i, -1.0, j, 1.0) + eval(i, -1.0, j, -1.0))
                / (4.0 * h[i] * h[j]);
            hess[i][j] = v;
            hess[j][i] = v;
        }
    }
    hess
}

/// Inverse observed information, `None` unless the Hessian is finite and positive definite
pub(crate) fn covariance<F>(f: &F, x: &[f64]) -> Option<Vec<Vec<f64>>>
where
    F: Fn(&[f64]) -> f64,
{
    let hess = numerical_hessian(f, x);
    if hess.iter().flatten().any(|v| !v.is_finite()) {
        return None;
    }
    let cov = invert_spd(&hess)?;
    if cov.iter().enumerate().all(|(i, row)| row[i] > 0.0 && row[i].is_finite()) {
        Some(cov)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quadratic_minimum() {
        let f = |x: &[f64]| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2) + 0.5 * x[0] * x[1];
        let m = nelder_mead(f, &[0.0, 0.0], &[0.5, 0.5], 2000, 1e-12).unwrap();
        assert!(m.converged);
        // Gradient zero: x0 = 3 - x1/4 and 3.875·x1 = -5.5
        let x1 = -5.5 / 3.875;
        let x0 = 3.0 - 0.25 * x1;
        assert_relative_eq!(m.x[0], x0, epsilon = 1e-5);
        assert_relative_eq!(m.x[1], x1, epsilon = 1e-5);
    }

    #[test]
    fn test_rosenbrock() {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let m = nelder_mead(f, &[-1.2, 1.0], &[0.1, 0.1], 5000, 1e-14).unwrap();
        assert!(m.converged);
        assert_relative_eq!(m.x[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(m.x[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_budget_exhaustion_is_not_converged() {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let m = nelder_mead(f, &[-1.2, 1.0], &[0.1, 0.1], 5, 1e-14).unwrap();
        assert!(!m.converged);
        assert_eq!(m.iterations, 5);
    }

    #[test]
    fn test_infeasible_region_is_avoided() {
        // Log barrier: only x > 0 is feasible, NaN outside
        let f = |x: &[f64]| if x[0] > 0.0 { x[0] - 2.0 * x[0].ln() } else { f64::NAN };
        let m = nelder_mead(f, &[0.05], &[0.1], 2000, 1e-12).unwrap();
        assert!(m.converged);
        assert_relative_eq!(m.x[0], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_hessian_and_covariance_of_quadratic() {
        let f = |x: &[f64]| 2.0 * x[0] * x[0] + x[0] * x[1] + 3.0 * x[1] * x[1];
        let h = numerical_hessian(&f, &[0.3, -0.2]);
        assert_relative_eq!(h[0][0], 4.0, epsilon = 1e-5);
        assert_relative_eq!(h[0][1], 1.0, epsilon = 1e-5);
        assert_relative_eq!(h[1][1], 6.0, epsilon = 1e-5);

        let cov = covariance(&f, &[0.3, -0.2]).unwrap();
        let det = 4.0 * 6.0 - 1.0;
        assert_relative_eq!(cov[0][0], 6.0 / det, epsilon = 1e-5);

        // Saddle: not positive definite
        let saddle = |x: &[f64]| x[0] * x[0] - x[1] * x[1];
        assert!(covariance(&saddle, &[0.0, 0.0]).is_none());
    }
}
