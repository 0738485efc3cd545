//! Small dense symmetric positive-definite solvers
//!
//! The regressions here have two or three coefficients and the EVT models
//! two or three parameters, so plain `Vec<Vec<f64>>` Cholesky is enough.

/// Relative pivot below which a matrix is treated as singular
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Lower-triangular Cholesky factor, or `None` if not positive definite
pub(crate) fn cholesky(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];

    for j in 0..n {
        let mut diag = a[j][j];
        for k in 0..j {
            diag -= l[j][k] * l[j][k];
        }
        let scale = a[j][j].abs().max(f64::MIN_POSITIVE);
        if !diag.is_finite() || diag <= PIVOT_TOLERANCE * scale {
            return None;
        }
        let ljj = diag.sqrt();
        l[j][j] = ljj;

        for i in (j + 1)..n {
            let mut s = a[i][j];
            for k in 0..j {
                s -= l[i][k] * l[j][k];
            }
            l[i][j] = s / ljj;
        }
    }

    Some(l)
}

/// Solve L Lᵀ x = b given the Cholesky factor
fn cholesky_solve(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = l.len();
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[i][k] * y[k];
        }
        y[i] = s / l[i][i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut s = y[i];
        for k in (i + 1)..n {
            s -= l[k][i] * x[k];
        }
        x[i] = s / l[i][i];
    }
    x
}

/// Solve A x = b for symmetric positive-definite A
pub(crate) fn solve_spd(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let l = cholesky(a)?;
    Some(cholesky_solve(&l, b))
}

/// Inverse of a symmetric positive-definite matrix
pub(crate) fn invert_spd(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let l = cholesky(a)?;
    let mut inv = vec![vec![0.0; n]; n];
    for j in 0..n {
        let mut e = vec![0.0; n];
        e[j] = 1.0;
        let col = cholesky_solve(&l, &e);
        for i in 0..n {
            inv[i][j] = col[i];
        }
    }
    Some(inv)
}
