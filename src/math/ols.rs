//! Least squares solvers.
//!
//! The forecaster solves one penalized regression per fit pass:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2 + Σ λ_j β_j^2
//! ```
//!
//! Implementation choices:
//! - The ridge penalty is folded in as extra rows `sqrt(λ_j) e_j` with target 0,
//!   so both problems go through the same SVD solve.
//! - The residual variance of a ridge fit is corrected by its effective degrees
//!   of freedom, the trace of the hat matrix.
//! - SVD handles tall (more rows than columns) and rank-deficient design matrices.
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() != y.len() || x.ncols() == 0 {
        return None;
    }
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Ridge regression with a per-coefficient penalty `λ_j ≥ 0`.
pub fn solve_ridge(x: &DMatrix<f64>, y: &DVector<f64>, penalties: &[f64]) -> Option<DVector<f64>> {
    let (n, p) = x.shape();
    if penalties.len() != p || y.len() != n {
        return None;
    }

    let mut aug = DMatrix::<f64>::zeros(n + p, p);
    aug.view_mut((0, 0), (n, p)).copy_from(x);
    for (j, &lambda) in penalties.iter().enumerate() {
        aug[(n + j, j)] = lambda.max(0.0).sqrt();
    }
    let mut rhs = DVector::<f64>::zeros(n + p);
    rhs.rows_mut(0, n).copy_from(y);

    solve_least_squares(&aug, &rhs)
}

/// Effective degrees of freedom `tr(X (XᵀX + Λ)⁻¹ Xᵀ)` of a ridge fit.
///
/// With `Z = X Λ^(-1/2)` this is `Σ d² / (d² + 1)` over the singular values
/// of `Z`. Every penalty must be positive.
pub fn ridge_effective_dof(x: &DMatrix<f64>, penalties: &[f64]) -> Option<f64> {
    if penalties.len() != x.ncols() || penalties.iter().any(|&l| !(l > 0.0 && l.is_finite())) {
        return None;
    }
    let mut z = x.clone();
    for (j, &lambda) in penalties.iter().enumerate() {
        z.column_mut(j).scale_mut(1.0 / lambda.sqrt());
    }
    let edf: f64 = z.singular_values().iter().map(|d| d * d / (d * d + 1.0)).sum();
    edf.is_finite().then_some(edf)
}
