//! Linear least-squares solver.
//!
//! Each Levenberg–Marquardt step solves a small damped linear problem:
//!
//! ```text
//! minimize ||J δ + r||² + λ ||D δ||²
//! ```
//!
//! which we express as one stacked least-squares system and hand to SVD.
//! (Nalgebra's `QR::solve` is intended for square systems and will panic for
//! non-square matrices.)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve the damped step `[J; sqrt(λ)·D] δ = [-r; 0]`.
///
/// `scale` holds the diagonal of `D` (one entry per column of `J`).
pub fn solve_damped_step(
    jacobian: &DMatrix<f64>,
    residuals: &DVector<f64>,
    lambda: f64,
    scale: &[f64],
) -> Option<DVector<f64>> {
    let (n, p) = jacobian.shape();
    let mut a = DMatrix::<f64>::zeros(n + p, p);
    let mut b = DVector::<f64>::zeros(n + p);

    a.view_mut((0, 0), (n, p)).copy_from(jacobian);
    for i in 0..n {
        b[i] = -residuals[i];
    }
    let sl = lambda.max(0.0).sqrt();
    for j in 0..p {
        a[(n + j, j)] = sl * scale[j];
    }

    solve_least_squares(&a, &b)
}
