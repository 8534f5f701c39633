//! Asymptotic (linearized) intervals from a single fit.
//!
//! These are the closed-form intervals the bootstrap is meant to be compared
//! against:
//!
//! - parameter intervals `p̂ ± z·σ̂` from the fit covariance
//! - confidence / prediction half-widths along the curve,
//!   `t·s·sqrt([1 +] 1/n + (x - x̄)² / Σ(xᵢ - x̄)²)`
//!
//! Both critical values follow the requested confidence level.

use nalgebra::DMatrix;

use crate::domain::{ConfidenceInterval, Observations};
use crate::error::AppError;
use crate::math::{check_confidence, norm_ppf, student_t_ppf};
use crate::models::{Model, predict_all};

/// Parameter intervals from the fit covariance.
#[derive(Debug, Clone)]
pub struct ClassicalParams {
    pub intervals: Vec<ConfidenceInterval>,
    pub std_errors: Vec<f64>,
}

/// Confidence and prediction half-widths along the curve.
#[derive(Debug, Clone)]
pub struct ClassicalBands {
    pub xpts: Vec<f64>,
    pub confidence_half_width: Vec<f64>,
    pub prediction_half_width: Vec<f64>,
    /// Residual standard error `sqrt(SSE / dof)`.
    pub s_err: f64,
    /// Reduced chi-square of residuals relative to the fitted values.
    pub chi2_red: f64,
    pub t_critical: f64,
    pub dof: usize,
}

pub fn classical_param_intervals(
    p_opt: &[f64],
    covariance: &DMatrix<f64>,
    confidence: f64,
) -> Result<ClassicalParams, AppError> {
    check_confidence(confidence)?;
    let p = p_opt.len();
    if covariance.shape() != (p, p) {
        return Err(AppError::input(format!(
            "Covariance is {}x{} but there are {p} parameters.",
            covariance.nrows(),
            covariance.ncols()
        )));
    }

    let z = norm_ppf((1.0 + confidence / 100.0) / 2.0);
    let std_errors: Vec<f64> = (0..p).map(|i| covariance[(i, i)].max(0.0).sqrt()).collect();
    let intervals = p_opt
        .iter()
        .zip(&std_errors)
        .map(|(&v, &se)| ConfidenceInterval {
            lower: v - z * se,
            central: v,
            upper: v + z * se,
            level: confidence,
        })
        .collect();

    Ok(ClassicalParams {
        intervals,
        std_errors,
    })
}

pub fn classical_fit_intervals(
    model: &dyn Model,
    obs: &Observations,
    p_opt: &[f64],
    xpts: &[f64],
    confidence: f64,
) -> Result<ClassicalBands, AppError> {
    check_confidence(confidence)?;
    let (x, y) = obs.flattened();
    let n = y.len();
    let m = p_opt.len();
    if n <= m {
        return Err(AppError::input(format!(
            "Classical intervals need more points ({n}) than parameters ({m})."
        )));
    }
    let dof = n - m;

    let y_fit = predict_all(model, &x, p_opt);
    let res: Vec<f64> = y.iter().zip(&y_fit).map(|(a, b)| a - b).collect();

    let t = student_t_ppf((1.0 + confidence / 100.0) / 2.0, dof as f64)?;
    let chi2: f64 = res.iter().zip(&y_fit).map(|(r, f)| (r / f).powi(2)).sum();
    let s_err = (res.iter().map(|r| r * r).sum::<f64>() / dof as f64).sqrt();

    let x_mean = x.iter().sum::<f64>() / n as f64;
    let sxx: f64 = x.iter().map(|v| (v - x_mean).powi(2)).sum();
    if !(sxx > 0.0) {
        return Err(AppError::input("Classical intervals need at least two distinct x values."));
    }

    let leverage = |xp: f64| 1.0 / n as f64 + (xp - x_mean).powi(2) / sxx;
    let confidence_half_width = xpts.iter().map(|&xp| t * s_err * leverage(xp).sqrt()).collect();
    let prediction_half_width = xpts
        .iter()
        .map(|&xp| t * s_err * (1.0 + leverage(xp)).sqrt())
        .collect();

    Ok(ClassicalBands {
        xpts: xpts.to_vec(),
        confidence_half_width,
        prediction_half_width,
        s_err,
        chi2_red: chi2 / dof as f64,
        t_critical: t,
        dof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn param_intervals_are_symmetric_and_ordered() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.09]);
        let out = classical_param_intervals(&[1.0, 2.0], &cov, 95.0).unwrap();
        assert_relative_eq!(out.std_errors[0], 0.2);
        let ci = out.intervals[1];
        assert!(ci.lower < ci.central && ci.central < ci.upper);
        assert_relative_eq!(ci.upper - ci.central, 1.959963984540054 * 0.3, epsilon = 1e-9);
    }

    #[test]
    fn critical_value_follows_confidence_level() {
        let line = |x: f64, p: &[f64]| p[0] * x + p[1];
        let obs = Observations::single(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![2.1, 3.9, 6.2, 7.8, 10.1]).unwrap();
        let p = [1.99, 0.05];
        let b90 = classical_fit_intervals(&line, &obs, &p, &[3.0], 90.0).unwrap();
        let b99 = classical_fit_intervals(&line, &obs, &p, &[3.0], 99.0).unwrap();
        assert!(b99.t_critical > b90.t_critical);
        assert!(b99.confidence_half_width[0] > b90.confidence_half_width[0]);
        assert!(b90.prediction_half_width[0] > b90.confidence_half_width[0]);
        assert_eq!(b90.dof, 3);
    }

    #[test]
    fn band_is_narrowest_at_mean_x() {
        let line = |x: f64, p: &[f64]| p[0] * x + p[1];
        let obs = Observations::single(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![2.1, 3.9, 6.2, 7.8, 10.1]).unwrap();
        let b = classical_fit_intervals(&line, &obs, &[1.99, 0.05], &[1.0, 3.0, 5.0], 95.0).unwrap();
        assert!(b.confidence_half_width[1] < b.confidence_half_width[0]);
        assert_relative_eq!(b.confidence_half_width[0], b.confidence_half_width[2], epsilon = 1e-12);
    }
}
