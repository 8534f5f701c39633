//! Nonlinear least-squares fitting.
//!
//! The bootstrap only needs one primitive from a solver:
//!
//! ```text
//! fit(model, x, y, initial_guess, weights?) -> params | convergence error
//! ```
//!
//! That boundary is the `FitAdapter` trait. `LevenbergMarquardt` is the
//! adapter shipped with the crate:
//!
//! - residuals `r_i = (f(x_i; p) - y_i) / σ_i`
//! - forward-difference Jacobian
//! - damped Gauss–Newton steps `[J; √λ·D] δ = [-r; 0]` solved by SVD, with
//!   Marquardt column scaling `D`
//! - optional box bounds, enforced by projecting every trial point

use nalgebra::{DMatrix, DVector};
use tracing::trace;

use crate::domain::FitResult;
use crate::error::{AppError, FitStage};
use crate::math::solve_damped_step;
use crate::models::Model;

/// Per-point standard deviations used to weight residuals.
#[derive(Debug, Clone)]
pub struct Weights {
    pub sigma: Vec<f64>,
    /// `true`: σ are absolute and the covariance is used as-is.
    /// `false`: σ are relative and the covariance is rescaled by SSE/(N - p).
    pub absolute: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub lower: f64,
    pub upper: f64,
}

/// Solver settings, validated when a fit is requested.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub max_iterations: usize,
    /// Relative SSE reduction below which an accepted step counts as converged.
    pub ftol: f64,
    /// Relative step size below which an accepted step counts as converged.
    pub xtol: f64,
    /// Optional box bounds, one per parameter.
    pub bounds: Option<Vec<ParamBounds>>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            bounds: None,
        }
    }
}

/// A nonlinear least-squares solver usable by the bootstrap.
///
/// Adapters report convergence failures as `FitStage::PointEstimate`; callers
/// relabel them with `AppError::at_stage`.
pub trait FitAdapter: Sync {
    fn fit(
        &self,
        model: &dyn Model,
        x: &[f64],
        y: &[f64],
        initial_guess: &[f64],
        weights: Option<&Weights>,
    ) -> Result<FitResult, AppError>;
}

const INITIAL_LAMBDA: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;
const MIN_LAMBDA: f64 = 1e-15;
const MAX_LAMBDA: f64 = 1e16;
/// Cosine between residual and Jacobian columns below which a stalled
/// search is accepted as a stationary point.
const GTOL: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: FitConfig,
}

impl LevenbergMarquardt {
    pub fn new(config: FitConfig) -> Result<Self, AppError> {
        if config.max_iterations == 0 {
            return Err(AppError::input("Fit max_iterations must be > 0."));
        }
        if !(config.ftol.is_finite() && config.ftol >= 0.0 && config.xtol.is_finite() && config.xtol >= 0.0)
        {
            return Err(AppError::input("Fit tolerances must be finite and >= 0."));
        }
        if let Some(bounds) = &config.bounds {
            if bounds
                .iter()
                .any(|b| b.lower.is_nan() || b.upper.is_nan() || b.lower > b.upper)
            {
                return Err(AppError::input("Parameter bounds must satisfy lower <= upper."));
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    fn validate(
        &self,
        x: &[f64],
        y: &[f64],
        initial_guess: &[f64],
        weights: Option<&Weights>,
    ) -> Result<(), AppError> {
        let p = initial_guess.len();
        if p == 0 {
            return Err(AppError::input("Initial guess is empty."));
        }
        if x.len() != y.len() {
            return Err(AppError::input(format!(
                "Fit data mismatch: {} x values, {} y values.",
                x.len(),
                y.len()
            )));
        }
        if y.len() < p {
            return Err(AppError::input(format!(
                "Cannot fit {p} parameters to {} points.",
                y.len()
            )));
        }
        if initial_guess.iter().any(|v| !v.is_finite()) {
            return Err(AppError::input("Initial guess must be finite."));
        }
        if let Some(w) = weights {
            if w.sigma.len() != y.len() {
                return Err(AppError::input(format!(
                    "Fit weights mismatch: {} sigma values for {} points.",
                    w.sigma.len(),
                    y.len()
                )));
            }
            if w.sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                return Err(AppError::input("Fit sigma values must be finite and > 0."));
            }
        }
        if let Some(bounds) = &self.config.bounds {
            if bounds.len() != p {
                return Err(AppError::input(format!(
                    "{} parameter bounds given for {p} parameters.",
                    bounds.len()
                )));
            }
        }
        Ok(())
    }

    /// Parameters not pinned at a bound.
    fn free_mask(&self, params: &[f64]) -> Vec<bool> {
        match &self.config.bounds {
            Some(bounds) => params
                .iter()
                .zip(bounds)
                .map(|(&v, b)| v > b.lower && v < b.upper)
                .collect(),
            None => vec![true; params.len()],
        }
    }

    fn project(&self, params: &mut [f64]) {
        if let Some(bounds) = &self.config.bounds {
            for (v, b) in params.iter_mut().zip(bounds) {
                *v = v.clamp(b.lower, b.upper);
            }
        }
    }
}

impl FitAdapter for LevenbergMarquardt {
    fn fit(
        &self,
        model: &dyn Model,
        x: &[f64],
        y: &[f64],
        initial_guess: &[f64],
        weights: Option<&Weights>,
    ) -> Result<FitResult, AppError> {
        self.validate(x, y, initial_guess, weights)?;

        let inv_sigma: Vec<f64> = match weights {
            Some(w) => w.sigma.iter().map(|s| 1.0 / s).collect(),
            None => vec![1.0; y.len()],
        };
        let residuals = |p: &[f64]| -> DVector<f64> {
            DVector::from_iterator(
                y.len(),
                x.iter()
                    .zip(y)
                    .zip(&inv_sigma)
                    .map(|((&xi, &yi), &w)| (model.eval(xi, p) - yi) * w),
            )
        };

        let n_params = initial_guess.len();
        let mut params = initial_guess.to_vec();
        self.project(&mut params);

        let mut r = residuals(&params);
        if r.iter().any(|v| !v.is_finite()) {
            return Err(not_converged("model is not finite at the initial guess"));
        }
        let mut ss = r.norm_squared();
        // Residual floor for data the model reproduces exactly.
        let y_scale: f64 = y.iter().zip(&inv_sigma).map(|(v, w)| (v * w).powi(2)).sum();
        let ss_floor = 1e-24 * (1.0 + y_scale);

        let mut lambda = INITIAL_LAMBDA;
        let mut converged = ss <= ss_floor;
        let mut iterations = 0usize;

        while !converged {
            if iterations >= self.config.max_iterations {
                return Err(not_converged(format!(
                    "no convergence within {} iterations (SSE={ss:.6e})",
                    self.config.max_iterations
                )));
            }
            iterations += 1;

            let jac = jacobian(&residuals, &params, &r);
            if jac.iter().any(|v| !v.is_finite()) {
                return Err(not_converged("non-finite Jacobian"));
            }
            let scale: Vec<f64> = jac.column_iter().map(|c| c.norm().max(1e-12)).collect();

            let mut accepted = false;
            while lambda <= MAX_LAMBDA {
                let Some(step) = solve_damped_step(&jac, &r, lambda, &scale) else {
                    lambda *= LAMBDA_UP;
                    continue;
                };
                let mut trial: Vec<f64> = params.iter().zip(step.iter()).map(|(p, d)| p + d).collect();
                self.project(&mut trial);
                let r_trial = residuals(&trial);
                let ss_trial = r_trial.norm_squared();

                if ss_trial.is_finite() && ss_trial < ss {
                    let moved: f64 = trial
                        .iter()
                        .zip(&params)
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    let p_norm = params.iter().map(|v| v * v).sum::<f64>().sqrt();

                    converged = ss_trial <= ss_floor
                        || (ss - ss_trial) <= self.config.ftol * ss
                        || moved <= self.config.xtol * (self.config.xtol + p_norm);

                    params = trial;
                    r = r_trial;
                    ss = ss_trial;
                    lambda = (lambda * LAMBDA_DOWN).max(MIN_LAMBDA);
                    accepted = true;
                    break;
                }
                lambda *= LAMBDA_UP;
            }

            if !accepted {
                // No step reduces the SSE: accept only at a stationary point
                // or an (almost) exact fit.
                let free = self.free_mask(&params);
                if gradient_cosine(&jac, &r, &free) <= GTOL || ss <= 1e-16 * (1.0 + y_scale) {
                    converged = true;
                } else {
                    return Err(not_converged(format!(
                        "damping exhausted without reducing SSE={ss:.6e}"
                    )));
                }
                lambda = INITIAL_LAMBDA;
            }
            trace!(iterations, ss, lambda, "lm step");
        }

        let jac = jacobian(&residuals, &params, &r);
        let covariance = covariance(&jac, ss, y.len(), n_params, weights.is_some_and(|w| w.absolute));

        Ok(FitResult {
            params,
            covariance,
            sse: ss,
            iterations,
        })
    }
}

fn not_converged(message: impl Into<String>) -> AppError {
    AppError::convergence(FitStage::PointEstimate, message)
}

fn jacobian<F>(residuals: &F, params: &[f64], r0: &DVector<f64>) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let eps = f64::EPSILON.sqrt();
    let mut jac = DMatrix::<f64>::zeros(r0.len(), params.len());
    let mut shifted = params.to_vec();
    for j in 0..params.len() {
        let h = eps * params[j].abs().max(1.0);
        shifted[j] = params[j] + h;
        let r_plus = residuals(&shifted);
        shifted[j] = params[j];
        jac.set_column(j, &((r_plus - r0) / h));
    }
    jac
}

/// Largest cosine between the residual vector and a free Jacobian column.
fn gradient_cosine(jac: &DMatrix<f64>, r: &DVector<f64>, free: &[bool]) -> f64 {
    let r_norm = r.norm();
    if r_norm == 0.0 {
        return 0.0;
    }
    jac.column_iter()
        .zip(free)
        .filter(|(_, is_free)| **is_free)
        .map(|(c, _)| {
            let c_norm = c.norm();
            if c_norm == 0.0 { 0.0 } else { (c.dot(r) / (c_norm * r_norm)).abs() }
        })
        .fold(0.0, f64::max)
}

fn covariance(jac: &DMatrix<f64>, ss: f64, n: usize, p: usize, absolute: bool) -> Option<DMatrix<f64>> {
    let jtj = jac.transpose() * jac;
    let inv = jtj.pseudo_inverse(1e-14).ok()?;
    if inv.iter().any(|v| !v.is_finite()) {
        return None;
    }
    if absolute {
        return Some(inv);
    }
    if n <= p {
        return None;
    }
    Some(inv * (ss / (n - p) as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(x: f64, p: &[f64]) -> f64 {
        p[0] * x + p[1]
    }

    #[test]
    fn recovers_exact_line_from_ones() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|&v| 3.0 * v - 2.0).collect();
        let fit = LevenbergMarquardt::default()
            .fit(&line, &x, &y, &[1.0, 1.0], None)
            .unwrap();
        assert_relative_eq!(fit.params[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(fit.params[1], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn matches_ordinary_least_squares_on_noisy_line() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.1, 3.9, 6.2, 7.8, 10.1];
        let fit = LevenbergMarquardt::default()
            .fit(&line, &x, &y, &[1.0, 1.0], None)
            .unwrap();
        // Closed-form OLS: slope 1.99, intercept 0.05.
        assert_relative_eq!(fit.params[0], 1.99, epsilon = 1e-6);
        assert_relative_eq!(fit.params[1], 0.05, epsilon = 1e-6);
        let cov = fit.covariance.unwrap();
        assert!(cov[(0, 0)] > 0.0);
    }

    #[test]
    fn fits_exponential_decay() {
        let model = |x: f64, p: &[f64]| p[0] * (-p[1] * x).exp();
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|&v| 5.0 * (-0.7 * v).exp()).collect();
        let fit = LevenbergMarquardt::default()
            .fit(&model, &x, &y, &[1.0, 1.0], None)
            .unwrap();
        assert_relative_eq!(fit.params[0], 5.0, epsilon = 1e-5);
        assert_relative_eq!(fit.params[1], 0.7, epsilon = 1e-5);
    }

    #[test]
    fn absolute_sigma_keeps_unscaled_covariance() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [1.1, 1.9, 3.2, 3.9];
        let sigma = vec![0.5; 4];
        let abs = LevenbergMarquardt::default()
            .fit(&line, &x, &y, &[1.0, 0.0], Some(&Weights { sigma: sigma.clone(), absolute: true }))
            .unwrap();
        let rel = LevenbergMarquardt::default()
            .fit(&line, &x, &y, &[1.0, 0.0], Some(&Weights { sigma, absolute: false }))
            .unwrap();
        let ca = abs.covariance.unwrap();
        let cr = rel.covariance.unwrap();
        assert_relative_eq!(cr[(0, 0)] / ca[(0, 0)], rel.sse / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn bounds_are_respected() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|&v| 3.0 * v - 2.0).collect();
        let lm = LevenbergMarquardt::new(FitConfig {
            bounds: Some(vec![
                ParamBounds { lower: 0.0, upper: 2.0 },
                ParamBounds { lower: f64::NEG_INFINITY, upper: f64::INFINITY },
            ]),
            ..FitConfig::default()
        })
        .unwrap();
        let fit = lm.fit(&line, &x, &y, &[1.0, 1.0], None).unwrap();
        assert!(fit.params[0] <= 2.0);
    }

    #[test]
    fn iteration_cap_reports_convergence_error() {
        let model = |x: f64, p: &[f64]| p[0] * (-p[1] * x).exp();
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 50.0 * (-0.3 * v).exp() + 0.1 * v.sin()).collect();
        let lm = LevenbergMarquardt::new(FitConfig {
            max_iterations: 1,
            ..FitConfig::default()
        })
        .unwrap();
        let err = lm.fit(&model, &x, &y, &[1.0, 1.0], None).unwrap_err();
        assert!(matches!(err, AppError::Convergence { .. }));
    }

    #[test]
    fn rejects_invalid_weights_and_shapes() {
        let lm = LevenbergMarquardt::default();
        let bad_sigma = Weights { sigma: vec![1.0, 0.0], absolute: true };
        assert!(matches!(
            lm.fit(&line, &[1.0, 2.0], &[1.0, 2.0], &[1.0, 1.0], Some(&bad_sigma)),
            Err(AppError::Input(_))
        ));
        assert!(matches!(
            lm.fit(&line, &[1.0], &[1.0], &[1.0, 1.0], None),
            Err(AppError::Input(_))
        ));
    }
}
