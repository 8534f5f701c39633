//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - built once and shared read-only across bootstrap workers
//! - exported to JSON/CSV for external plotting
//! - rendered into summary tables

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Observed data: `n` independent-variable values and an `n × m` block of
/// dependent values, one row per x and one column per replicate.
///
/// `m == 1` is the ordinary single-measurement case.
#[derive(Debug, Clone)]
pub struct Observations {
    x: Vec<f64>,
    y: DMatrix<f64>,
}

impl Observations {
    /// One measurement per x.
    pub fn single(x: Vec<f64>, y: Vec<f64>) -> Result<Self, AppError> {
        if x.len() != y.len() {
            return Err(AppError::input(format!(
                "x has {} values but y has {}.",
                x.len(),
                y.len()
            )));
        }
        let n = y.len();
        Self::from_matrix(x, DMatrix::from_vec(n, 1, y))
    }

    /// `rows[i]` holds the replicate measurements taken at `x[i]`.
    pub fn replicated(x: Vec<f64>, rows: Vec<Vec<f64>>) -> Result<Self, AppError> {
        if x.len() != rows.len() {
            return Err(AppError::input(format!(
                "x has {} values but there are {} replicate groups.",
                x.len(),
                rows.len()
            )));
        }
        let m = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != m) {
            return Err(AppError::input(
                "All replicate groups must have the same number of measurements.",
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::from_matrix(x, DMatrix::from_row_slice(rows.len(), m, &flat))
    }

    pub fn from_matrix(x: Vec<f64>, y: DMatrix<f64>) -> Result<Self, AppError> {
        if x.is_empty() || y.ncols() == 0 {
            return Err(AppError::input("No observations to fit."));
        }
        if x.len() != y.nrows() {
            return Err(AppError::input(format!(
                "x has {} values but y has {} rows.",
                x.len(),
                y.nrows()
            )));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(AppError::input("Observations must be finite."));
        }
        Ok(Self { x, y })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &DMatrix<f64> {
        &self.y
    }

    /// Number of groups (rows).
    pub fn n_groups(&self) -> usize {
        self.y.nrows()
    }

    /// Replicates per group (columns).
    pub fn replicates(&self) -> usize {
        self.y.ncols()
    }

    pub fn is_replicated(&self) -> bool {
        self.replicates() > 1
    }

    /// Total number of dependent measurements (`n × m`).
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn group_means(&self) -> Vec<f64> {
        self.y.row_iter().map(|r| r.mean()).collect()
    }

    /// Population (ddof = 0) standard deviation of each group.
    pub fn group_stds(&self) -> Vec<f64> {
        self.y
            .row_iter()
            .map(|r| r.variance().max(0.0).sqrt())
            .collect()
    }

    /// `(x, y)` flattened row-major, with x tiled across replicate columns.
    pub fn flattened(&self) -> (Vec<f64>, Vec<f64>) {
        let m = self.replicates();
        let mut xs = Vec::with_capacity(self.len());
        let mut ys = Vec::with_capacity(self.len());
        for (i, &xi) in self.x.iter().enumerate() {
            for j in 0..m {
                xs.push(xi);
                ys.push(self.y[(i, j)]);
            }
        }
        (xs, ys)
    }

    /// `(min, max)` of the independent variable.
    pub fn x_range(&self) -> (f64, f64) {
        self.x
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

/// Output of a single nonlinear fit.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub params: Vec<f64>,
    /// `p × p` parameter covariance, when the adapter can estimate it.
    pub covariance: Option<DMatrix<f64>>,
    /// Weighted sum of squared residuals at the solution.
    pub sse: f64,
    pub iterations: usize,
}

/// How residuals are resampled for each bootstrap iteration.
///
/// `Piecewise*` resample within each replicate group; `Pooled*` resample from all
/// residuals at once. `*Conservative` draws from the empirical residuals;
/// `*Parametric` draws from a zero-mean Normal with the empirical deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResamplingPolicy {
    PooledConservative,
    PooledParametric,
    PiecewiseConservative,
    PiecewiseParametric,
}

impl ResamplingPolicy {
    pub fn from_flags(piecewise: bool, conservative: bool) -> Self {
        match (piecewise, conservative) {
            (true, true) => ResamplingPolicy::PiecewiseConservative,
            (true, false) => ResamplingPolicy::PiecewiseParametric,
            (false, true) => ResamplingPolicy::PooledConservative,
            (false, false) => ResamplingPolicy::PooledParametric,
        }
    }

    pub fn is_piecewise(self) -> bool {
        matches!(
            self,
            ResamplingPolicy::PiecewiseConservative | ResamplingPolicy::PiecewiseParametric
        )
    }

    pub fn is_conservative(self) -> bool {
        matches!(
            self,
            ResamplingPolicy::PooledConservative | ResamplingPolicy::PiecewiseConservative
        )
    }

    /// Piecewise resampling needs replicates; fall back to the pooled variant
    /// with the same conservative/parametric choice otherwise.
    pub fn effective_for(self, obs: &Observations) -> Self {
        if obs.is_replicated() {
            self
        } else {
            ResamplingPolicy::from_flags(false, self.is_conservative())
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ResamplingPolicy::PooledConservative => "pooled / conservative",
            ResamplingPolicy::PooledParametric => "pooled / parametric",
            ResamplingPolicy::PiecewiseConservative => "piecewise / conservative",
            ResamplingPolicy::PiecewiseParametric => "piecewise / parametric",
        }
    }
}

/// Where fitted curves are evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPoints {
    /// Uniform grid of `resolution` points over the data's x-range.
    Grid { resolution: usize },
    /// Uniform grid of `resolution` points over `[start, end]`.
    Range { start: f64, end: f64, resolution: usize },
    /// Exactly these points.
    Explicit(Vec<f64>),
}

impl Default for EvalPoints {
    fn default() -> Self {
        EvalPoints::Grid { resolution: 100 }
    }
}

impl EvalPoints {
    pub fn resolve(&self, obs: &Observations) -> Result<Vec<f64>, AppError> {
        let (start, end, resolution) = match self {
            EvalPoints::Explicit(points) => {
                if points.is_empty() || points.iter().any(|v| !v.is_finite()) {
                    return Err(AppError::input("Evaluation points must be finite and non-empty."));
                }
                return Ok(points.clone());
            }
            EvalPoints::Grid { resolution } => {
                let (lo, hi) = obs.x_range();
                (lo, hi, *resolution)
            }
            EvalPoints::Range {
                start,
                end,
                resolution,
            } => (*start, *end, *resolution),
        };
        if resolution < 2 {
            return Err(AppError::input("Evaluation resolution must be >= 2."));
        }
        if !(start.is_finite() && end.is_finite()) {
            return Err(AppError::input("Evaluation range must be finite."));
        }
        Ok(linspace(start, end, resolution))
    }
}

/// `n` evenly spaced points from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n as f64 - 1.0);
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// What to do when a bootstrap refit fails to converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the run on the first failed refit.
    #[default]
    FailFast,
    /// Skip failed refits; require at least `min_successes` to succeed.
    Tolerant { min_successes: usize },
}

/// Bootstrap run configuration.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub n_straps: usize,
    pub eval_points: EvalPoints,
    pub piecewise: bool,
    pub conservative: bool,
    /// Base seed; each iteration derives its own substream from it.
    pub seed: u64,
    pub failure: FailurePolicy,
    /// Cap on piecewise-conservative redraws per iteration.
    pub max_resample_attempts: usize,
    pub parallel: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_straps: 1000,
            eval_points: EvalPoints::default(),
            piecewise: true,
            conservative: true,
            seed: 42,
            failure: FailurePolicy::FailFast,
            max_resample_attempts: 1000,
            parallel: true,
        }
    }
}

impl BootstrapConfig {
    pub fn policy(&self) -> ResamplingPolicy {
        ResamplingPolicy::from_flags(self.piecewise, self.conservative)
    }
}

/// Refit parameters and curves from every successful bootstrap iteration.
#[derive(Debug, Clone)]
pub struct BootstrapEnsemble {
    /// `s × p`, one row per successful iteration.
    pub params: DMatrix<f64>,
    /// `s × k`, the refit curve at each evaluation point.
    pub curves: DMatrix<f64>,
    pub eval_points: Vec<f64>,
    /// Policy actually used (after the pooled fallback).
    pub policy: ResamplingPolicy,
    pub attempted: usize,
    pub failures: usize,
}

impl BootstrapEnsemble {
    pub fn n_straps(&self) -> usize {
        self.params.nrows()
    }

    pub fn n_params(&self) -> usize {
        self.params.ncols()
    }

    pub fn failure_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.failures as f64 / self.attempted as f64
        }
    }
}

/// Leave-one-out refits: row `i` is the fit with point `i` removed.
#[derive(Debug, Clone)]
pub struct JackknifeEnsemble {
    pub params: DMatrix<f64>,
}

impl JackknifeEnsemble {
    pub fn len(&self) -> usize {
        self.params.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.params.nrows() == 0
    }
}

/// Interval method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IntervalMethod {
    #[default]
    Percentile,
    Bca,
}

#[derive(Debug, Clone)]
pub struct IntervalConfig {
    /// Confidence level in percent, in `(0, 100)`.
    pub confidence: f64,
    pub method: IntervalMethod,
    /// Optional parameter labels.
    pub names: Option<Vec<String>>,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            confidence: 95.0,
            method: IntervalMethod::Percentile,
            names: None,
        }
    }
}

/// Bounds and central value of one parameter (or one curve point).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub central: f64,
    pub upper: f64,
    /// Confidence level in percent.
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_tiles_x_across_replicates() {
        let obs = Observations::replicated(
            vec![1.0, 2.0],
            vec![vec![10.0, 11.0, 12.0], vec![20.0, 21.0, 22.0]],
        )
        .unwrap();
        let (x, y) = obs.flattened();
        assert_eq!(x, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert_eq!(y, vec![10.0, 11.0, 12.0, 20.0, 21.0, 22.0]);
    }

    #[test]
    fn group_stats_use_population_deviation() {
        let obs = Observations::replicated(vec![0.0], vec![vec![1.0, 3.0]]).unwrap();
        assert_eq!(obs.group_means(), vec![2.0]);
        assert!((obs.group_stds()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ragged_replicates_are_rejected() {
        let err = Observations::replicated(vec![0.0, 1.0], vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(err.is_err());
    }

    #[test]
    fn piecewise_falls_back_to_pooled_without_replicates() {
        let obs = Observations::single(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(
            ResamplingPolicy::PiecewiseConservative.effective_for(&obs),
            ResamplingPolicy::PooledConservative
        );
        assert_eq!(
            ResamplingPolicy::PiecewiseParametric.effective_for(&obs),
            ResamplingPolicy::PooledParametric
        );
    }

    #[test]
    fn default_eval_grid_spans_data_range() {
        let obs = Observations::single(vec![2.0, 5.0, 3.0], vec![0.0; 3]).unwrap();
        let pts = EvalPoints::default().resolve(&obs).unwrap();
        assert_eq!(pts.len(), 100);
        assert!((pts[0] - 2.0).abs() < 1e-12);
        assert!((pts[99] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn range_grid_ignores_the_data_range() {
        let obs = Observations::single(vec![2.0, 5.0, 3.0], vec![0.0; 3]).unwrap();
        let range = EvalPoints::Range {
            start: 0.0,
            end: 10.0,
            resolution: 5,
        };
        assert_eq!(range.resolve(&obs).unwrap(), vec![0.0, 2.5, 5.0, 7.5, 10.0]);

        let too_coarse = EvalPoints::Range {
            start: 0.0,
            end: 10.0,
            resolution: 1,
        };
        assert!(too_coarse.resolve(&obs).is_err());
        let unbounded = EvalPoints::Range {
            start: 0.0,
            end: f64::INFINITY,
            resolution: 5,
        };
        assert!(unbounded.resolve(&obs).is_err());
    }
}
