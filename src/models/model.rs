//! The model boundary and the built-in model kinds used by the CLI.
//!
//! Library callers can pass any `Fn(f64, &[f64]) -> f64 + Sync` as a model;
//! `ModelKind` covers the common curve shapes with sensible starting guesses.

use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::Observations;
use crate::fit::GuessGenerator;
use crate::math::solve_least_squares;

/// A parametric curve `y = f(x; params)`.
///
/// `Sync` because bootstrap iterations evaluate the model from worker threads.
pub trait Model: Sync {
    fn eval(&self, x: f64, params: &[f64]) -> f64;
}

impl<F> Model for F
where
    F: Fn(f64, &[f64]) -> f64 + Sync,
{
    fn eval(&self, x: f64, params: &[f64]) -> f64 {
        self(x, params)
    }
}

/// Evaluate `model` at every point of `xs`.
pub fn predict_all(model: &dyn Model, xs: &[f64], params: &[f64]) -> Vec<f64> {
    xs.iter().map(|&x| model.eval(x, params)).collect()
}

/// Built-in model shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// `a·x + b`
    Linear,
    /// `a·x² + b·x + c`
    Quadratic,
    /// `a·exp(-b·x) + c`
    ExpDecay,
    /// `vmax·x / (km + x)`
    MichaelisMenten,
    /// `bottom + (top - bottom) / (1 + exp(-k·(x - x0)))`
    Logistic4,
    /// `top·xⁿ / (kⁿ + xⁿ)`
    Hill,
}

impl ModelKind {
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Quadratic => "quadratic",
            ModelKind::ExpDecay => "exponential decay",
            ModelKind::MichaelisMenten => "Michaelis-Menten",
            ModelKind::Logistic4 => "4-parameter logistic",
            ModelKind::Hill => "Hill",
        }
    }

    pub fn param_count(self) -> usize {
        self.param_names().len()
    }

    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::Linear => &["a", "b"],
            ModelKind::Quadratic => &["a", "b", "c"],
            ModelKind::ExpDecay => &["a", "b", "c"],
            ModelKind::MichaelisMenten => &["vmax", "km"],
            ModelKind::Logistic4 => &["bottom", "top", "x0", "k"],
            ModelKind::Hill => &["top", "k", "n"],
        }
    }
}

impl Model for ModelKind {
    fn eval(&self, x: f64, p: &[f64]) -> f64 {
        match self {
            ModelKind::Linear => p[0] * x + p[1],
            ModelKind::Quadratic => p[0] * x * x + p[1] * x + p[2],
            ModelKind::ExpDecay => p[0] * (-p[1] * x).exp() + p[2],
            ModelKind::MichaelisMenten => p[0] * x / (p[1] + x),
            ModelKind::Logistic4 => p[0] + (p[1] - p[0]) / (1.0 + (-p[3] * (x - p[2])).exp()),
            ModelKind::Hill => {
                let xn = x.powf(p[2]);
                p[0] * xn / (p[1].powf(p[2]) + xn)
            }
        }
    }
}

impl GuessGenerator for ModelKind {
    /// Data-driven starting point computed from group means.
    fn guess(&self, obs: &Observations) -> Vec<f64> {
        let mut pts: Vec<(f64, f64)> = obs
            .x()
            .iter()
            .copied()
            .zip(obs.group_means())
            .collect();
        pts.sort_by(|a, b| a.0.total_cmp(&b.0));
        let xs: Vec<f64> = pts.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = pts.iter().map(|p| p.1).collect();

        let (x_lo, x_hi) = obs.x_range();
        let span = (x_hi - x_lo).abs().max(1e-9);
        let y_min = ys.iter().copied().fold(f64::INFINITY, f64::min);
        let y_max = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let y_first = ys.first().copied().unwrap_or(0.0);
        let y_last = ys.last().copied().unwrap_or(0.0);

        match self {
            ModelKind::Linear => polyfit(&xs, &ys, 1).unwrap_or_else(|| vec![1.0, 1.0]),
            ModelKind::Quadratic => polyfit(&xs, &ys, 2).unwrap_or_else(|| vec![1.0, 1.0, 1.0]),
            ModelKind::ExpDecay => vec![y_first - y_last, 3.0 / span, y_last],
            ModelKind::MichaelisMenten => {
                let vmax = y_max * 1.2;
                vec![vmax, x_at_level(&xs, &ys, vmax / 2.0).max(1e-6)]
            }
            ModelKind::Logistic4 => {
                let rising = y_last >= y_first;
                let mid = (y_min + y_max) / 2.0;
                let k = if rising { 8.0 / span } else { -8.0 / span };
                vec![y_min, y_max, x_at_level(&xs, &ys, mid), k]
            }
            ModelKind::Hill => vec![y_max, x_at_level(&xs, &ys, y_max / 2.0).max(1e-6), 1.0],
        }
    }
}

/// Least-squares polynomial coefficients, highest power first.
fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    if xs.len() <= degree {
        return None;
    }
    let cols = degree + 1;
    let mut design = DMatrix::<f64>::zeros(xs.len(), cols);
    for (i, &x) in xs.iter().enumerate() {
        for j in 0..cols {
            design[(i, j)] = x.powi((degree - j) as i32);
        }
    }
    let coef = solve_least_squares(&design, &DVector::from_column_slice(ys))?;
    Some(coef.iter().copied().collect())
}

/// x of the point whose y is closest to `level`.
fn x_at_level(xs: &[f64], ys: &[f64], level: f64) -> f64 {
    xs.iter()
        .zip(ys)
        .min_by(|a, b| (a.1 - level).abs().total_cmp(&(b.1 - level).abs()))
        .map(|(&x, _)| x)
        .unwrap_or(1.0)
}
