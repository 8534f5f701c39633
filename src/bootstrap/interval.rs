//! Percentile and BCa intervals over a bootstrap ensemble.
//!
//! Both methods are pure functions of the ensemble (plus, for BCa, the point
//! estimate and jackknife refits): re-running them on the same inputs yields
//! identical bounds.

use nalgebra::DMatrix;
use tracing::{info, warn};

use crate::bootstrap::jackknife::jackknife_fits;
use crate::domain::{
    BootstrapEnsemble, ConfidenceInterval, IntervalConfig, IntervalMethod, Observations,
};
use crate::error::{AppError, FitStage, Tail};
use crate::fit::{FitAdapter, GuessGenerator, initial_guess};
use crate::math::{check_confidence, norm_cdf, norm_ppf, percentile_sorted, sorted_copy};
use crate::models::Model;

/// Adjusted positions closer than this many samples to either end of the
/// ensemble are reported as unstable but still used.
const EDGE_SAMPLES: f64 = 10.0;

/// A BCa bound that was read from near the edge of the ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityWarning {
    pub parameter: usize,
    pub tail: Tail,
    /// Sample index the adjusted percentile selected.
    pub index: usize,
    pub n_straps: usize,
}

/// BCa intervals plus the constants that produced them.
#[derive(Debug, Clone)]
pub struct BcaOutcome {
    pub intervals: Vec<ConfidenceInterval>,
    /// Point estimate the bias correction was measured against.
    pub point: Vec<f64>,
    pub z0: Vec<f64>,
    pub acceleration: Vec<f64>,
    /// Adjusted `(lower, upper)` percentiles, in percent.
    pub adjusted: Vec<(f64, f64)>,
    pub warnings: Vec<StabilityWarning>,
}

/// Column-wise percentile intervals; the central value is the median.
pub fn percentile_intervals(
    samples: &DMatrix<f64>,
    confidence: f64,
) -> Result<Vec<ConfidenceInterval>, AppError> {
    check_confidence(confidence)?;
    if samples.nrows() == 0 {
        return Err(AppError::input("Cannot compute intervals from an empty ensemble."));
    }
    let lo = (100.0 - confidence) / 2.0;
    let hi = (100.0 + confidence) / 2.0;
    Ok(samples
        .column_iter()
        .map(|col| {
            let sorted = sorted_copy(col.iter().copied());
            ConfidenceInterval {
                lower: percentile_sorted(&sorted, lo),
                central: percentile_sorted(&sorted, 50.0),
                upper: percentile_sorted(&sorted, hi),
                level: confidence,
            }
        })
        .collect())
}

/// Percentile band for every evaluation point of the ensemble's curves.
pub fn percentile_band(
    ensemble: &BootstrapEnsemble,
    confidence: f64,
) -> Result<Vec<ConfidenceInterval>, AppError> {
    percentile_intervals(&ensemble.curves, confidence)
}

/// BCa intervals from precomputed bootstrap and jackknife parameter sets.
///
/// `bootstrap` is `s × p`, `jackknife` is `n × p`. Fails with
/// `AppError::Instability` when an adjusted percentile is undefined or lands
/// on the first or last sample.
pub fn bca_from_estimates(
    point: &[f64],
    bootstrap: &DMatrix<f64>,
    jackknife: &DMatrix<f64>,
    confidence: f64,
) -> Result<BcaOutcome, AppError> {
    check_confidence(confidence)?;
    let p = point.len();
    if bootstrap.ncols() != p || jackknife.ncols() != p {
        return Err(AppError::input(format!(
            "Parameter count mismatch: point has {p}, bootstrap {}, jackknife {}.",
            bootstrap.ncols(),
            jackknife.ncols()
        )));
    }
    let s = bootstrap.nrows();
    if s < 2 || jackknife.nrows() < 2 {
        return Err(AppError::input(
            "BCa needs at least two bootstrap samples and two jackknife refits.",
        ));
    }

    let alpha_lo = (100.0 - confidence) / 200.0;
    let alpha_hi = (100.0 + confidence) / 200.0;
    let last = (s - 1) as f64;

    let mut z0 = Vec::with_capacity(p);
    let mut acceleration = Vec::with_capacity(p);
    let mut adjusted = Vec::with_capacity(p);
    for j in 0..p {
        let col = bootstrap.column(j);
        let below = col.iter().filter(|&&v| v < point[j]).count();
        let z = norm_ppf(below as f64 / s as f64);
        let jack: Vec<f64> = jackknife.column(j).iter().copied().collect();
        let a = acceleration_constant(&jack);
        let adjust = |alpha: f64| {
            let zs = z + norm_ppf(alpha);
            norm_cdf(z + zs / (1.0 - a * zs))
        };
        z0.push(z);
        acceleration.push(a);
        adjusted.push((adjust(alpha_lo), adjust(alpha_hi)));
    }

    let tails = |j: usize| [(Tail::Lower, adjusted[j].0), (Tail::Upper, adjusted[j].1)];

    for j in 0..p {
        for (tail, aval) in tails(j) {
            if aval.is_nan() {
                return Err(AppError::Instability {
                    parameter: j,
                    tail,
                    reason: format!(
                        "adjusted percentile is undefined (z0 = {}, a = {}); the bootstrap or jackknife distribution is probably constant",
                        z0[j], acceleration[j]
                    ),
                });
            }
        }
    }

    let mut warnings = Vec::new();
    for j in 0..p {
        for (tail, aval) in tails(j) {
            let index = (last * aval).round();
            if index <= 0.0 || index >= last {
                return Err(AppError::Instability {
                    parameter: j,
                    tail,
                    reason: format!(
                        "adjusted percentile {:.4}% selects sample {index} of {s}; more bootstrap iterations are needed",
                        100.0 * aval
                    ),
                });
            }
            if index < EDGE_SAMPLES || index >= s as f64 - EDGE_SAMPLES {
                warn!(parameter = j, %tail, index, n_straps = s, "BCa bound read near the edge of the ensemble");
                warnings.push(StabilityWarning {
                    parameter: j,
                    tail,
                    index: index as usize,
                    n_straps: s,
                });
            }
        }
    }

    let intervals = (0..p)
        .map(|j| {
            let sorted = sorted_copy(bootstrap.column(j).iter().copied());
            ConfidenceInterval {
                lower: percentile_sorted(&sorted, 100.0 * adjusted[j].0),
                central: percentile_sorted(&sorted, 50.0),
                upper: percentile_sorted(&sorted, 100.0 * adjusted[j].1),
                level: confidence,
            }
        })
        .collect();

    Ok(BcaOutcome {
        intervals,
        point: point.to_vec(),
        z0,
        acceleration,
        adjusted: adjusted.iter().map(|&(lo, hi)| (100.0 * lo, 100.0 * hi)).collect(),
        warnings,
    })
}

/// `Σ(mean - θᵢ)³ / (6·(Σ(mean - θᵢ)²)^1.5)`; NaN when the jackknife values
/// are all equal.
fn acceleration_constant(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let (sum2, sum3) = values.iter().fold((0.0f64, 0.0f64), |(s2, s3), v| {
        let d = mean - v;
        (s2 + d * d, s3 + d * d * d)
    });
    sum3 / (6.0 * sum2.powf(1.5))
}

/// Full BCa path: refit the point estimate on the flattened data, run the
/// jackknife, then adjust the bootstrap percentiles.
pub fn bca_intervals(
    model: &dyn Model,
    fitter: &dyn FitAdapter,
    obs: &Observations,
    bootstrap: &DMatrix<f64>,
    guess: Option<&dyn GuessGenerator>,
    confidence: f64,
    parallel: bool,
) -> Result<BcaOutcome, AppError> {
    check_confidence(confidence)?;
    let (x, y) = obs.flattened();
    let flat = Observations::single(x.clone(), y.clone())?;
    let start = initial_guess(guess, &flat, bootstrap.ncols())?;

    let point = fitter
        .fit(model, &x, &y, &start, None)
        .map_err(|e| e.at_stage(FitStage::PointEstimate))?;
    let jack = jackknife_fits(model, fitter, &x, &y, &start, parallel)?;
    info!(jackknife_refits = jack.len(), "jackknife finished");

    bca_from_estimates(&point.params, bootstrap, &jack.params, confidence)
}

/// Parameter intervals plus the curve band for one ensemble.
#[derive(Debug, Clone)]
pub struct IntervalReport {
    pub params: Vec<ConfidenceInterval>,
    pub band: Vec<ConfidenceInterval>,
    pub method: IntervalMethod,
    /// Present for `IntervalMethod::Bca`.
    pub bca: Option<BcaOutcome>,
}

/// Apply `config.method` to the parameters; the curve band is always the
/// percentile band.
pub fn estimate_intervals(
    model: &dyn Model,
    fitter: &dyn FitAdapter,
    obs: &Observations,
    ensemble: &BootstrapEnsemble,
    guess: Option<&dyn GuessGenerator>,
    config: &IntervalConfig,
    parallel: bool,
) -> Result<IntervalReport, AppError> {
    if let Some(names) = &config.names {
        if names.len() != ensemble.n_params() {
            return Err(AppError::input(format!(
                "Got {} parameter names for {} parameters.",
                names.len(),
                ensemble.n_params()
            )));
        }
    }
    let band = percentile_band(ensemble, config.confidence)?;
    let (params, bca) = match config.method {
        IntervalMethod::Percentile => (percentile_intervals(&ensemble.params, config.confidence)?, None),
        IntervalMethod::Bca => {
            let outcome = bca_intervals(
                model,
                fitter,
                obs,
                &ensemble.params,
                guess,
                config.confidence,
                parallel,
            )?;
            (outcome.intervals.clone(), Some(outcome))
        }
    };
    Ok(IntervalReport {
        params,
        band,
        method: config.method,
        bca,
    })
}
