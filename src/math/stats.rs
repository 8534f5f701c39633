//! Small statistics helpers for the interval estimators.
//!
//! Normal and Student-t transforms are delegated to `statrs`; percentiles use
//! linear interpolation between order statistics (position `q·(n-1)`), which is
//! the convention most curve-fitting notebooks report.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::error::AppError;

fn standard_normal() -> Result<Normal, AppError> {
    Normal::new(0.0, 1.0).map_err(|e| AppError::input(format!("Standard normal error: {e}")))
}

/// Standard normal CDF `Φ(z)`. NaN in, NaN out.
pub fn norm_cdf(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    match standard_normal() {
        Ok(n) => n.cdf(z),
        Err(_) => f64::NAN,
    }
}

/// Standard normal quantile `Φ⁻¹(p)`.
///
/// `p = 0` and `p = 1` map to `∓∞`; anything outside `[0, 1]` (or NaN) is NaN.
/// Degenerate bootstrap distributions rely on these values propagating into
/// the BCa formula rather than being clipped.
pub fn norm_ppf(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }
    match standard_normal() {
        Ok(n) => n.inverse_cdf(p),
        Err(_) => f64::NAN,
    }
}

/// Student-t quantile with `dof` degrees of freedom.
pub fn student_t_ppf(p: f64, dof: f64) -> Result<f64, AppError> {
    if !(p > 0.0 && p < 1.0) {
        return Err(AppError::input(format!("Probability must be in (0, 1), got {p}.")));
    }
    let t = StudentsT::new(0.0, 1.0, dof)
        .map_err(|e| AppError::input(format!("Invalid Student-t degrees of freedom {dof}: {e}")))?;
    Ok(t.inverse_cdf(p))
}

/// Validate a confidence level given in percent.
pub fn check_confidence(confidence: f64) -> Result<(), AppError> {
    if confidence.is_finite() && confidence > 0.0 && confidence < 100.0 {
        Ok(())
    } else {
        Err(AppError::input(format!(
            "Confidence level must be in (0, 100), got {confidence}."
        )))
    }
}

/// Percentile `q` (in percent) of already-sorted data.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() || q.is_nan() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = (q / 100.0).clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        return sorted[i];
    }
    let t = pos - i as f64;
    (1.0 - t) * sorted[i] + t * sorted[j]
}

/// Sort a copy of `values` (NaNs last).
pub fn sorted_copy(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.into_iter().collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Percentile `q` (in percent) of unsorted data.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    percentile_sorted(&sorted_copy(values.iter().copied()), q)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population (ddof = 0) standard deviation.
pub fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.max(0.0).sqrt()
}

/// True if `values` holds at least two distinct (bitwise-unequal) numbers.
pub fn has_two_distinct(values: impl IntoIterator<Item = f64>) -> bool {
    let mut first: Option<f64> = None;
    for v in values {
        match first {
            None => first = Some(v),
            Some(f) if f != v => return true,
            Some(_) => {}
        }
    }
    false
}
