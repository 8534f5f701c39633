//! Leave-one-out refits for the BCa acceleration term.

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::domain::JackknifeEnsemble;
use crate::error::{AppError, FitStage};
use crate::fit::FitAdapter;
use crate::models::Model;

/// Refit `(x, y)` once per point with that point removed.
///
/// Row `i` of the result holds the parameters fitted without point `i`. Any
/// failed refit aborts the whole run.
pub fn jackknife_fits(
    model: &dyn Model,
    fitter: &dyn FitAdapter,
    x: &[f64],
    y: &[f64],
    guess: &[f64],
    parallel: bool,
) -> Result<JackknifeEnsemble, AppError> {
    let n = y.len();
    let p = guess.len();
    if x.len() != n {
        return Err(AppError::input(format!(
            "Jackknife needs x and y of equal length (got {} and {n}).",
            x.len()
        )));
    }
    if p == 0 || n < p + 1 || n < 2 {
        return Err(AppError::input(format!(
            "Jackknife needs at least {} points for {p} parameters, got {n}.",
            (p + 1).max(2)
        )));
    }

    debug!(n, p, "jackknife started");

    let leave_out = |i: usize| -> Result<Vec<f64>, AppError> {
        let xs: Vec<f64> = x.iter().enumerate().filter(|&(j, _)| j != i).map(|(_, &v)| v).collect();
        let ys: Vec<f64> = y.iter().enumerate().filter(|&(j, _)| j != i).map(|(_, &v)| v).collect();
        fitter
            .fit(model, &xs, &ys, guess, None)
            .map(|fit| fit.params)
            .map_err(|e| e.at_stage(FitStage::Jackknife { left_out: i }))
    };

    let rows: Vec<Vec<f64>> = if parallel {
        (0..n).into_par_iter().map(leave_out).collect::<Result<_, _>>()?
    } else {
        (0..n).map(leave_out).collect::<Result<_, _>>()?
    };

    let params = DMatrix::from_row_iterator(n, p, rows.iter().flat_map(|r| r.iter().copied()));
    Ok(JackknifeEnsemble { params })
}
