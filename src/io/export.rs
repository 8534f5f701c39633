//! Export the bootstrap ensemble to CSV.
//!
//! One row per successful iteration: the refit parameters followed by the refit
//! curve at each evaluation point. Easy to load into a spreadsheet or a
//! notebook for custom plots.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::BootstrapEnsemble;
use crate::error::AppError;

pub fn write_ensemble_csv(path: &Path, ensemble: &BootstrapEnsemble, names: &[String]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_ensemble(BufWriter::new(file), ensemble, names)
}

pub fn write_ensemble<W: Write>(mut out: W, ensemble: &BootstrapEnsemble, names: &[String]) -> Result<(), AppError> {
    if names.len() != ensemble.n_params() {
        return Err(AppError::input(format!(
            "Got {} parameter names for {} parameters.",
            names.len(),
            ensemble.n_params()
        )));
    }
    let io_err = |e: std::io::Error| AppError::input(format!("Failed to write export CSV: {e}"));

    let mut header = vec!["iteration".to_string()];
    header.extend(names.iter().cloned());
    header.extend(ensemble.eval_points.iter().map(|x| format!("y@{x}")));
    writeln!(out, "{}", header.join(",")).map_err(io_err)?;

    for i in 0..ensemble.n_straps() {
        let mut row = vec![i.to_string()];
        row.extend(ensemble.params.row(i).iter().map(|v| format!("{v:.10}")));
        row.extend(ensemble.curves.row(i).iter().map(|v| format!("{v:.10}")));
        writeln!(out, "{}", row.join(",")).map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    Ok(())
}
