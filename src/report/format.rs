//! Formatted terminal output.
//!
//! Formatting lives here so the bootstrap and fitting code stay free of
//! presentation details.

use crate::bootstrap::{BcaOutcome, StabilityWarning};
use crate::domain::{BootstrapEnsemble, ConfidenceInterval, FitResult, Observations};
use crate::fit::{ClassicalBands, ClassicalParams};

const LABEL_WIDTH: usize = 22;
const COL_WIDTH: usize = 14;

/// Interval table: one column per parameter, rows for the lower bound, the
/// central value and the upper bound.
pub fn format_interval_table(names: &[String], intervals: &[ConfidenceInterval], central_label: &str) -> String {
    let level = intervals.first().map(|ci| ci.level).unwrap_or(95.0);
    let rows: [(String, fn(&ConfidenceInterval) -> f64); 3] = [
        (format!("{level}% CI Lower Limit"), |ci| ci.lower),
        (central_label.to_string(), |ci| ci.central),
        (format!("{level}% CI Upper Limit"), |ci| ci.upper),
    ];

    let mut out = String::new();
    let mut header = format!("{:<LABEL_WIDTH$}", "");
    for name in names {
        header.push_str(&format!(" {:>COL_WIDTH$}", truncate(name, COL_WIDTH)));
    }
    out.push_str(header.trim_end());
    out.push('\n');

    let mut rule = format!("{:-<LABEL_WIDTH$}", "");
    for _ in names {
        rule.push_str(&format!(" {:-<COL_WIDTH$}", ""));
    }
    out.push_str(&rule);
    out.push('\n');

    for (label, pick) in rows {
        let mut line = format!("{:<LABEL_WIDTH$}", truncate(&label, LABEL_WIDTH));
        for ci in intervals {
            line.push_str(&format!(" {:>COL_WIDTH$}", fmt_num(pick(ci))));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Run header: data shape, policy, refit counts and the point estimate.
pub fn format_run_summary(
    model_name: &str,
    obs: &Observations,
    point: &FitResult,
    ensemble: &BootstrapEnsemble,
) -> String {
    let mut out = String::new();
    let (x_lo, x_hi) = obs.x_range();

    out.push_str("=== bfit - bootstrap curve fit ===\n");
    out.push_str(&format!("Model: {model_name}\n"));
    out.push_str(&format!(
        "Data: groups={} | replicates={} | x=[{x_lo:.4}, {x_hi:.4}]\n",
        obs.n_groups(),
        obs.replicates(),
    ));
    out.push_str(&format!(
        "Point estimate: {} (SSE={:.6}, iterations={})\n",
        fmt_vec(&point.params),
        point.sse,
        point.iterations
    ));
    out.push_str(&format!("Resampling: {}\n", ensemble.policy.display_name()));
    out.push_str(&format!(
        "Refits: {} succeeded / {} attempted",
        ensemble.n_straps(),
        ensemble.attempted
    ));
    if ensemble.failures > 0 {
        out.push_str(&format!(
            " ({} failed, {:.1}%)",
            ensemble.failures,
            100.0 * ensemble.failure_rate()
        ));
    }
    out.push_str("\n\n");
    out
}

/// BCa constants and any near-edge warnings.
pub fn format_bca_details(names: &[String], outcome: &BcaOutcome) -> String {
    let mut out = String::new();
    out.push_str("BCa constants:\n");
    for (j, name) in names.iter().enumerate() {
        let (lo, hi) = outcome.adjusted.get(j).copied().unwrap_or((f64::NAN, f64::NAN));
        out.push_str(&format!(
            "- {name}: z0={} a={} adjusted=[{lo:.3}%, {hi:.3}%]\n",
            fmt_num(outcome.z0.get(j).copied().unwrap_or(f64::NAN)),
            fmt_num(outcome.acceleration.get(j).copied().unwrap_or(f64::NAN)),
        ));
    }
    if !outcome.warnings.is_empty() {
        out.push_str("\nStability warnings:\n");
        for w in &outcome.warnings {
            out.push_str(&format_warning(names, w));
            out.push('\n');
        }
    }
    out
}

fn format_warning(names: &[String], w: &StabilityWarning) -> String {
    let name = names.get(w.parameter).map(String::as_str).unwrap_or("?");
    format!(
        "- {name} ({} bound): sample {} of {} is within the extreme 10; consider more iterations",
        w.tail, w.index, w.n_straps
    )
}

/// Asymptotic parameter intervals and the curve half-widths summary.
pub fn format_classical(names: &[String], params: &ClassicalParams, bands: &ClassicalBands) -> String {
    let mut out = String::new();
    out.push_str(&format_interval_table(names, &params.intervals, "Estimate"));
    let mut se = format!("{:<LABEL_WIDTH$}", "Std. error");
    for v in &params.std_errors {
        se.push_str(&format!(" {:>COL_WIDTH$}", fmt_num(*v)));
    }
    out.push_str(se.trim_end());
    out.push_str("\n\n");

    out.push_str(&format!(
        "Residual std. error: {} on {} dof | reduced chi2 (relative): {} | t={}\n",
        fmt_num(bands.s_err),
        bands.dof,
        fmt_num(bands.chi2_red),
        fmt_num(bands.t_critical)
    ));
    let widest = |v: &[f64]| v.iter().copied().fold(f64::NAN, f64::max);
    out.push_str(&format!(
        "Max half-width over x: confidence={} prediction={}\n",
        fmt_num(widest(&bands.confidence_half_width)),
        fmt_num(widest(&bands.prediction_half_width))
    ));
    out
}

fn fmt_num(v: f64) -> String {
    if v == 0.0 || (v.abs() >= 1e-3 && v.abs() < 1e6) {
        format!("{v:.6}")
    } else {
        format!("{v:.4e}")
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| fmt_num(*x)).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
