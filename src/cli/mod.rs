//! Command-line parsing for the bootstrap curve fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting and resampling code. `app::run_config_from_args` maps these structs
//! onto the library's configuration types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::IntervalMethod;
use crate::models::ModelKind;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "bfit", version, about = "Residual-bootstrap uncertainty for nonlinear curve fits")]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a curve, bootstrap it, and print parameter intervals.
    Fit(FitArgs),
    /// Print asymptotic (linearized) intervals from a single fit.
    Classical(ClassicalArgs),
}

/// Options shared by every subcommand that fits data.
#[derive(Debug, Args, Clone)]
pub struct DataArgs {
    /// Observations CSV: `x,y[,y2,...]` (wide) or `x,y` with repeated x (long).
    #[arg(short, long, value_name = "CSV")]
    pub data: PathBuf,

    /// Model to fit.
    #[arg(short, long, value_enum)]
    pub model: ModelKind,

    /// Confidence level in percent.
    #[arg(short, long, default_value_t = 95.0)]
    pub confidence: f64,

    /// Fixed initial guess, comma separated (default: data-driven per model).
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub guess: Option<Vec<f64>>,

    /// Parameter names for the output table, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub names: Option<Vec<String>>,

    /// Iteration limit for each Levenberg-Marquardt fit.
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub common: DataArgs,

    /// Number of bootstrap iterations.
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub straps: usize,

    /// Interval method for the parameters.
    #[arg(long, value_enum, default_value_t = IntervalMethod::Percentile)]
    pub method: IntervalMethod,

    /// Resample from all residuals instead of within each replicate group.
    #[arg(long)]
    pub pooled: bool,

    /// Draw residuals from a fitted Normal instead of the empirical values.
    #[arg(long)]
    pub parametric: bool,

    /// Evaluation grid size over the data's x range (or over `--xrange`).
    #[arg(long, default_value_t = 100, conflicts_with = "xpts")]
    pub resolution: usize,

    /// Explicit evaluation points, comma separated.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, conflicts_with = "xrange")]
    pub xpts: Option<Vec<f64>>,

    /// Evaluation grid bounds instead of the data's x range.
    #[arg(long, value_name = "START,END", value_parser = parse_range, allow_hyphen_values = true)]
    pub xrange: Option<(f64, f64)>,

    /// Base random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Skip failed refits, requiring at least MIN to succeed.
    #[arg(long, value_name = "MIN")]
    pub tolerant: Option<usize>,

    /// Redraw cap for piecewise-conservative resampling.
    #[arg(long, default_value_t = 1000)]
    pub max_resample_attempts: usize,

    /// Run refits on one thread.
    #[arg(long)]
    pub sequential: bool,

    /// Export every bootstrap refit (parameters + curve) to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export the percentile band to JSON.
    #[arg(long = "export-band", value_name = "JSON")]
    pub export_band: Option<PathBuf>,
}

/// Parse `START,END` into a pair of finite bounds.
fn parse_range(s: &str) -> Result<(f64, f64), String> {
    let (start, end) = s
        .split_once(',')
        .ok_or_else(|| format!("expected START,END, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid bound '{v}': {e}"))
            .and_then(|x| if x.is_finite() { Ok(x) } else { Err(format!("bound '{v}' is not finite")) })
    };
    Ok((parse(start)?, parse(end)?))
}

#[derive(Debug, Args, Clone)]
pub struct ClassicalArgs {
    #[command(flatten)]
    pub common: DataArgs,

    /// Evaluation grid size for the confidence / prediction bands.
    #[arg(long, default_value_t = 100)]
    pub resolution: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fit_flags_parse() {
        let cli = Cli::try_parse_from([
            "bfit", "fit", "--data", "d.csv", "--model", "logistic4", "--straps", "200", "--method", "bca",
            "--pooled", "--xpts", "-1,0,1", "--names", "lo,hi,mid,k", "--tolerant", "150",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.common.model, ModelKind::Logistic4);
        assert_eq!(args.straps, 200);
        assert_eq!(args.method, IntervalMethod::Bca);
        assert!(args.pooled && !args.parametric);
        assert_eq!(args.xpts, Some(vec![-1.0, 0.0, 1.0]));
        assert_eq!(args.common.names.as_ref().map(Vec::len), Some(4));
        assert_eq!(args.tolerant, Some(150));
    }

    #[test]
    fn xrange_takes_two_bounds() {
        let cli = Cli::try_parse_from([
            "bfit", "fit", "--data", "d.csv", "--model", "linear", "--xrange", "-2,8", "--resolution", "11",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.xrange, Some((-2.0, 8.0)));
        assert_eq!(args.resolution, 11);

        let one = Cli::try_parse_from(["bfit", "fit", "--data", "d.csv", "--model", "linear", "--xrange", "1"]);
        assert!(one.is_err());
        let both = Cli::try_parse_from([
            "bfit", "fit", "--data", "d.csv", "--model", "linear", "--xrange", "0,1", "--xpts", "0.5",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn resolution_and_xpts_conflict() {
        let res = Cli::try_parse_from([
            "bfit", "fit", "--data", "d.csv", "--model", "linear", "--resolution", "10", "--xpts", "1,2",
        ]);
        assert!(res.is_err());
    }
}
