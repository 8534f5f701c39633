//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - maps CLI arguments onto run configuration
//! - runs the fit / bootstrap / interval pipeline
//! - prints reports
//! - writes optional exports

use crate::cli::{ClassicalArgs, Cli, Command, FitArgs};
use crate::domain::{BootstrapConfig, EvalPoints, FailurePolicy, IntervalConfig};
use crate::error::AppError;
use crate::fit::FitConfig;
use crate::io::{BandFile, write_band_json, write_ensemble_csv};
use crate::report;

pub mod pipeline;

use pipeline::{ClassicalConfig, RunConfig};

/// Entry point for the `bfit` binary, after argument parsing.
pub fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Classical(args) => handle_classical(&args),
    }
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = run_config_from_args(args);
    let run = pipeline::run_bootstrap(&config)?;

    for e in &run.ingest.row_errors {
        eprintln!("warning: skipped line {}: {}", e.line, e.message);
    }

    print!(
        "{}",
        report::format_run_summary(config.model.display_name(), &run.ingest.obs, &run.point, &run.ensemble)
    );
    println!("Parameter intervals ({:?}):", run.intervals.method);
    println!("{}", report::format_interval_table(&run.names, &run.intervals.params, "Median"));
    if let Some(bca) = &run.intervals.bca {
        println!("{}", report::format_bca_details(&run.names, bca));
    }

    if let Some(path) = &config.export_ensemble {
        write_ensemble_csv(path, &run.ensemble, &run.names)?;
    }
    if let Some(path) = &config.export_band {
        let band = BandFile::new(
            config.model,
            &run.point.params,
            run.names.clone(),
            run.ensemble.policy,
            run.ensemble.n_straps(),
            &run.ensemble.eval_points,
            &run.intervals.band,
        )?;
        write_band_json(path, &band)?;
    }

    Ok(())
}

fn handle_classical(args: &ClassicalArgs) -> Result<(), AppError> {
    let config = classical_config_from_args(args);
    let out = pipeline::run_classical(&config)?;

    println!("=== bfit - classical intervals ===");
    println!("Model: {}", config.model.display_name());
    println!("{}", report::format_classical(&out.names, &out.params, &out.bands));
    Ok(())
}

/// Map `bfit fit` flags onto the library configuration.
pub fn run_config_from_args(args: &FitArgs) -> RunConfig {
    let eval_points = match (&args.xpts, args.xrange) {
        (Some(points), _) => EvalPoints::Explicit(points.clone()),
        (None, Some((start, end))) => EvalPoints::Range {
            start,
            end,
            resolution: args.resolution,
        },
        (None, None) => EvalPoints::Grid {
            resolution: args.resolution,
        },
    };
    let failure = match args.tolerant {
        Some(min_successes) => FailurePolicy::Tolerant { min_successes },
        None => FailurePolicy::FailFast,
    };

    RunConfig {
        data_path: args.common.data.clone(),
        model: args.common.model,
        guess: args.common.guess.clone(),
        fit: fit_config(args.common.max_iterations),
        bootstrap: BootstrapConfig {
            n_straps: args.straps,
            eval_points,
            piecewise: !args.pooled,
            conservative: !args.parametric,
            seed: args.seed,
            failure,
            max_resample_attempts: args.max_resample_attempts,
            parallel: !args.sequential,
        },
        interval: IntervalConfig {
            confidence: args.common.confidence,
            method: args.method,
            names: args.common.names.clone(),
        },
        export_ensemble: args.export.clone(),
        export_band: args.export_band.clone(),
    }
}

pub fn classical_config_from_args(args: &ClassicalArgs) -> ClassicalConfig {
    ClassicalConfig {
        data_path: args.common.data.clone(),
        model: args.common.model,
        guess: args.common.guess.clone(),
        fit: fit_config(args.common.max_iterations),
        confidence: args.common.confidence,
        eval_points: EvalPoints::Grid {
            resolution: args.resolution,
        },
        names: args.common.names.clone(),
    }
}

fn fit_config(max_iterations: usize) -> FitConfig {
    FitConfig {
        max_iterations,
        ..FitConfig::default()
    }
}
