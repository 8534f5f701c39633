//! Shared run pipeline used by the CLI subcommands and the integration tests.
//!
//! ingest -> point-estimate fit -> bootstrap -> intervals
//!
//! Presentation (printing, exports) stays in `app`.

use std::path::PathBuf;

use tracing::info;

use crate::bootstrap::{IntervalReport, bootstrap_fits, estimate_intervals};
use crate::domain::{
    BootstrapConfig, BootstrapEnsemble, EvalPoints, FitResult, IntervalConfig, Observations,
};
use crate::error::{AppError, FitStage};
use crate::fit::{
    ClassicalBands, ClassicalParams, FitAdapter, FitConfig, FixedGuess, GuessGenerator, LevenbergMarquardt,
    classical_fit_intervals, classical_param_intervals, initial_guess,
};
use crate::io::ingest::{IngestedData, load_observations};
use crate::models::ModelKind;

/// Everything a `bfit fit` run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_path: PathBuf,
    pub model: ModelKind,
    pub guess: Option<Vec<f64>>,
    pub fit: FitConfig,
    pub bootstrap: BootstrapConfig,
    pub interval: IntervalConfig,
    pub export_ensemble: Option<PathBuf>,
    pub export_band: Option<PathBuf>,
}

/// All computed outputs of a single `bfit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ingest: IngestedData,
    pub point: FitResult,
    pub ensemble: BootstrapEnsemble,
    pub intervals: IntervalReport,
    pub names: Vec<String>,
}

/// Load the data file named in `config` and run the bootstrap on it.
pub fn run_bootstrap(config: &RunConfig) -> Result<RunOutput, AppError> {
    let ingest = load_observations(&config.data_path)?;
    run_bootstrap_on(config, ingest)
}

/// Run the bootstrap on already-loaded data.
pub fn run_bootstrap_on(config: &RunConfig, ingest: IngestedData) -> Result<RunOutput, AppError> {
    let names = labels_for(config.model, config.interval.names.as_deref())?;
    let fitter = LevenbergMarquardt::new(config.fit.clone())?;
    let fixed = fixed_guess(config.model, config.guess.as_deref())?;
    let guess: &dyn GuessGenerator = match &fixed {
        Some(g) => g,
        None => &config.model,
    };
    let obs = &ingest.obs;

    let point = fit_point_estimate(config.model, &fitter, obs, guess)?;
    info!(params = ?point.params, sse = point.sse, "point estimate");

    let ensemble = bootstrap_fits(&config.model, &fitter, obs, &point.params, Some(guess), &config.bootstrap)?;
    let intervals = estimate_intervals(
        &config.model,
        &fitter,
        obs,
        &ensemble,
        Some(guess),
        &config.interval,
        config.bootstrap.parallel,
    )?;

    Ok(RunOutput {
        ingest,
        point,
        ensemble,
        intervals,
        names,
    })
}

/// Everything a `bfit classical` run needs.
#[derive(Debug, Clone)]
pub struct ClassicalConfig {
    pub data_path: PathBuf,
    pub model: ModelKind,
    pub guess: Option<Vec<f64>>,
    pub fit: FitConfig,
    pub confidence: f64,
    pub eval_points: EvalPoints,
    pub names: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ClassicalOutput {
    pub ingest: IngestedData,
    pub point: FitResult,
    pub params: ClassicalParams,
    pub bands: ClassicalBands,
    pub names: Vec<String>,
}

pub fn run_classical(config: &ClassicalConfig) -> Result<ClassicalOutput, AppError> {
    let names = labels_for(config.model, config.names.as_deref())?;
    let ingest = load_observations(&config.data_path)?;
    let fitter = LevenbergMarquardt::new(config.fit.clone())?;
    let fixed = fixed_guess(config.model, config.guess.as_deref())?;
    let guess: &dyn GuessGenerator = match &fixed {
        Some(g) => g,
        None => &config.model,
    };
    let obs = &ingest.obs;

    let point = fit_point_estimate(config.model, &fitter, obs, guess)?;
    let covariance = point.covariance.as_ref().ok_or_else(|| {
        AppError::input("Fit covariance is unavailable (singular Jacobian); classical intervals cannot be computed.")
    })?;
    let params = classical_param_intervals(&point.params, covariance, config.confidence)?;
    let xpts = config.eval_points.resolve(obs)?;
    let bands = classical_fit_intervals(&config.model, obs, &point.params, &xpts, config.confidence)?;

    Ok(ClassicalOutput {
        ingest,
        point,
        params,
        bands,
        names,
    })
}

/// Fit all observations (replicates flattened) to get the point estimate.
fn fit_point_estimate(
    model: ModelKind,
    fitter: &dyn FitAdapter,
    obs: &Observations,
    guess: &dyn GuessGenerator,
) -> Result<FitResult, AppError> {
    let start = initial_guess(Some(guess), obs, model.param_count())?;
    let (x, y) = obs.flattened();
    fitter
        .fit(&model, &x, &y, &start, None)
        .map_err(|e| e.at_stage(FitStage::PointEstimate))
}

/// Output labels: the given names, else the model's parameter names.
fn labels_for(model: ModelKind, names: Option<&[String]>) -> Result<Vec<String>, AppError> {
    match names {
        Some(n) if n.len() != model.param_count() => Err(AppError::input(format!(
            "Got {} parameter names but the {} model has {} parameters.",
            n.len(),
            model.display_name(),
            model.param_count()
        ))),
        Some(n) => Ok(n.to_vec()),
        None => Ok(model.param_names().iter().map(|s| s.to_string()).collect()),
    }
}

fn fixed_guess(model: ModelKind, guess: Option<&[f64]>) -> Result<Option<FixedGuess>, AppError> {
    match guess {
        None => Ok(None),
        Some(g) if g.len() == model.param_count() => Ok(Some(FixedGuess(g.to_vec()))),
        Some(g) => Err(AppError::input(format!(
            "Initial guess has {} values but the {} model has {} parameters.",
            g.len(),
            model.display_name(),
            model.param_count()
        ))),
    }
}
