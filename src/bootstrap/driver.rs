//! The bootstrap loop: resample residuals, refit, evaluate the refit curve.
//!
//! Iterations are independent. Each one seeds its own `StdRng` from the base
//! seed and its index, so results do not depend on thread scheduling and a
//! parallel run reproduces a sequential one exactly.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::bootstrap::sampler::{ResidualSampler, ResidualSet};
use crate::domain::{BootstrapConfig, BootstrapEnsemble, FailurePolicy, Observations};
use crate::error::{AppError, FitStage};
use crate::fit::{FitAdapter, GuessGenerator, Weights, initial_guess};
use crate::models::{Model, predict_all};

struct Refit {
    params: Vec<f64>,
    curve: Vec<f64>,
}

/// Run `config.n_straps` residual-bootstrap refits around `point_estimate`.
///
/// With replicated data each synthetic dataset is reduced to group means and
/// refit with the group standard deviations as absolute sigma; otherwise the
/// synthetic values are refit directly.
pub fn bootstrap_fits(
    model: &dyn Model,
    fitter: &dyn FitAdapter,
    obs: &Observations,
    point_estimate: &[f64],
    guess: Option<&dyn GuessGenerator>,
    config: &BootstrapConfig,
) -> Result<BootstrapEnsemble, AppError> {
    if config.n_straps == 0 {
        return Err(AppError::input("Number of bootstrap iterations must be > 0."));
    }
    if point_estimate.is_empty() || point_estimate.iter().any(|v| !v.is_finite()) {
        return Err(AppError::input("Point estimate must be a non-empty vector of finite values."));
    }
    if let FailurePolicy::Tolerant { min_successes } = config.failure {
        if min_successes == 0 || min_successes > config.n_straps {
            return Err(AppError::input(format!(
                "Minimum successful refits must be in 1..={}, got {min_successes}.",
                config.n_straps
            )));
        }
    }

    let requested = config.policy();
    let policy = requested.effective_for(obs);
    if policy != requested {
        info!(
            requested = requested.display_name(),
            used = policy.display_name(),
            "no replicates; falling back to pooled resampling"
        );
    }

    let eval_points = config.eval_points.resolve(obs)?;
    let y_fit = predict_all(model, obs.x(), point_estimate);
    let residuals = ResidualSet::compute(model, obs, point_estimate)?;
    let sampler = ResidualSampler::new(&residuals, policy, config.max_resample_attempts)?;

    info!(
        n_straps = config.n_straps,
        policy = policy.display_name(),
        groups = obs.n_groups(),
        replicates = obs.replicates(),
        parallel = config.parallel,
        "bootstrap started"
    );

    let run_one = |iteration: usize| -> Result<Refit, AppError> {
        let mut rng = StdRng::seed_from_u64(iteration_seed(config.seed, iteration));
        let noise = sampler.draw(&mut rng)?;
        let synthetic_y = DMatrix::from_fn(noise.nrows(), noise.ncols(), |i, j| y_fit[i] + noise[(i, j)]);
        let synthetic = Observations::from_matrix(obs.x().to_vec(), synthetic_y)?;
        let start = initial_guess(guess, &synthetic, point_estimate.len())?;

        let fitted = if synthetic.is_replicated() {
            let sigma = synthetic.group_stds();
            if let Some(group) = sigma.iter().position(|&s| s.is_nan() || s <= 0.0) {
                return Err(AppError::convergence(
                    FitStage::Bootstrap { iteration },
                    format!("group {group} has no replicate spread; weighted refit is undefined"),
                ));
            }
            let weights = Weights {
                sigma,
                absolute: true,
            };
            fitter.fit(model, synthetic.x(), &synthetic.group_means(), &start, Some(&weights))
        } else {
            let y: Vec<f64> = synthetic.y().column(0).iter().copied().collect();
            fitter.fit(model, synthetic.x(), &y, &start, None)
        };
        let fit = fitted.map_err(|e| e.at_stage(FitStage::Bootstrap { iteration }))?;
        if fit.params.len() != point_estimate.len() {
            return Err(AppError::input(format!(
                "Refit returned {} parameters; expected {}.",
                fit.params.len(),
                point_estimate.len()
            )));
        }

        let curve = predict_all(model, &eval_points, &fit.params);
        Ok(Refit {
            params: fit.params,
            curve,
        })
    };

    let outcomes: Vec<Result<Refit, AppError>> = if config.parallel {
        (0..config.n_straps).into_par_iter().map(run_one).collect()
    } else {
        (0..config.n_straps).map(run_one).collect()
    };

    let mut refits = Vec::with_capacity(outcomes.len());
    let mut failures = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(r) => refits.push(r),
            Err(err @ AppError::Convergence { .. }) => match config.failure {
                FailurePolicy::FailFast => return Err(err),
                FailurePolicy::Tolerant { .. } => {
                    debug!(%err, "skipping failed refit");
                    failures += 1;
                }
            },
            Err(err) => return Err(err),
        }
    }

    if let FailurePolicy::Tolerant { min_successes } = config.failure {
        if failures > 0 {
            warn!(failures, attempted = config.n_straps, "bootstrap refits failed");
        }
        if refits.len() < min_successes {
            return Err(AppError::InsufficientRefits {
                succeeded: refits.len(),
                required: min_successes,
                failed: failures,
            });
        }
    }

    let s = refits.len();
    let params = DMatrix::from_row_iterator(
        s,
        point_estimate.len(),
        refits.iter().flat_map(|r| r.params.iter().copied()),
    );
    let curves = DMatrix::from_row_iterator(
        s,
        eval_points.len(),
        refits.iter().flat_map(|r| r.curve.iter().copied()),
    );

    info!(succeeded = s, failures, "bootstrap finished");

    Ok(BootstrapEnsemble {
        params,
        curves,
        eval_points,
        policy,
        attempted: config.n_straps,
        failures,
    })
}

/// Seed for one iteration's random substream.
fn iteration_seed(base: u64, iteration: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    base.hash(&mut hasher);
    iteration.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvalPoints, ResamplingPolicy};
    use crate::fit::LevenbergMarquardt;

    fn line(x: f64, p: &[f64]) -> f64 {
        p[0] * x + p[1]
    }

    fn line_obs() -> Observations {
        Observations::single(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![2.1, 3.9, 6.2, 7.8, 10.1]).unwrap()
    }

    fn replicated_obs() -> Observations {
        Observations::replicated(
            vec![1.0, 2.0, 3.0, 4.0],
            vec![
                vec![2.9, 3.1, 3.05],
                vec![4.8, 5.2, 5.1],
                vec![7.1, 6.9, 6.95],
                vec![9.2, 8.8, 9.0],
            ],
        )
        .unwrap()
    }

    fn small_config(n_straps: usize) -> BootstrapConfig {
        BootstrapConfig {
            n_straps,
            eval_points: EvalPoints::Grid { resolution: 11 },
            ..BootstrapConfig::default()
        }
    }

    #[test]
    fn ensemble_shapes_follow_config() {
        let fitter = LevenbergMarquardt::default();
        let ens = bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], None, &small_config(40)).unwrap();
        assert_eq!(ens.params.shape(), (40, 2));
        assert_eq!(ens.curves.shape(), (40, 11));
        assert_eq!(ens.eval_points.len(), 11);
        assert_eq!(ens.failures, 0);
    }

    #[test]
    fn single_column_data_falls_back_to_pooled() {
        let fitter = LevenbergMarquardt::default();
        let ens = bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], None, &small_config(5)).unwrap();
        assert_eq!(ens.policy, ResamplingPolicy::PooledConservative);
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let fitter = LevenbergMarquardt::default();
        let obs = replicated_obs();
        let mut cfg = small_config(30);
        cfg.parallel = true;
        let par = bootstrap_fits(&line, &fitter, &obs, &[2.0, 1.0], None, &cfg).unwrap();
        cfg.parallel = false;
        let seq = bootstrap_fits(&line, &fitter, &obs, &[2.0, 1.0], None, &cfg).unwrap();
        assert_eq!(par.params, seq.params);
        assert_eq!(par.curves, seq.curves);
    }

    #[test]
    fn seed_changes_the_ensemble() {
        let fitter = LevenbergMarquardt::default();
        let mut cfg = small_config(20);
        let a = bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], None, &cfg).unwrap();
        cfg.seed += 1;
        let b = bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], None, &cfg).unwrap();
        assert_ne!(a.params, b.params);
    }

    #[test]
    fn every_policy_runs_on_replicated_data() {
        let fitter = LevenbergMarquardt::default();
        let obs = replicated_obs();
        for (piecewise, conservative) in [(false, false), (false, true), (true, false), (true, true)] {
            let cfg = BootstrapConfig {
                piecewise,
                conservative,
                ..small_config(25)
            };
            let ens = bootstrap_fits(&line, &fitter, &obs, &[2.0, 1.0], None, &cfg).unwrap();
            assert_eq!(ens.policy, ResamplingPolicy::from_flags(piecewise, conservative));
            let slope = ens.params.column(0);
            assert!(slope.iter().all(|v| (v - 2.0).abs() < 0.5), "{slope:?}");
        }
    }

    #[test]
    fn pooled_conservative_on_replicates_completes_a_default_run() {
        let fitter = LevenbergMarquardt::default();
        let cfg = BootstrapConfig {
            piecewise: false,
            conservative: true,
            ..BootstrapConfig::default()
        };
        assert_eq!(cfg.failure, FailurePolicy::FailFast);
        let ens = bootstrap_fits(&line, &fitter, &replicated_obs(), &[2.0, 1.0], None, &cfg).unwrap();
        assert_eq!(ens.policy, ResamplingPolicy::PooledConservative);
        assert_eq!(ens.n_straps(), cfg.n_straps);
        assert_eq!(ens.failures, 0);
    }

    #[test]
    fn wrong_length_guess_is_an_error_not_a_panic() {
        let fitter = LevenbergMarquardt::default();
        let short = |_: &Observations| vec![1.0];
        for parallel in [true, false] {
            let cfg = BootstrapConfig {
                parallel,
                ..small_config(10)
            };
            let err = bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], Some(&short), &cfg).unwrap_err();
            assert!(matches!(err, AppError::Input(_)), "{err}");
        }

        let tolerant = BootstrapConfig {
            failure: FailurePolicy::Tolerant { min_successes: 1 },
            ..small_config(10)
        };
        assert!(matches!(
            bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], Some(&short), &tolerant),
            Err(AppError::Input(_))
        ));
    }

    #[test]
    fn guess_generator_sees_synthetic_data() {
        let fitter = LevenbergMarquardt::default();
        let guess = |o: &Observations| vec![1.0, o.y()[(0, 0)]];
        let ens = bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], Some(&guess), &small_config(10)).unwrap();
        assert_eq!(ens.n_straps(), 10);
    }

    #[test]
    fn failures_abort_by_default_and_count_when_tolerant() {
        // A fitter that rejects every other dataset.
        struct Flaky;
        impl FitAdapter for Flaky {
            fn fit(
                &self,
                _model: &dyn Model,
                _x: &[f64],
                y: &[f64],
                initial_guess: &[f64],
                _weights: Option<&Weights>,
            ) -> Result<crate::domain::FitResult, AppError> {
                if y[0] > 2.1 {
                    Err(AppError::convergence(FitStage::PointEstimate, "rejected"))
                } else {
                    Ok(crate::domain::FitResult {
                        params: initial_guess.to_vec(),
                        covariance: None,
                        sse: 0.0,
                        iterations: 1,
                    })
                }
            }
        }

        let obs = line_obs();
        let err = bootstrap_fits(&line, &Flaky, &obs, &[1.99, 0.05], None, &small_config(50)).unwrap_err();
        assert!(matches!(
            err,
            AppError::Convergence {
                stage: FitStage::Bootstrap { .. },
                ..
            }
        ));

        let tolerant = BootstrapConfig {
            failure: FailurePolicy::Tolerant { min_successes: 1 },
            ..small_config(50)
        };
        let ens = bootstrap_fits(&line, &Flaky, &obs, &[1.99, 0.05], None, &tolerant).unwrap();
        assert!(ens.failures > 0);
        assert_eq!(ens.n_straps() + ens.failures, 50);

        let strict = BootstrapConfig {
            failure: FailurePolicy::Tolerant { min_successes: 50 },
            ..small_config(50)
        };
        assert!(matches!(
            bootstrap_fits(&line, &Flaky, &obs, &[1.99, 0.05], None, &strict),
            Err(AppError::InsufficientRefits { required: 50, .. })
        ));
    }

    #[test]
    fn rejects_empty_runs() {
        let fitter = LevenbergMarquardt::default();
        assert!(matches!(
            bootstrap_fits(&line, &fitter, &line_obs(), &[1.99, 0.05], None, &small_config(0)),
            Err(AppError::Input(_))
        ));
    }

    #[test]
    fn iteration_seeds_differ() {
        assert_ne!(iteration_seed(42, 0), iteration_seed(42, 1));
        assert_eq!(iteration_seed(42, 7), iteration_seed(42, 7));
    }
}
