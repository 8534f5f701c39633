//! Residual sets and the four resampling policies.
//!
//! A bootstrap dataset is `ŷ(point estimate) + resampled residuals`. This
//! module owns the residuals and the draw; the driver owns everything else.

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::domain::{Observations, ResamplingPolicy};
use crate::error::AppError;
use crate::math::{has_two_distinct, population_std};
use crate::models::{Model, predict_all};

/// `observed - predicted`, shaped like the dependent data (`n × m`).
#[derive(Debug, Clone)]
pub struct ResidualSet {
    values: DMatrix<f64>,
}

impl ResidualSet {
    pub fn compute(model: &dyn Model, obs: &Observations, params: &[f64]) -> Result<Self, AppError> {
        let y_fit = predict_all(model, obs.x(), params);
        if y_fit.iter().any(|v| !v.is_finite()) {
            return Err(AppError::input(
                "Model prediction at the point estimate is not finite.",
            ));
        }
        let values = DMatrix::from_fn(obs.n_groups(), obs.replicates(), |i, j| {
            obs.y()[(i, j)] - y_fit[i]
        });
        Ok(Self { values })
    }

    pub fn from_matrix(values: DMatrix<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }
}

/// Draws one residual resample per call according to a `ResamplingPolicy`.
#[derive(Debug, Clone)]
pub struct ResidualSampler<'a> {
    residuals: &'a ResidualSet,
    policy: ResamplingPolicy,
    max_attempts: usize,
    pooled: Vec<f64>,
    pooled_normal: Normal<f64>,
    group_normals: Vec<Normal<f64>>,
}

impl<'a> ResidualSampler<'a> {
    pub fn new(
        residuals: &'a ResidualSet,
        policy: ResamplingPolicy,
        max_attempts: usize,
    ) -> Result<Self, AppError> {
        let (n, m) = residuals.shape();
        if n == 0 || m == 0 {
            return Err(AppError::input("Residual set is empty."));
        }
        if policy.is_piecewise() && m < 2 {
            return Err(AppError::input(format!(
                "{} resampling needs replicate measurements; got one per group.",
                policy.display_name()
            )));
        }
        if max_attempts == 0 {
            return Err(AppError::input("Resample attempt cap must be > 0."));
        }

        let values = residuals.values();
        let pooled: Vec<f64> = values.iter().copied().collect();
        let pooled_normal = zero_mean_normal(population_std(&pooled))?;
        let group_normals = values
            .row_iter()
            .map(|row| {
                let row: Vec<f64> = row.iter().copied().collect();
                zero_mean_normal(population_std(&row))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // A group without two distinct candidates can never yield a
        // qualifying resample; retrying would only burn the cap.
        match policy {
            ResamplingPolicy::PiecewiseConservative => {
                if let Some(group) = values.row_iter().position(|row| !has_two_distinct(row.iter().copied())) {
                    return Err(AppError::DegenerateResample { group, attempts: 0 });
                }
            }
            ResamplingPolicy::PooledConservative if m > 1 && !has_two_distinct(pooled.iter().copied()) => {
                return Err(AppError::DegenerateResample { group: 0, attempts: 0 });
            }
            _ => {}
        }

        Ok(Self {
            residuals,
            policy,
            max_attempts,
            pooled,
            pooled_normal,
            group_normals,
        })
    }

    pub fn policy(&self) -> ResamplingPolicy {
        self.policy
    }

    /// One resample with the shape of the original dependent data.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DMatrix<f64>, AppError> {
        let (n, m) = self.residuals.shape();
        let values = self.residuals.values();

        match self.policy {
            ResamplingPolicy::PooledConservative => {
                let len = self.pooled.len();
                let mut draw = DMatrix::from_fn(n, m, |_, _| self.pooled[rng.gen_range(0..len)]);
                if m < 2 {
                    return Ok(draw);
                }
                // Replicated groups are refit with their own spread as weights,
                // so a group drawn as one repeated residual is redrawn.
                for i in 0..n {
                    let mut attempts = 1;
                    while !has_two_distinct(draw.row(i).iter().copied()) {
                        if attempts >= self.max_attempts {
                            return Err(AppError::DegenerateResample { group: i, attempts });
                        }
                        for j in 0..m {
                            draw[(i, j)] = self.pooled[rng.gen_range(0..len)];
                        }
                        attempts += 1;
                    }
                }
                Ok(draw)
            }
            ResamplingPolicy::PooledParametric => {
                Ok(DMatrix::from_fn(n, m, |_, _| self.pooled_normal.sample(rng)))
            }
            ResamplingPolicy::PiecewiseConservative => {
                let mut last_bad = 0;
                for _ in 0..self.max_attempts {
                    let draw = DMatrix::from_fn(n, m, |i, _| values[(i, rng.gen_range(0..m))]);
                    match draw
                        .row_iter()
                        .position(|row| !has_two_distinct(row.iter().copied()))
                    {
                        None => return Ok(draw),
                        Some(group) => last_bad = group,
                    }
                }
                Err(AppError::DegenerateResample {
                    group: last_bad,
                    attempts: self.max_attempts,
                })
            }
            ResamplingPolicy::PiecewiseParametric => {
                Ok(DMatrix::from_fn(n, m, |i, _| self.group_normals[i].sample(rng)))
            }
        }
    }
}

fn zero_mean_normal(sigma: f64) -> Result<Normal<f64>, AppError> {
    Normal::new(0.0, sigma)
        .map_err(|e| AppError::input(format!("Residual deviation {sigma} is not usable: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const ALL_POLICIES: [ResamplingPolicy; 4] = [
        ResamplingPolicy::PooledConservative,
        ResamplingPolicy::PooledParametric,
        ResamplingPolicy::PiecewiseConservative,
        ResamplingPolicy::PiecewiseParametric,
    ];

    fn replicated_residuals() -> ResidualSet {
        ResidualSet::from_matrix(DMatrix::from_row_slice(
            3,
            4,
            &[
                -0.2, 0.1, 0.3, -0.1, //
                0.5, -0.4, 0.0, 0.2, //
                -1.0, 1.0, 0.5, -0.5,
            ],
        ))
    }

    #[test]
    fn residuals_subtract_tiled_prediction() {
        let obs = Observations::replicated(vec![1.0, 2.0], vec![vec![2.5, 1.5], vec![4.0, 4.5]]).unwrap();
        let line = |x: f64, p: &[f64]| p[0] * x;
        let res = ResidualSet::compute(&line, &obs, &[2.0]).unwrap();
        assert_eq!(res.values(), &DMatrix::from_row_slice(2, 2, &[0.5, -0.5, 0.0, 0.5]));
    }

    #[test]
    fn pooled_conservative_draws_only_observed_residuals() {
        let res = replicated_residuals();
        let sampler = ResidualSampler::new(&res, ResamplingPolicy::PooledConservative, 10).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let draw = sampler.draw(&mut rng).unwrap();
        assert!(draw.iter().all(|v| res.values().iter().any(|r| r == v)));
    }

    #[test]
    fn piecewise_conservative_stays_within_each_group() {
        let res = replicated_residuals();
        let sampler = ResidualSampler::new(&res, ResamplingPolicy::PiecewiseConservative, 100).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let draw = sampler.draw(&mut rng).unwrap();
            for i in 0..3 {
                let row = res.values().row(i);
                assert!(draw.row(i).iter().all(|v| row.iter().any(|r| r == v)));
                assert!(has_two_distinct(draw.row(i).iter().copied()));
            }
        }
    }

    #[test]
    fn pooled_conservative_redraws_groups_without_spread() {
        // Two distinct pooled values: a 12-group, 2-replicate draw almost
        // never has spread in every group on the first try.
        let rows: Vec<f64> = (0..12).flat_map(|_| [0.5, -0.5]).collect();
        let res = ResidualSet::from_matrix(DMatrix::from_row_slice(12, 2, &rows));
        let sampler = ResidualSampler::new(&res, ResamplingPolicy::PooledConservative, 1000).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let draw = sampler.draw(&mut rng).unwrap();
            assert!(draw.row_iter().all(|row| has_two_distinct(row.iter().copied())));
        }
    }

    #[test]
    fn pooled_conservative_respects_the_retry_cap() {
        let rows: Vec<f64> = (0..20).flat_map(|_| [0.5, -0.5]).collect();
        let res = ResidualSet::from_matrix(DMatrix::from_row_slice(20, 2, &rows));
        let sampler = ResidualSampler::new(&res, ResamplingPolicy::PooledConservative, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let err = sampler.draw(&mut rng).unwrap_err();
        assert!(matches!(err, AppError::DegenerateResample { attempts: 1, .. }));
    }

    #[test]
    fn constant_residuals_fail_pooled_conservative_on_replicates() {
        let res = ResidualSet::from_matrix(DMatrix::from_element(3, 2, 0.25));
        assert!(matches!(
            ResidualSampler::new(&res, ResamplingPolicy::PooledConservative, 100),
            Err(AppError::DegenerateResample { attempts: 0, .. })
        ));
        let single = ResidualSet::from_matrix(DMatrix::from_element(3, 1, 0.25));
        assert!(ResidualSampler::new(&single, ResamplingPolicy::PooledConservative, 100).is_ok());
    }

    #[test]
    fn piecewise_parametric_uses_each_groups_spread() {
        let res = ResidualSet::from_matrix(DMatrix::from_row_slice(
            2,
            2,
            &[-0.001, 0.001, -100.0, 100.0],
        ));
        let sampler = ResidualSampler::new(&res, ResamplingPolicy::PiecewiseParametric, 10).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut small = 0.0f64;
        let mut large = 0.0f64;
        for _ in 0..200 {
            let d = sampler.draw(&mut rng).unwrap();
            small = small.max(d.row(0).amax());
            large = large.max(d.row(1).amax());
        }
        assert!(small < 0.01, "tight group drew {small}");
        assert!(large > 10.0, "wide group drew {large}");
    }

    #[test]
    fn zero_variance_group_fails_instead_of_spinning() {
        let res = ResidualSet::from_matrix(DMatrix::from_row_slice(
            2,
            3,
            &[0.1, -0.1, 0.0, 0.2, 0.2, 0.2],
        ));
        let err = ResidualSampler::new(&res, ResamplingPolicy::PiecewiseConservative, 1000).unwrap_err();
        assert!(matches!(err, AppError::DegenerateResample { group: 1, .. }));
    }

    #[test]
    fn retry_cap_is_enforced() {
        // Two replicates with distinct values: half of all row draws are
        // degenerate, so a cap of one attempt across 20 groups almost surely fails.
        let rows: Vec<f64> = (0..20).flat_map(|i| [i as f64, -(i as f64) - 1.0]).collect();
        let res = ResidualSet::from_matrix(DMatrix::from_row_slice(20, 2, &rows));
        let sampler = ResidualSampler::new(&res, ResamplingPolicy::PiecewiseConservative, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let err = sampler.draw(&mut rng).unwrap_err();
        assert!(matches!(err, AppError::DegenerateResample { attempts: 1, .. }));
    }

    #[test]
    fn piecewise_without_replicates_is_rejected() {
        let res = ResidualSet::from_matrix(DMatrix::from_row_slice(3, 1, &[0.1, -0.2, 0.1]));
        assert!(matches!(
            ResidualSampler::new(&res, ResamplingPolicy::PiecewiseParametric, 10),
            Err(AppError::Input(_))
        ));
    }

    proptest! {
        #[test]
        fn every_policy_preserves_shape(
            n in 1usize..8,
            m in 2usize..6,
            seed in any::<u64>(),
            scale in 0.01f64..10.0,
        ) {
            let values = DMatrix::from_fn(n, m, |i, j| scale * ((i * m + j) as f64 - 3.5));
            let res = ResidualSet::from_matrix(values);
            let mut rng = StdRng::seed_from_u64(seed);
            for policy in ALL_POLICIES {
                let sampler = ResidualSampler::new(&res, policy, 10_000).unwrap();
                let draw = sampler.draw(&mut rng).unwrap();
                prop_assert_eq!(draw.shape(), (n, m));
            }
        }
    }
}
