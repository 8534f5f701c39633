//! Initial guesses for refits.
//!
//! Every bootstrap and jackknife refit needs a starting point. Callers can
//! supply a generator that looks at the (synthetic) data; without one we start
//! from a vector of ones sized to the point estimate.

use crate::domain::Observations;
use crate::error::AppError;

pub trait GuessGenerator: Sync {
    fn guess(&self, obs: &Observations) -> Vec<f64>;
}

impl<F> GuessGenerator for F
where
    F: Fn(&Observations) -> Vec<f64> + Sync,
{
    fn guess(&self, obs: &Observations) -> Vec<f64> {
        self(obs)
    }
}

/// The same starting point for every refit.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedGuess(pub Vec<f64>);

impl GuessGenerator for FixedGuess {
    fn guess(&self, _obs: &Observations) -> Vec<f64> {
        self.0.clone()
    }
}

/// Guess from `generator`, or ones when there is none.
///
/// A generated guess must have exactly `n_params` entries.
pub fn initial_guess(
    generator: Option<&dyn GuessGenerator>,
    obs: &Observations,
    n_params: usize,
) -> Result<Vec<f64>, AppError> {
    let start = match generator {
        Some(g) => g.guess(obs),
        None => vec![1.0; n_params],
    };
    if start.len() != n_params {
        return Err(AppError::input(format!(
            "Initial guess has {} values; the model has {n_params} parameters.",
            start.len()
        )));
    }
    Ok(start)
}
