//! Mathematical utilities: least squares and the statistics used by the
//! interval estimators.

pub mod ols;
pub mod stats;

pub use ols::*;
pub use stats::*;
