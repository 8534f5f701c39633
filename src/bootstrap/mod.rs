//! Residual-resampling bootstrap.
//!
//! Responsibilities:
//!
//! - residual resampling under the four policies (`sampler`)
//! - the refit loop that builds a `BootstrapEnsemble` (`driver`)
//! - leave-one-out refits (`jackknife`)
//! - percentile and BCa intervals (`interval`)

pub mod driver;
pub mod interval;
pub mod jackknife;
pub mod sampler;

pub use driver::*;
pub use interval::*;
pub use jackknife::*;
pub use sampler::*;
