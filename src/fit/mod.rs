//! Curve fitting.
//!
//! Responsibilities:
//!
//! - the `FitAdapter` boundary and the Levenberg–Marquardt adapter
//! - initial-guess generation for refits
//! - asymptotic (classical) intervals from a single fit

pub mod classical;
pub mod fitter;
pub mod guess;

pub use classical::*;
pub use fitter::*;
pub use guess::*;
