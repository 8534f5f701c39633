//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observed data (`Observations`) and fit outputs (`FitResult`)
//! - resampling / failure / interval configuration
//! - bootstrap and jackknife ensembles and `ConfidenceInterval`

pub mod types;

pub use types::*;
