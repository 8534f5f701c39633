//! Crate-wide error type.
//!
//! Every variant carries a process exit code so the `bfit` binary can map
//! failures onto distinct statuses without inspecting messages.

use std::fmt;

use thiserror::Error;

/// Which refit a convergence failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStage {
    /// The fit of the original data that produces the point estimate.
    PointEstimate,
    /// One bootstrap refit of a synthetic dataset.
    Bootstrap { iteration: usize },
    /// A leave-one-out refit of the original data.
    Jackknife { left_out: usize },
}

impl fmt::Display for FitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStage::PointEstimate => write!(f, "point-estimate fit"),
            FitStage::Bootstrap { iteration } => write!(f, "bootstrap iteration {iteration}"),
            FitStage::Jackknife { left_out } => write!(f, "jackknife refit (point {left_out} left out)"),
        }
    }
}

/// Which end of a confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    Lower,
    Upper,
}

impl fmt::Display for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tail::Lower => write!(f, "lower"),
            Tail::Upper => write!(f, "upper"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Bad user input: CLI values, files, shapes, fit configuration.
    #[error("{0}")]
    Input(String),

    #[error("{stage} failed to converge: {message}")]
    Convergence { stage: FitStage, message: String },

    #[error(
        "Only {succeeded} bootstrap refits succeeded ({failed} failed); at least {required} are required."
    )]
    InsufficientRefits {
        succeeded: usize,
        required: usize,
        failed: usize,
    },

    #[error(
        "No resample with >= 2 distinct residuals in group {group} (attempts: {attempts})."
    )]
    DegenerateResample { group: usize, attempts: usize },

    #[error("BCa interval unstable for parameter {parameter} ({tail} bound): {reason}")]
    Instability {
        parameter: usize,
        tail: Tail,
        reason: String,
    },
}

impl AppError {
    pub fn input(message: impl Into<String>) -> Self {
        AppError::Input(message.into())
    }

    pub fn convergence(stage: FitStage, message: impl Into<String>) -> Self {
        AppError::Convergence {
            stage,
            message: message.into(),
        }
    }

    /// Attach a stage to a convergence failure raised without one.
    ///
    /// Fit adapters do not know which refit they are serving, so they report
    /// `PointEstimate` and callers relabel.
    pub fn at_stage(self, stage: FitStage) -> Self {
        match self {
            AppError::Convergence { message, .. } => AppError::Convergence { stage, message },
            other => other,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Input(_) => 2,
            AppError::Convergence { .. } | AppError::InsufficientRefits { .. } => 4,
            AppError::DegenerateResample { .. } => 5,
            AppError::Instability { .. } => 6,
        }
    }
}
